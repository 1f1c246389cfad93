//! SQL migration definitions for the offline store.
//!
//! Migrations are applied in order on open. Each one carries a version
//! number and a batch of statements.

/// A database migration with a version and SQL statements.
pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![
        Migration {
            version: 1,
            description: "Initial schema: workbooks, sheets, records, jobs",
            sql: r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version    INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS workbooks (
    id         TEXT PRIMARY KEY,
    name       TEXT NOT NULL,
    created_at TEXT NOT NULL
);

-- Sheets keep their creation order within a workbook
CREATE TABLE IF NOT EXISTS sheets (
    id          TEXT PRIMARY KEY,
    workbook_id TEXT NOT NULL REFERENCES workbooks(id) ON DELETE CASCADE,
    name        TEXT NOT NULL,
    slug        TEXT NOT NULL,
    fields_json TEXT NOT NULL,
    position    INTEGER NOT NULL,
    created_at  TEXT NOT NULL,
    UNIQUE(workbook_id, name)
);

CREATE INDEX IF NOT EXISTS idx_sheets_workbook ON sheets(workbook_id, position);

-- Records are listed in insertion (rowid) order
CREATE TABLE IF NOT EXISTS records (
    id          TEXT PRIMARY KEY,
    sheet_id    TEXT NOT NULL REFERENCES sheets(id) ON DELETE CASCADE,
    values_json TEXT NOT NULL,
    updated_at  TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_records_sheet ON records(sheet_id);

CREATE TABLE IF NOT EXISTS jobs (
    id           TEXT PRIMARY KEY,
    job_type     TEXT NOT NULL,
    operation    TEXT NOT NULL,
    source       TEXT NOT NULL,
    status       TEXT NOT NULL,
    progress     INTEGER NOT NULL DEFAULT 0,
    info         TEXT NOT NULL DEFAULT '',
    outcome_json TEXT,
    created_at   TEXT NOT NULL,
    updated_at   TEXT NOT NULL
);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
        },
        Migration {
            version: 2,
            description: "Idempotency keys for record batches",
            sql: r#"
CREATE TABLE IF NOT EXISTS record_batches (
    sheet_id        TEXT NOT NULL REFERENCES sheets(id) ON DELETE CASCADE,
    idempotency_key TEXT NOT NULL,
    record_count    INTEGER NOT NULL,
    created_at      TEXT NOT NULL,
    PRIMARY KEY (sheet_id, idempotency_key)
);

INSERT INTO schema_migrations (version) VALUES (2);
"#,
        },
    ]
}
