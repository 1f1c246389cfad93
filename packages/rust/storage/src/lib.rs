//! libSQL-backed local store (offline mode).
//!
//! [`LocalStore`] implements the job and workbook collaborator traits over a
//! local database so an extraction can run without a remote API. Record
//! batches are keyed by their idempotency key: replaying a key inserts
//! nothing and reports the original count.

mod migrations;

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database, Row, params};
use sheetloader_remote::{JobApi, WorkbookApi};
use sheetloader_shared::{
    FieldSchema, Job, JobId, JobOutcome, JobStatus, NewJob, Page, Pagination, Record,
    RecordUpdate, Result, RowCapture, Sheet, SheetSchema, SheetloaderError, Workbook,
};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};
use uuid::Uuid;

fn db_err(e: libsql::Error) -> SheetloaderError {
    SheetloaderError::Storage(e.to_string())
}

fn json_err(e: serde_json::Error) -> SheetloaderError {
    SheetloaderError::Storage(format!("corrupt JSON column: {e}"))
}

/// Local workbook and job store.
pub struct LocalStore {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
    /// Serializes multi-statement writes issued from concurrent chunk tasks.
    write_lock: Mutex<()>,
}

impl LocalStore {
    /// Open or create a database at `path` and apply pending migrations.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| SheetloaderError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(db_err)?;
        let conn = db.connect().map_err(db_err)?;

        let store = Self {
            db,
            conn,
            write_lock: Mutex::new(()),
        };
        store.run_migrations().await?;
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn.execute_batch(migration.sql).await.map_err(|e| {
                    SheetloaderError::Storage(format!(
                        "migration v{} failed: {e}",
                        migration.version
                    ))
                })?;
            }
        }
        Ok(())
    }

    /// Current schema version, or 0 before the first migration.
    async fn schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => match rows.next().await {
                Ok(Some(row)) => row.get::<u32>(0).unwrap_or(0),
                _ => 0,
            },
            Err(_) => 0,
        }
    }

    async fn count(&self, sql: &str, key: &str) -> Result<u32> {
        let mut rows = self.conn.query(sql, params![key]).await.map_err(db_err)?;
        match rows.next().await.map_err(db_err)? {
            Some(row) => Ok(row.get::<u32>(0).map_err(db_err)?),
            None => Ok(0),
        }
    }

    async fn sheet_exists(&self, sheet_id: &str) -> Result<bool> {
        Ok(self
            .count("SELECT COUNT(*) FROM sheets WHERE id = ?1", sheet_id)
            .await?
            > 0)
    }

    async fn load_sheets(&self, workbook_id: &str, limit: u32, offset: u32) -> Result<Vec<Sheet>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, workbook_id, name, slug, fields_json FROM sheets
                 WHERE workbook_id = ?1 ORDER BY position LIMIT ?2 OFFSET ?3",
                params![workbook_id, i64::from(limit), i64::from(offset)],
            )
            .await
            .map_err(db_err)?;

        let mut sheets = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            sheets.push(sheet_from_row(&row)?);
        }
        Ok(sheets)
    }

    /// Move a non-terminal job to `status`, optionally recording an outcome.
    async fn transition(
        &self,
        id: &JobId,
        status: JobStatus,
        outcome: Option<&JobOutcome>,
    ) -> Result<()> {
        let outcome_json = outcome
            .map(serde_json::to_string)
            .transpose()
            .map_err(json_err)?;
        let now = Utc::now().to_rfc3339();

        let changed = self
            .conn
            .execute(
                "UPDATE jobs SET status = ?2, outcome_json = COALESCE(?3, outcome_json),
                        progress = CASE WHEN ?2 = 'complete' THEN 100 ELSE progress END,
                        updated_at = ?4
                 WHERE id = ?1 AND status NOT IN ('complete', 'failed')",
                params![id.as_str(), status.as_str(), outcome_json.as_deref(), now.as_str()],
            )
            .await
            .map_err(db_err)?;

        if changed == 0 {
            return Err(self.rejection(id).await);
        }
        debug!(job_id = %id, %status, "job transitioned");
        Ok(())
    }

    /// Explain why an update touched no job row.
    async fn rejection(&self, id: &JobId) -> SheetloaderError {
        match self.get_job(id).await {
            Ok(job) => SheetloaderError::job(format!("job '{id}' is already {}", job.status)),
            Err(e) => e,
        }
    }
}

async fn insert_sheet(
    conn: &Connection,
    workbook_id: &str,
    schema: &SheetSchema,
) -> Result<Sheet> {
    let id = Uuid::now_v7().to_string();
    let fields_json = serde_json::to_string(&schema.fields).map_err(json_err)?;
    let now = Utc::now().to_rfc3339();

    conn.execute(
        "INSERT INTO sheets (id, workbook_id, name, slug, fields_json, position, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5,
                 (SELECT COUNT(*) FROM sheets WHERE workbook_id = ?2), ?6)",
        params![
            id.as_str(),
            workbook_id,
            schema.name.as_str(),
            schema.slug.as_str(),
            fields_json.as_str(),
            now.as_str()
        ],
    )
    .await
    .map_err(|e| {
        SheetloaderError::Storage(format!("failed to create sheet '{}': {e}", schema.name))
    })?;

    Ok(Sheet {
        id,
        workbook_id: workbook_id.to_string(),
        name: schema.name.clone(),
        slug: schema.slug.clone(),
        fields: schema.fields.clone(),
    })
}

fn sheet_from_row(row: &Row) -> Result<Sheet> {
    let fields_json = row.get::<String>(4).map_err(db_err)?;
    let fields: Vec<FieldSchema> = serde_json::from_str(&fields_json).map_err(json_err)?;
    Ok(Sheet {
        id: row.get::<String>(0).map_err(db_err)?,
        workbook_id: row.get::<String>(1).map_err(db_err)?,
        name: row.get::<String>(2).map_err(db_err)?,
        slug: row.get::<String>(3).map_err(db_err)?,
        fields,
    })
}

fn job_from_row(row: &Row) -> Result<Job> {
    let status: JobStatus = row.get::<String>(4).map_err(db_err)?.parse()?;
    let progress = row.get::<u32>(5).map_err(db_err)?.min(100) as u8;
    let outcome = row
        .get::<Option<String>>(7)
        .map_err(db_err)?
        .map(|s| serde_json::from_str::<JobOutcome>(&s))
        .transpose()
        .map_err(json_err)?;
    let updated_at = DateTime::parse_from_rfc3339(&row.get::<String>(8).map_err(db_err)?)
        .ok()
        .map(|d| d.with_timezone(&Utc));

    Ok(Job {
        id: JobId(row.get::<String>(0).map_err(db_err)?),
        job_type: row.get::<String>(1).map_err(db_err)?,
        operation: row.get::<String>(2).map_err(db_err)?,
        source: row.get::<String>(3).map_err(db_err)?,
        status,
        progress,
        info: row.get::<String>(6).map_err(db_err)?,
        outcome,
        updated_at,
    })
}

fn page_count(total: u32, page_size: u32) -> u32 {
    total.div_ceil(page_size.max(1)).max(1)
}

#[async_trait]
impl JobApi for LocalStore {
    #[instrument(skip_all, fields(operation = %request.operation))]
    async fn create_job(&self, request: &NewJob) -> Result<Job> {
        let job = Job::from_request(JobId::generate(), request);
        let now = Utc::now().to_rfc3339();

        self.conn
            .execute(
                "INSERT INTO jobs (id, job_type, operation, source, status, progress, info,
                                   created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, 0, '', ?6, ?6)",
                params![
                    job.id.as_str(),
                    job.job_type.as_str(),
                    job.operation.as_str(),
                    job.source.as_str(),
                    job.status.as_str(),
                    now.as_str()
                ],
            )
            .await
            .map_err(db_err)?;

        info!(job_id = %job.id, "job created");
        Ok(job)
    }

    async fn get_job(&self, id: &JobId) -> Result<Job> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, job_type, operation, source, status, progress, info, outcome_json,
                        updated_at
                 FROM jobs WHERE id = ?1",
                params![id.as_str()],
            )
            .await
            .map_err(db_err)?;

        match rows.next().await.map_err(db_err)? {
            Some(row) => job_from_row(&row),
            None => Err(SheetloaderError::job(format!("job '{id}' not found"))),
        }
    }

    async fn ack_job(&self, id: &JobId, progress: u8, info: &str) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let changed = self
            .conn
            .execute(
                "UPDATE jobs SET progress = ?2, info = ?3, updated_at = ?4
                 WHERE id = ?1 AND status NOT IN ('complete', 'failed')",
                params![id.as_str(), i64::from(progress.min(100)), info, now.as_str()],
            )
            .await
            .map_err(db_err)?;

        if changed == 0 {
            return Err(self.rejection(id).await);
        }
        Ok(())
    }

    async fn update_job_status(&self, id: &JobId, status: JobStatus) -> Result<()> {
        self.transition(id, status, None).await
    }

    async fn complete_job(&self, id: &JobId, outcome: &JobOutcome) -> Result<()> {
        self.transition(id, JobStatus::Complete, Some(outcome)).await
    }

    async fn fail_job(&self, id: &JobId, outcome: &JobOutcome) -> Result<()> {
        self.transition(id, JobStatus::Failed, Some(outcome)).await
    }
}

#[async_trait]
impl WorkbookApi for LocalStore {
    async fn get_workbook(&self, id: &str) -> Result<Workbook> {
        let mut rows = self
            .conn
            .query("SELECT id, name FROM workbooks WHERE id = ?1", params![id])
            .await
            .map_err(db_err)?;

        let Some(row) = rows.next().await.map_err(db_err)? else {
            return Err(SheetloaderError::Storage(format!("workbook '{id}' not found")));
        };

        Ok(Workbook {
            id: row.get::<String>(0).map_err(db_err)?,
            name: row.get::<String>(1).map_err(db_err)?,
            sheets: self.load_sheets(id, u32::MAX, 0).await?,
        })
    }

    #[instrument(skip_all, fields(name = %name, sheets = sheets.len()))]
    async fn create_workbook(&self, name: &str, sheets: &[SheetSchema]) -> Result<Workbook> {
        let _guard = self.write_lock.lock().await;
        let id = Uuid::now_v7().to_string();
        let now = Utc::now().to_rfc3339();

        let tx = self.conn.transaction().await.map_err(db_err)?;
        tx.execute(
            "INSERT INTO workbooks (id, name, created_at) VALUES (?1, ?2, ?3)",
            params![id.as_str(), name, now.as_str()],
        )
        .await
        .map_err(db_err)?;

        let mut created = Vec::with_capacity(sheets.len());
        for schema in sheets {
            created.push(insert_sheet(&tx, &id, schema).await?);
        }
        tx.commit().await.map_err(db_err)?;

        info!(workbook_id = %id, "workbook created");
        Ok(Workbook {
            id,
            name: name.to_string(),
            sheets: created,
        })
    }

    async fn list_sheets(&self, workbook_id: &str, page: Pagination) -> Result<Page<Sheet>> {
        let total = self
            .count("SELECT COUNT(*) FROM sheets WHERE workbook_id = ?1", workbook_id)
            .await?;
        let page_size = page.page_size.max(1);
        let offset = page.page.saturating_sub(1).saturating_mul(page_size);

        Ok(Page {
            data: self.load_sheets(workbook_id, page_size, offset).await?,
            page: page.page,
            page_count: page_count(total, page_size),
        })
    }

    async fn create_sheet(&self, workbook_id: &str, schema: &SheetSchema) -> Result<Sheet> {
        let exists = self
            .count("SELECT COUNT(*) FROM workbooks WHERE id = ?1", workbook_id)
            .await?;
        if exists == 0 {
            return Err(SheetloaderError::Storage(format!(
                "workbook '{workbook_id}' not found"
            )));
        }

        let _guard = self.write_lock.lock().await;
        insert_sheet(&self.conn, workbook_id, schema).await
    }

    #[instrument(skip_all, fields(sheet_id = %sheet_id, rows = rows.len()))]
    async fn insert_records(
        &self,
        sheet_id: &str,
        rows: &[RowCapture],
        idempotency_key: &str,
    ) -> Result<usize> {
        let _guard = self.write_lock.lock().await;

        let mut existing = self
            .conn
            .query(
                "SELECT record_count FROM record_batches
                 WHERE sheet_id = ?1 AND idempotency_key = ?2",
                params![sheet_id, idempotency_key],
            )
            .await
            .map_err(db_err)?;
        if let Some(row) = existing.next().await.map_err(db_err)? {
            let count = row.get::<u32>(0).map_err(db_err)? as usize;
            debug!(idempotency_key, count, "batch already applied");
            return Ok(count);
        }

        if !self.sheet_exists(sheet_id).await? {
            return Err(SheetloaderError::Storage(format!(
                "sheet '{sheet_id}' not found"
            )));
        }

        let now = Utc::now().to_rfc3339();
        let tx = self.conn.transaction().await.map_err(db_err)?;
        for values in rows {
            let values_json = serde_json::to_string(values).map_err(json_err)?;
            tx.execute(
                "INSERT INTO records (id, sheet_id, values_json, updated_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    Uuid::now_v7().to_string(),
                    sheet_id,
                    values_json,
                    now.as_str()
                ],
            )
            .await
            .map_err(db_err)?;
        }
        tx.execute(
            "INSERT INTO record_batches (sheet_id, idempotency_key, record_count, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![sheet_id, idempotency_key, rows.len() as i64, now.as_str()],
        )
        .await
        .map_err(db_err)?;
        tx.commit().await.map_err(db_err)?;

        Ok(rows.len())
    }

    async fn update_records(&self, sheet_id: &str, updates: &[RecordUpdate]) -> Result<usize> {
        let _guard = self.write_lock.lock().await;
        let now = Utc::now().to_rfc3339();
        let tx = self.conn.transaction().await.map_err(db_err)?;
        let mut updated = 0;

        for update in updates {
            let mut rows = tx
                .query(
                    "SELECT values_json FROM records WHERE id = ?1 AND sheet_id = ?2",
                    params![update.id.as_str(), sheet_id],
                )
                .await
                .map_err(db_err)?;
            let Some(row) = rows.next().await.map_err(db_err)? else {
                debug!(record_id = %update.id, "skipping update of unknown record");
                continue;
            };

            let mut values: RowCapture =
                serde_json::from_str(&row.get::<String>(0).map_err(db_err)?).map_err(json_err)?;
            values.extend(update.values.clone());
            let values_json = serde_json::to_string(&values).map_err(json_err)?;

            tx.execute(
                "UPDATE records SET values_json = ?2, updated_at = ?3 WHERE id = ?1",
                params![update.id.as_str(), values_json, now.as_str()],
            )
            .await
            .map_err(db_err)?;
            updated += 1;
        }

        tx.commit().await.map_err(db_err)?;
        Ok(updated)
    }

    async fn list_records(&self, sheet_id: &str, page: Pagination) -> Result<Page<Record>> {
        let total = self
            .count("SELECT COUNT(*) FROM records WHERE sheet_id = ?1", sheet_id)
            .await?;
        let page_size = page.page_size.max(1);
        let offset = page.page.saturating_sub(1).saturating_mul(page_size);

        let mut rows = self
            .conn
            .query(
                "SELECT id, values_json FROM records WHERE sheet_id = ?1
                 ORDER BY rowid LIMIT ?2 OFFSET ?3",
                params![sheet_id, i64::from(page_size), i64::from(offset)],
            )
            .await
            .map_err(db_err)?;

        let mut data = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            data.push(Record {
                id: row.get::<String>(0).map_err(db_err)?,
                values: serde_json::from_str(&row.get::<String>(1).map_err(db_err)?)
                    .map_err(json_err)?,
            });
        }

        Ok(Page {
            data,
            page: page.page,
            page_count: page_count(total, page_size),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sheetloader_remote::list_all_sheets;
    use sheetloader_shared::Cell;

    async fn test_store() -> LocalStore {
        let tmp = std::env::temp_dir().join(format!("sl_test_{}.db", Uuid::now_v7()));
        LocalStore::open(&tmp).await.expect("open test db")
    }

    fn schema(name: &str) -> SheetSchema {
        SheetSchema {
            name: name.into(),
            slug: name.to_lowercase(),
            fields: vec![FieldSchema::string("email", "Email")],
        }
    }

    fn row(email: &str) -> RowCapture {
        let mut row = RowCapture::new();
        row.insert("email".into(), Cell::new(email));
        row
    }

    fn new_job() -> NewJob {
        NewJob {
            job_type: "file".into(),
            operation: "extract".into(),
            source: "contacts.csv".into(),
            status: JobStatus::Created,
        }
    }

    #[tokio::test]
    async fn open_creates_schema() {
        let store = test_store().await;
        assert_eq!(store.schema_version().await, 2);
    }

    #[tokio::test]
    async fn idempotent_migration() {
        let tmp = std::env::temp_dir().join(format!("sl_test_{}.db", Uuid::now_v7()));
        let first = LocalStore::open(&tmp).await.expect("first open");
        drop(first);
        let second = LocalStore::open(&tmp).await.expect("second open");
        assert_eq!(second.schema_version().await, 2);
    }

    #[tokio::test]
    async fn job_lifecycle() {
        let store = test_store().await;
        let job = store.create_job(&new_job()).await.expect("create job");
        assert_eq!(job.status, JobStatus::Created);

        store
            .update_job_status(&job.id, JobStatus::Executing)
            .await
            .expect("start");
        store.ack_job(&job.id, 40, "parsing").await.expect("ack");

        let loaded = store.get_job(&job.id).await.expect("get job");
        assert_eq!(loaded.status, JobStatus::Executing);
        assert_eq!(loaded.progress, 40);
        assert_eq!(loaded.info, "parsing");

        let outcome = JobOutcome {
            records_written: Some(3),
            ..JobOutcome::message("done")
        };
        store.complete_job(&job.id, &outcome).await.expect("complete");

        let loaded = store.get_job(&job.id).await.unwrap();
        assert_eq!(loaded.status, JobStatus::Complete);
        assert_eq!(loaded.outcome, Some(outcome));
    }

    #[tokio::test]
    async fn terminal_job_rejects_changes() {
        let store = test_store().await;
        let job = store.create_job(&new_job()).await.unwrap();
        store
            .fail_job(&job.id, &JobOutcome::message("parse failed: bad input"))
            .await
            .unwrap();

        let err = store
            .complete_job(&job.id, &JobOutcome::message("done"))
            .await
            .unwrap_err();
        assert!(matches!(err, SheetloaderError::Job { .. }));
        assert!(err.to_string().contains("already failed"));

        assert!(store.ack_job(&job.id, 90, "late").await.is_err());
        let loaded = store.get_job(&job.id).await.unwrap();
        assert_eq!(loaded.status, JobStatus::Failed);
        assert_eq!(
            loaded.outcome.map(|o| o.message),
            Some("parse failed: bad input".to_string())
        );
    }

    #[tokio::test]
    async fn unknown_job_is_error() {
        let store = test_store().await;
        let err = store.get_job(&JobId::from("missing")).await.unwrap_err();
        assert!(err.to_string().contains("not found"));
        assert!(store.ack_job(&JobId::from("missing"), 1, "x").await.is_err());
    }

    #[tokio::test]
    async fn workbook_sheets_keep_order_and_page() {
        let store = test_store().await;
        let workbook = store
            .create_workbook("contacts", &[schema("People"), schema("Orders")])
            .await
            .expect("create workbook");
        store
            .create_sheet(&workbook.id, &schema("Notes"))
            .await
            .expect("create sheet");

        let page = store
            .list_sheets(&workbook.id, Pagination::first(2))
            .await
            .unwrap();
        assert_eq!(page.page_count, 2);
        assert_eq!(page.data.len(), 2);

        let sheets = list_all_sheets(&store, &workbook.id, 2).await.unwrap();
        let names: Vec<_> = sheets.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["People", "Orders", "Notes"]);
        assert_eq!(sheets[0].fields, vec![FieldSchema::string("email", "Email")]);

        let loaded = store.get_workbook(&workbook.id).await.unwrap();
        assert_eq!(loaded.sheets.len(), 3);
    }

    #[tokio::test]
    async fn duplicate_sheet_name_rejected() {
        let store = test_store().await;
        let workbook = store.create_workbook("wb", &[schema("People")]).await.unwrap();
        let err = store
            .create_sheet(&workbook.id, &schema("People"))
            .await
            .unwrap_err();
        assert!(matches!(err, SheetloaderError::Storage(_)));

        assert!(store.create_sheet("missing", &schema("X")).await.is_err());
    }

    #[tokio::test]
    async fn replayed_batch_inserts_nothing() {
        let store = test_store().await;
        let workbook = store.create_workbook("wb", &[schema("People")]).await.unwrap();
        let sheet_id = workbook.sheets[0].id.clone();
        let rows = vec![row("a@x.io"), row("b@x.io")];

        assert_eq!(store.insert_records(&sheet_id, &rows, "k1").await.unwrap(), 2);
        assert_eq!(store.insert_records(&sheet_id, &rows, "k1").await.unwrap(), 2);
        assert_eq!(store.insert_records(&sheet_id, &rows[..1], "k2").await.unwrap(), 1);

        let page = store
            .list_records(&sheet_id, Pagination::first(100))
            .await
            .unwrap();
        assert_eq!(page.data.len(), 3);
        assert_eq!(page.data[0].values["email"], Cell::new("a@x.io"));
        assert_eq!(page.data[2].values["email"], Cell::new("a@x.io"));
    }

    #[tokio::test]
    async fn insert_into_unknown_sheet_fails() {
        let store = test_store().await;
        let err = store
            .insert_records("missing", &[row("a@x.io")], "k")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[tokio::test]
    async fn update_merges_values() {
        let store = test_store().await;
        let workbook = store.create_workbook("wb", &[schema("People")]).await.unwrap();
        let sheet_id = workbook.sheets[0].id.clone();
        store
            .insert_records(&sheet_id, &[row("a@x.io")], "k1")
            .await
            .unwrap();

        let record = store
            .list_records(&sheet_id, Pagination::first(10))
            .await
            .unwrap()
            .data
            .remove(0);

        let mut values = RowCapture::new();
        values.insert("name".into(), Cell::new("Ada"));
        let updated = store
            .update_records(
                &sheet_id,
                &[
                    RecordUpdate {
                        id: record.id.clone(),
                        values,
                    },
                    RecordUpdate {
                        id: "missing".into(),
                        values: RowCapture::new(),
                    },
                ],
            )
            .await
            .unwrap();
        assert_eq!(updated, 1);

        let record = store
            .list_records(&sheet_id, Pagination::first(10))
            .await
            .unwrap()
            .data
            .remove(0);
        assert_eq!(record.values["email"], Cell::new("a@x.io"));
        assert_eq!(record.values["name"], Cell::new("Ada"));
    }
}
