//! Capture normalization: sanitized header keys, aligned rows, sheet schemas.
//!
//! Key assignment depends only on the order headers first appear, so the
//! same raw capture always normalizes to the same keys.

use std::collections::HashSet;

use sheetloader_shared::{
    Cell, FieldSchema, Result, RowCapture, SheetCapture, SheetSchema, SheetloaderError,
    WorkbookCapture,
};
use tracing::debug;

/// Key used when a label sanitizes to nothing.
const EMPTY_KEY: &str = "empty";

/// A sheet ready to be written: every row carries exactly the schema's keys.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedSheet {
    /// Sheet name as it appeared in the source.
    pub name: String,
    pub schema: SheetSchema,
    pub rows: Vec<RowCapture>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalizedCapture {
    pub sheets: Vec<NormalizedSheet>,
}

impl NormalizedCapture {
    pub fn is_empty(&self) -> bool {
        self.sheets.is_empty()
    }

    pub fn total_rows(&self) -> usize {
        self.sheets.iter().map(|s| s.rows.len()).sum()
    }

    pub fn schemas(&self) -> Vec<SheetSchema> {
        self.sheets.iter().map(|s| s.schema.clone()).collect()
    }
}

fn symbol_word(c: char) -> Option<&'static str> {
    match c {
        '$' => Some("DOLLAR"),
        '%' => Some("PERCENT"),
        '#' => Some("NUM"),
        '&' => Some("AND"),
        '@' => Some("AT"),
        '+' => Some("PLUS"),
        _ => None,
    }
}

/// Turn a raw label into a field identifier.
///
/// A few symbols are spelled out (`$` → `DOLLAR`); each run of any other
/// character outside `[alphanumeric _]` becomes a single `_`.
///
/// ```
/// use sheetloader_core::sanitize_key;
/// assert_eq!(sanitize_key("Amount ($)"), "Amount_DOLLAR_");
/// assert_eq!(sanitize_key("First Name"), "First_Name");
/// assert_eq!(sanitize_key("   "), "empty");
/// ```
pub fn sanitize_key(raw: &str) -> String {
    let mut key = String::with_capacity(raw.len());
    let mut in_run = false;

    for c in raw.trim().chars() {
        if c.is_alphanumeric() || c == '_' {
            key.push(c);
            in_run = false;
        } else if let Some(word) = symbol_word(c) {
            key.push_str(word);
            in_run = false;
        } else if !in_run {
            key.push('_');
            in_run = true;
        }
    }

    if key.is_empty() {
        EMPTY_KEY.to_string()
    } else {
        key
    }
}

/// Claim `base`, or `base_1`, `base_2`, … if it is already taken.
fn claim_unique(base: String, used: &mut HashSet<String>) -> String {
    if used.insert(base.clone()) {
        return base;
    }
    let mut n = 1;
    loop {
        let candidate = format!("{base}_{n}");
        if used.insert(candidate.clone()) {
            return candidate;
        }
        n += 1;
    }
}

/// Normalize a whole workbook capture. Sheet order is preserved and sheet
/// slugs are unique across the workbook.
pub fn normalize(capture: WorkbookCapture) -> Result<NormalizedCapture> {
    let mut slugs = HashSet::new();
    let mut sheets = Vec::with_capacity(capture.len());

    for (name, sheet) in capture.into_sheets() {
        let slug = claim_unique(sanitize_key(&name).to_lowercase(), &mut slugs);
        sheets.push(normalize_sheet(name, slug, sheet)?);
    }

    Ok(NormalizedCapture { sheets })
}

fn normalize_sheet(name: String, slug: String, sheet: SheetCapture) -> Result<NormalizedSheet> {
    let mut seen = HashSet::with_capacity(sheet.headers.len());
    if let Some(dup) = sheet.headers.iter().find(|h| !seen.insert(h.as_str())) {
        return Err(SheetloaderError::normalize(format!(
            "sheet '{name}' has duplicate header '{dup}'"
        )));
    }

    let mut used = HashSet::with_capacity(sheet.headers.len());
    let fields: Vec<FieldSchema> = sheet
        .headers
        .iter()
        .map(|label| FieldSchema::string(claim_unique(sanitize_key(label), &mut used), label))
        .collect();

    let mut rows = Vec::with_capacity(sheet.data.len());
    for (index, mut raw) in sheet.data.into_iter().enumerate() {
        let mut row = RowCapture::with_capacity(fields.len());
        for field in &fields {
            let cell = raw.remove(&field.label).unwrap_or_else(Cell::null);
            row.insert(field.key.clone(), cell);
        }
        if let Some(stray) = raw.keys().next() {
            return Err(SheetloaderError::normalize(format!(
                "sheet '{name}' row {} has key '{stray}' that is not a header",
                index + 1
            )));
        }
        rows.push(row);
    }

    debug!(sheet = %name, fields = fields.len(), rows = rows.len(), "sheet normalized");
    Ok(NormalizedSheet {
        schema: SheetSchema {
            name: name.clone(),
            slug,
            fields,
        },
        name,
        rows,
    })
}
