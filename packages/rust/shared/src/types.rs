//! Core domain types: captures, remote workbook entities, and jobs.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::{Result, SheetloaderError};

// ---------------------------------------------------------------------------
// FileRef / RawBuffer
// ---------------------------------------------------------------------------

/// Reference to an uploaded source file. Immutable once a job starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRef {
    pub id: String,
    pub name: String,
    /// Lower-cased extension without the leading dot (may be empty).
    #[serde(default)]
    pub ext: String,
}

impl FileRef {
    /// Build a file reference, deriving the extension from `name`.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        let name = name.into();
        let ext = extension_of(&name);
        Self {
            id: id.into(),
            name,
            ext,
        }
    }

    /// Fill in `ext` from the file name when the remote omitted it.
    pub fn with_derived_ext(mut self) -> Self {
        if self.ext.is_empty() {
            self.ext = extension_of(&self.name);
        } else {
            self.ext = self.ext.trim_start_matches('.').to_lowercase();
        }
        self
    }

    /// File name without its extension.
    pub fn stem(&self) -> &str {
        match self.name.rsplit_once('.') {
            Some((stem, _)) if !stem.is_empty() => stem,
            _ => &self.name,
        }
    }
}

fn extension_of(name: &str) -> String {
    std::path::Path::new(name)
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default()
}

/// Raw file content, owned by the orchestrator for one extraction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawBuffer(Vec<u8>);

impl RawBuffer {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// SHA-256 of the content, hex-encoded.
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(&self.0);
        format!("{:x}", hasher.finalize())
    }
}

impl From<Vec<u8>> for RawBuffer {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl From<&str> for RawBuffer {
    fn from(s: &str) -> Self {
        Self(s.as_bytes().to_vec())
    }
}

// ---------------------------------------------------------------------------
// Captures
// ---------------------------------------------------------------------------

/// A primitive cell value.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CellValue {
    #[default]
    Null,
    Bool(bool),
    Number(f64),
    Text(String),
}

impl CellValue {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

impl From<&str> for CellValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for CellValue {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<f64> for CellValue {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl From<bool> for CellValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

/// A single cell as stored on the remote: `{ "value": ... }`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Cell {
    pub value: CellValue,
}

impl Cell {
    pub fn new(value: impl Into<CellValue>) -> Self {
        Self {
            value: value.into(),
        }
    }

    pub fn null() -> Self {
        Self::default()
    }
}

/// One row: header key → cell. Missing keys mean null.
pub type RowCapture = HashMap<String, Cell>;

/// Parsed content of a single sheet.
///
/// Every row's key set is a subset of `headers`; `headers` are unique.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SheetCapture {
    pub headers: Vec<String>,
    pub data: Vec<RowCapture>,
}

/// Parsed content of a whole file, sheets kept in source order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkbookCapture {
    sheets: Vec<(String, SheetCapture)>,
}

impl WorkbookCapture {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a sheet. Sheet names must be unique within the workbook.
    pub fn insert(&mut self, name: impl Into<String>, sheet: SheetCapture) -> Result<()> {
        let name = name.into();
        if self.get(&name).is_some() {
            return Err(SheetloaderError::validation(format!(
                "duplicate sheet name '{name}'"
            )));
        }
        self.sheets.push((name, sheet));
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&SheetCapture> {
        self.sheets
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, sheet)| sheet)
    }

    pub fn len(&self) -> usize {
        self.sheets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sheets.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &SheetCapture)> {
        self.sheets.iter().map(|(n, s)| (n.as_str(), s))
    }

    pub fn into_sheets(self) -> Vec<(String, SheetCapture)> {
        self.sheets
    }
}

// ---------------------------------------------------------------------------
// Remote workbook entities
// ---------------------------------------------------------------------------

/// A field in a sheet schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSchema {
    /// Sanitized identifier used as the record key.
    pub key: String,
    /// Original header text.
    pub label: String,
    #[serde(rename = "type", default = "default_field_type")]
    pub field_type: String,
}

impl FieldSchema {
    pub fn string(key: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            label: label.into(),
            field_type: default_field_type(),
        }
    }
}

fn default_field_type() -> String {
    "string".into()
}

/// Schema used to create a destination sheet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SheetSchema {
    pub name: String,
    pub slug: String,
    pub fields: Vec<FieldSchema>,
}

/// A sheet that exists on the remote store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sheet {
    pub id: String,
    pub workbook_id: String,
    pub name: String,
    #[serde(default)]
    pub slug: String,
    #[serde(default)]
    pub fields: Vec<FieldSchema>,
}

/// A workbook that exists on the remote store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workbook {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub sheets: Vec<Sheet>,
}

/// A committed record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    pub values: RowCapture,
}

/// Partial update of an existing record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordUpdate {
    pub id: String,
    pub values: RowCapture,
}

/// Page request (1-based page number).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    pub page: u32,
    pub page_size: u32,
}

impl Pagination {
    pub fn first(page_size: u32) -> Self {
        Self { page: 1, page_size }
    }

    pub fn next(self) -> Self {
        Self {
            page: self.page + 1,
            ..self
        }
    }
}

/// One page of a paginated listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub data: Vec<T>,
    pub page: u32,
    pub page_count: u32,
}

impl<T> Page<T> {
    pub fn is_last(&self) -> bool {
        self.page >= self.page_count
    }
}

// ---------------------------------------------------------------------------
// Jobs
// ---------------------------------------------------------------------------

/// Job identifier, assigned by the job store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Generate a new time-sortable identifier (used by local stores).
    pub fn generate() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Job lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Created,
    Executing,
    Complete,
    Failed,
}

impl JobStatus {
    pub const TERMINAL: [JobStatus; 2] = [JobStatus::Complete, JobStatus::Failed];

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Executing => "executing",
            Self::Complete => "complete",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobStatus {
    type Err = SheetloaderError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "created" => Ok(Self::Created),
            "executing" => Ok(Self::Executing),
            "complete" => Ok(Self::Complete),
            "failed" => Ok(Self::Failed),
            other => Err(SheetloaderError::validation(format!(
                "unknown job status '{other}'"
            ))),
        }
    }
}

/// Per-sheet result recorded in a job outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SheetOutcome {
    pub name: String,
    pub sheet_id: String,
    pub records: usize,
}

/// Terminal outcome attached to a completed or failed job.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct JobOutcome {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub records_written: Option<usize>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sheets: Vec<SheetOutcome>,
}

impl JobOutcome {
    pub fn message(msg: impl Into<String>) -> Self {
        Self {
            message: msg.into(),
            ..Self::default()
        }
    }
}

/// Request body for creating a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewJob {
    #[serde(rename = "type")]
    pub job_type: String,
    pub operation: String,
    pub source: String,
    pub status: JobStatus,
}

/// A tracked unit of asynchronous work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    #[serde(rename = "type")]
    pub job_type: String,
    pub operation: String,
    pub source: String,
    pub status: JobStatus,
    /// 0–100.
    #[serde(default)]
    pub progress: u8,
    #[serde(default)]
    pub info: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<JobOutcome>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Materialize a freshly created job from its request.
    pub fn from_request(id: JobId, req: &NewJob) -> Self {
        Self {
            id,
            job_type: req.job_type.clone(),
            operation: req.operation.clone(),
            source: req.source.clone(),
            status: req.status,
            progress: 0,
            info: String::new(),
            outcome: None,
            updated_at: Some(Utc::now()),
        }
    }
}
