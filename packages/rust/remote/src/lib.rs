//! Remote collaborator interfaces for sheetloader.
//!
//! The extraction pipeline never talks to a concrete backend directly. It is
//! handed trait objects for the three collaborators it needs:
//!
//! - [`JobApi`]: create jobs and report progress and terminal outcomes
//! - [`FileApi`]: resolve and download uploaded files
//! - [`WorkbookApi`]: workbooks, sheets and record writes
//!
//! [`HttpClient`] implements all three against the REST API; the storage
//! crate provides a local implementation for offline runs.

mod http;
mod retry;

use async_trait::async_trait;
use sheetloader_shared::{
    FileRef, Job, JobId, JobOutcome, JobStatus, NewJob, Page, Pagination, Record, RecordUpdate,
    Result, RowCapture, Sheet, SheetSchema, Workbook,
};

pub use http::HttpClient;
pub use retry::RetryPolicy;

/// Asynchronous job bookkeeping.
#[async_trait]
pub trait JobApi: Send + Sync {
    async fn create_job(&self, request: &NewJob) -> Result<Job>;

    async fn get_job(&self, id: &JobId) -> Result<Job>;

    /// Report progress without changing status.
    async fn ack_job(&self, id: &JobId, progress: u8, info: &str) -> Result<()>;

    async fn update_job_status(&self, id: &JobId, status: JobStatus) -> Result<()>;

    async fn complete_job(&self, id: &JobId, outcome: &JobOutcome) -> Result<()>;

    async fn fail_job(&self, id: &JobId, outcome: &JobOutcome) -> Result<()>;
}

/// Uploaded file metadata and content.
#[async_trait]
pub trait FileApi: Send + Sync {
    async fn get_file(&self, id: &str) -> Result<FileRef>;

    async fn download_file(&self, id: &str) -> Result<Vec<u8>>;
}

/// Destination workbook store.
#[async_trait]
pub trait WorkbookApi: Send + Sync {
    async fn get_workbook(&self, id: &str) -> Result<Workbook>;

    async fn create_workbook(&self, name: &str, sheets: &[SheetSchema]) -> Result<Workbook>;

    async fn list_sheets(&self, workbook_id: &str, page: Pagination) -> Result<Page<Sheet>>;

    async fn create_sheet(&self, workbook_id: &str, schema: &SheetSchema) -> Result<Sheet>;

    /// Insert one batch of records. Replaying the same `idempotency_key`
    /// must not insert the batch twice on stores that honour it.
    async fn insert_records(
        &self,
        sheet_id: &str,
        rows: &[RowCapture],
        idempotency_key: &str,
    ) -> Result<usize>;

    async fn update_records(&self, sheet_id: &str, updates: &[RecordUpdate]) -> Result<usize>;

    async fn list_records(&self, sheet_id: &str, page: Pagination) -> Result<Page<Record>>;
}

/// Collect every sheet of a workbook, walking pages until the last one.
pub async fn list_all_sheets(
    api: &dyn WorkbookApi,
    workbook_id: &str,
    page_size: u32,
) -> Result<Vec<Sheet>> {
    let mut sheets = Vec::new();
    let mut page = Pagination::first(page_size.max(1));

    loop {
        let result = api.list_sheets(workbook_id, page).await?;
        let last = result.is_last() || result.data.is_empty();
        sheets.extend(result.data);
        if last {
            break;
        }
        page = page.next();
    }

    Ok(sheets)
}
