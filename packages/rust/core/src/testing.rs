//! In-memory collaborators for unit tests.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use sheetloader_remote::{FileApi, JobApi, WorkbookApi};
use sheetloader_shared::{
    FileRef, Job, JobId, JobOutcome, JobStatus, NewJob, Page, Pagination, Record, RecordUpdate,
    Result, RowCapture, Sheet, SheetSchema, SheetloaderError, Workbook,
};

#[derive(Default)]
pub(crate) struct FakeFiles {
    pub files: HashMap<String, (String, Vec<u8>)>,
}

impl FakeFiles {
    pub fn with(mut self, id: &str, name: &str, content: impl Into<Vec<u8>>) -> Self {
        self.files
            .insert(id.to_string(), (name.to_string(), content.into()));
        self
    }
}

#[async_trait]
impl FileApi for FakeFiles {
    async fn get_file(&self, id: &str) -> Result<FileRef> {
        self.files
            .get(id)
            .map(|(name, _)| FileRef::new(id, name.as_str()))
            .ok_or_else(|| SheetloaderError::Remote {
                status: 404,
                message: format!("file {id} not found"),
            })
    }

    async fn download_file(&self, id: &str) -> Result<Vec<u8>> {
        self.files
            .get(id)
            .map(|(_, bytes)| bytes.clone())
            .ok_or_else(|| SheetloaderError::fetch(format!("file {id} missing")))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum JobCall {
    Create,
    Ack(u8, String),
    Status(JobStatus),
    Complete(JobOutcome),
    Fail(JobOutcome),
}

/// Records every job call in order.
#[derive(Default)]
pub(crate) struct RecordingJobs {
    pub calls: Mutex<Vec<JobCall>>,
    pub reject_create: bool,
    pub reject_complete: bool,
    pub reject_fail: bool,
}

impl RecordingJobs {
    pub fn calls(&self) -> Vec<JobCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn terminal_calls(&self) -> Vec<JobCall> {
        self.calls()
            .into_iter()
            .filter(|c| matches!(c, JobCall::Complete(_) | JobCall::Fail(_)))
            .collect()
    }

    pub fn acks(&self) -> Vec<u8> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                JobCall::Ack(progress, _) => Some(progress),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: JobCall) {
        self.calls.lock().unwrap().push(call);
    }
}

fn rejected(what: &str) -> SheetloaderError {
    SheetloaderError::Remote {
        status: 409,
        message: format!("{what} rejected"),
    }
}

#[async_trait]
impl JobApi for RecordingJobs {
    async fn create_job(&self, request: &NewJob) -> Result<Job> {
        if self.reject_create {
            return Err(rejected("create"));
        }
        self.record(JobCall::Create);
        Ok(Job::from_request(JobId::from("jb_1"), request))
    }

    async fn get_job(&self, id: &JobId) -> Result<Job> {
        Err(SheetloaderError::job(format!("job '{id}' not tracked")))
    }

    async fn ack_job(&self, _id: &JobId, progress: u8, info: &str) -> Result<()> {
        self.record(JobCall::Ack(progress, info.to_string()));
        Ok(())
    }

    async fn update_job_status(&self, _id: &JobId, status: JobStatus) -> Result<()> {
        self.record(JobCall::Status(status));
        Ok(())
    }

    async fn complete_job(&self, _id: &JobId, outcome: &JobOutcome) -> Result<()> {
        if self.reject_complete {
            return Err(rejected("complete"));
        }
        self.record(JobCall::Complete(outcome.clone()));
        Ok(())
    }

    async fn fail_job(&self, _id: &JobId, outcome: &JobOutcome) -> Result<()> {
        self.record(JobCall::Fail(outcome.clone()));
        if self.reject_fail {
            return Err(rejected("fail"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub(crate) struct Insert {
    pub sheet_id: String,
    pub rows: Vec<RowCapture>,
    pub key: String,
}

/// Workbook store that keeps everything in memory.
#[derive(Default)]
pub(crate) struct FakeWorkbooks {
    pub workbooks: Mutex<Vec<Workbook>>,
    pub sheets: Mutex<Vec<Sheet>>,
    pub inserts: Mutex<Vec<Insert>>,
    /// 1-based insert call that fails with a server error.
    pub fail_on_insert: Option<usize>,
    pub insert_delay: Option<Duration>,
    pub insert_calls: AtomicUsize,
    pub in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

impl FakeWorkbooks {
    pub fn with_workbook(self, id: &str, sheet_names: &[&str]) -> Self {
        {
            let mut sheets = self.sheets.lock().unwrap();
            for name in sheet_names {
                let id_n = sheets.len() + 1;
                sheets.push(Sheet {
                    id: format!("sh_{id_n}"),
                    workbook_id: id.to_string(),
                    name: name.to_string(),
                    slug: name.to_lowercase(),
                    fields: Vec::new(),
                });
            }
            self.workbooks.lock().unwrap().push(Workbook {
                id: id.to_string(),
                name: id.to_string(),
                sheets: Vec::new(),
            });
        }
        self
    }

    pub fn inserts(&self) -> Vec<Insert> {
        self.inserts.lock().unwrap().clone()
    }

    pub fn insert_calls(&self) -> usize {
        self.insert_calls.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn workbooks(&self) -> Vec<Workbook> {
        self.workbooks.lock().unwrap().clone()
    }

    pub fn sheets(&self) -> Vec<Sheet> {
        self.sheets.lock().unwrap().clone()
    }

    fn add_sheet(&self, workbook_id: &str, schema: &SheetSchema) -> Sheet {
        let mut sheets = self.sheets.lock().unwrap();
        let sheet = Sheet {
            id: format!("sh_{}", sheets.len() + 1),
            workbook_id: workbook_id.to_string(),
            name: schema.name.clone(),
            slug: schema.slug.clone(),
            fields: schema.fields.clone(),
        };
        sheets.push(sheet.clone());
        sheet
    }
}

#[async_trait]
impl WorkbookApi for FakeWorkbooks {
    async fn get_workbook(&self, id: &str) -> Result<Workbook> {
        self.workbooks
            .lock()
            .unwrap()
            .iter()
            .find(|w| w.id == id)
            .cloned()
            .ok_or_else(|| SheetloaderError::Remote {
                status: 404,
                message: format!("workbook {id} not found"),
            })
    }

    async fn create_workbook(&self, name: &str, sheets: &[SheetSchema]) -> Result<Workbook> {
        let id = format!("wb_{}", self.workbooks.lock().unwrap().len() + 1);
        let created: Vec<Sheet> = sheets.iter().map(|s| self.add_sheet(&id, s)).collect();
        let workbook = Workbook {
            id,
            name: name.to_string(),
            sheets: created,
        };
        self.workbooks.lock().unwrap().push(workbook.clone());
        Ok(workbook)
    }

    async fn list_sheets(&self, workbook_id: &str, page: Pagination) -> Result<Page<Sheet>> {
        let all: Vec<Sheet> = self
            .sheets()
            .into_iter()
            .filter(|s| s.workbook_id == workbook_id)
            .collect();
        let size = page.page_size.max(1) as usize;
        let start = (page.page.saturating_sub(1) as usize) * size;
        Ok(Page {
            data: all.iter().skip(start).take(size).cloned().collect(),
            page: page.page,
            page_count: all.len().div_ceil(size).max(1) as u32,
        })
    }

    async fn create_sheet(&self, workbook_id: &str, schema: &SheetSchema) -> Result<Sheet> {
        Ok(self.add_sheet(workbook_id, schema))
    }

    async fn insert_records(
        &self,
        sheet_id: &str,
        rows: &[RowCapture],
        idempotency_key: &str,
    ) -> Result<usize> {
        let call = self.insert_calls.fetch_add(1, Ordering::SeqCst) + 1;
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if let Some(delay) = self.insert_delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.fail_on_insert == Some(call) {
            return Err(SheetloaderError::Remote {
                status: 500,
                message: "insert exploded".into(),
            });
        }
        self.inserts.lock().unwrap().push(Insert {
            sheet_id: sheet_id.to_string(),
            rows: rows.to_vec(),
            key: idempotency_key.to_string(),
        });
        Ok(rows.len())
    }

    async fn update_records(&self, _sheet_id: &str, updates: &[RecordUpdate]) -> Result<usize> {
        Ok(updates.len())
    }

    async fn list_records(&self, sheet_id: &str, page: Pagination) -> Result<Page<Record>> {
        let data: Vec<Record> = self
            .inserts()
            .into_iter()
            .filter(|i| i.sheet_id == sheet_id)
            .flat_map(|i| i.rows)
            .enumerate()
            .map(|(n, values)| Record {
                id: format!("rec_{n}"),
                values,
            })
            .collect();
        Ok(Page {
            data,
            page: page.page,
            page_count: 1,
        })
    }
}
