//! REST implementation of the collaborator traits.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderValue, RETRY_AFTER};
use reqwest::{Client, Method, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sheetloader_shared::{
    FileRef, Job, JobId, JobOutcome, JobStatus, NewJob, Page, Pagination, Record, RecordUpdate,
    RemoteConfig, Result, RowCapture, Sheet, SheetSchema, SheetloaderError, Workbook,
};
use tracing::{debug, instrument, warn};
use url::Url;

use crate::retry::RetryPolicy;
use crate::{FileApi, JobApi, WorkbookApi};

/// Maximum number of redirects to follow.
const MAX_REDIRECTS: usize = 3;

/// Longest error body excerpt kept in error messages.
const MAX_ERROR_BODY: usize = 200;

const IDEMPOTENCY_KEY: &str = "Idempotency-Key";

const USER_AGENT: &str = concat!("sheetloader/", env!("CARGO_PKG_VERSION"));

/// `{ "data": ... }` response envelope.
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: T,
}

/// Paged listing envelope.
#[derive(Debug, Deserialize)]
struct PagedEnvelope<T> {
    data: Vec<T>,
    pagination: PageInfo,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PageInfo {
    current_page: u32,
    page_count: u32,
}

/// Result of a record insert or update.
#[derive(Debug, Deserialize)]
struct WriteSummary {
    count: usize,
}

#[derive(Debug, Serialize)]
struct NewWorkbook<'a> {
    name: &'a str,
    sheets: &'a [SheetSchema],
}

/// HTTP client for the remote job, file and workbook API.
///
/// Built once per process and passed by reference to every component that
/// needs it. Every call except file downloads goes through the retry policy.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
    base_url: Url,
    token: String,
    retry: RetryPolicy,
}

impl HttpClient {
    pub fn new(config: &RemoteConfig, token: impl Into<String>, retry: RetryPolicy) -> Result<Self> {
        let mut base_url = Url::parse(&config.base_url).map_err(|e| {
            SheetloaderError::config(format!("invalid remote.base_url '{}': {e}", config.base_url))
        })?;
        if base_url.cannot_be_a_base() {
            return Err(SheetloaderError::config(format!(
                "remote.base_url '{}' cannot be used as a base URL",
                config.base_url
            )));
        }
        // Segments are appended later; drop a trailing empty segment.
        if let Ok(mut segments) = base_url.path_segments_mut() {
            segments.pop_if_empty();
        }

        let client = Client::builder()
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| SheetloaderError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url,
            token: token.into(),
            retry,
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.extend(segments);
        }
        url
    }

    fn paged_endpoint(&self, segments: &[&str], page: Pagination) -> Url {
        let mut url = self.endpoint(segments);
        url.query_pairs_mut()
            .append_pair("page", &page.page.to_string())
            .append_pair("pageSize", &page.page_size.to_string());
        url
    }

    /// Send one request and turn non-2xx responses into errors.
    async fn send_once(
        &self,
        method: Method,
        url: Url,
        body: Option<&serde_json::Value>,
        idempotency_key: Option<&str>,
    ) -> Result<Response> {
        let mut request = self
            .client
            .request(method, url.clone())
            .bearer_auth(&self.token);
        if let Some(body) = body {
            request = request.json(body);
        }
        if let Some(key) = idempotency_key {
            request = request.header(IDEMPOTENCY_KEY, key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| SheetloaderError::Network(format!("{url}: {e}")))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let retry_after = response.headers().get(RETRY_AFTER).and_then(parse_retry_after);
        let text = response.text().await.unwrap_or_default();
        let message = error_message(&text, status);

        if status == StatusCode::TOO_MANY_REQUESTS {
            Err(SheetloaderError::RateLimited {
                retry_after,
                message,
            })
        } else {
            Err(SheetloaderError::Remote {
                status: status.as_u16(),
                message,
            })
        }
    }

    /// Send with retries on transient failures.
    async fn send(
        &self,
        op: &str,
        method: Method,
        url: Url,
        body: Option<serde_json::Value>,
        idempotency_key: Option<&str>,
    ) -> Result<Response> {
        debug!(op, %method, %url, "remote call");
        self.retry
            .retry(op, SheetloaderError::is_transient, || {
                self.send_once(method.clone(), url.clone(), body.as_ref(), idempotency_key)
            })
            .await
    }

    async fn data<T: DeserializeOwned>(
        &self,
        op: &str,
        method: Method,
        url: Url,
        body: Option<serde_json::Value>,
    ) -> Result<T> {
        let response = self.send(op, method, url, body, None).await?;
        decode::<Envelope<T>>(op, response).await.map(|e| e.data)
    }

    /// POST a terminal transition (`complete` or `fail`).
    ///
    /// The call carries an idempotency key derived from the job and action.
    /// When it still errors, possibly because an earlier attempt landed but
    /// its response was lost, the job is read back and a job already in
    /// `target` counts as accepted.
    async fn finish_job(
        &self,
        op: &str,
        id: &JobId,
        action: &str,
        target: JobStatus,
        outcome: &JobOutcome,
    ) -> Result<()> {
        let url = self.endpoint(&["jobs", id.as_str(), action]);
        let body = json!({ "outcome": to_body(outcome)? });
        let key = format!("{id}:{action}");

        let err = match self
            .send(op, Method::POST, url, Some(body), Some(key.as_str()))
            .await
        {
            Ok(_) => return Ok(()),
            Err(e) => e,
        };
        match self.get_job(id).await {
            Ok(job) if job.status == target => {
                warn!(
                    op,
                    job_id = %id,
                    status = %job.status,
                    error = %err,
                    "job already in target state, treating call as accepted"
                );
                Ok(())
            }
            _ => Err(err),
        }
    }

    async fn page<T: DeserializeOwned>(&self, op: &str, url: Url) -> Result<Page<T>> {
        let response = self.send(op, Method::GET, url, None, None).await?;
        let envelope: PagedEnvelope<T> = decode(op, response).await?;
        Ok(Page {
            data: envelope.data,
            page: envelope.pagination.current_page,
            page_count: envelope.pagination.page_count,
        })
    }
}

async fn decode<T: DeserializeOwned>(op: &str, response: Response) -> Result<T> {
    let bytes = response
        .bytes()
        .await
        .map_err(|e| SheetloaderError::Network(format!("{op}: failed to read body: {e}")))?;
    serde_json::from_slice(&bytes).map_err(|e| SheetloaderError::Remote {
        status: 200,
        message: format!("{op}: unexpected response body: {e}"),
    })
}

fn to_body<T: Serialize>(value: &T) -> Result<serde_json::Value> {
    serde_json::to_value(value)
        .map_err(|e| SheetloaderError::validation(format!("failed to encode request: {e}")))
}

/// `Retry-After` in delta-seconds form. HTTP-date values are ignored.
fn parse_retry_after(value: &HeaderValue) -> Option<Duration> {
    value
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

/// Pull a readable message out of an error body.
fn error_message(body: &str, status: StatusCode) -> String {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        let found = value
            .get("message")
            .or_else(|| value.get("error"))
            .or_else(|| value.pointer("/errors/0/message"))
            .and_then(|m| m.as_str());
        if let Some(message) = found {
            return message.to_string();
        }
    }

    let trimmed = body.trim();
    if trimmed.is_empty() {
        return status
            .canonical_reason()
            .unwrap_or("no response body")
            .to_string();
    }
    trimmed.chars().take(MAX_ERROR_BODY).collect()
}

#[async_trait]
impl JobApi for HttpClient {
    #[instrument(skip_all, fields(operation = %request.operation))]
    async fn create_job(&self, request: &NewJob) -> Result<Job> {
        let url = self.endpoint(&["jobs"]);
        self.data("create_job", Method::POST, url, Some(to_body(request)?))
            .await
    }

    async fn get_job(&self, id: &JobId) -> Result<Job> {
        let url = self.endpoint(&["jobs", id.as_str()]);
        self.data("get_job", Method::GET, url, None).await
    }

    async fn ack_job(&self, id: &JobId, progress: u8, info: &str) -> Result<()> {
        let url = self.endpoint(&["jobs", id.as_str(), "ack"]);
        let body = json!({ "progress": progress, "info": info });
        self.send("ack_job", Method::POST, url, Some(body), None)
            .await
            .map(drop)
    }

    async fn update_job_status(&self, id: &JobId, status: JobStatus) -> Result<()> {
        let url = self.endpoint(&["jobs", id.as_str()]);
        let body = json!({ "status": status });
        self.send("update_job_status", Method::PATCH, url, Some(body), None)
            .await
            .map(drop)
    }

    async fn complete_job(&self, id: &JobId, outcome: &JobOutcome) -> Result<()> {
        self.finish_job("complete_job", id, "complete", JobStatus::Complete, outcome)
            .await
    }

    async fn fail_job(&self, id: &JobId, outcome: &JobOutcome) -> Result<()> {
        self.finish_job("fail_job", id, "fail", JobStatus::Failed, outcome)
            .await
    }
}

#[async_trait]
impl FileApi for HttpClient {
    async fn get_file(&self, id: &str) -> Result<FileRef> {
        let url = self.endpoint(&["files", id]);
        let file: FileRef = self.data("get_file", Method::GET, url, None).await?;
        Ok(file.with_derived_ext())
    }

    /// Single attempt: any failure, including a missing file, is a fetch error.
    #[instrument(skip_all, fields(file_id = %id))]
    async fn download_file(&self, id: &str) -> Result<Vec<u8>> {
        let url = self.endpoint(&["files", id, "download"]);
        let response = self
            .send_once(Method::GET, url, None, None)
            .await
            .map_err(|e| SheetloaderError::fetch(format!("download of file '{id}' failed: {e}")))?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| SheetloaderError::fetch(format!("reading file '{id}' failed: {e}")))?;
        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl WorkbookApi for HttpClient {
    async fn get_workbook(&self, id: &str) -> Result<Workbook> {
        let url = self.endpoint(&["workbooks", id]);
        self.data("get_workbook", Method::GET, url, None).await
    }

    async fn create_workbook(&self, name: &str, sheets: &[SheetSchema]) -> Result<Workbook> {
        let url = self.endpoint(&["workbooks"]);
        let body = to_body(&NewWorkbook { name, sheets })?;
        self.data("create_workbook", Method::POST, url, Some(body))
            .await
    }

    async fn list_sheets(&self, workbook_id: &str, page: Pagination) -> Result<Page<Sheet>> {
        let url = self.paged_endpoint(&["workbooks", workbook_id, "sheets"], page);
        self.page("list_sheets", url).await
    }

    async fn create_sheet(&self, workbook_id: &str, schema: &SheetSchema) -> Result<Sheet> {
        let url = self.endpoint(&["workbooks", workbook_id, "sheets"]);
        self.data("create_sheet", Method::POST, url, Some(to_body(schema)?))
            .await
    }

    async fn insert_records(
        &self,
        sheet_id: &str,
        rows: &[RowCapture],
        idempotency_key: &str,
    ) -> Result<usize> {
        let url = self.endpoint(&["sheets", sheet_id, "records"]);
        let response = self
            .send(
                "insert_records",
                Method::POST,
                url,
                Some(to_body(&rows)?),
                Some(idempotency_key),
            )
            .await?;
        let summary: Envelope<WriteSummary> = decode("insert_records", response).await?;
        Ok(summary.data.count)
    }

    async fn update_records(&self, sheet_id: &str, updates: &[RecordUpdate]) -> Result<usize> {
        let url = self.endpoint(&["sheets", sheet_id, "records"]);
        let summary: WriteSummary = self
            .data("update_records", Method::PUT, url, Some(to_body(&updates)?))
            .await?;
        Ok(summary.count)
    }

    async fn list_records(&self, sheet_id: &str, page: Pagination) -> Result<Page<Record>> {
        let url = self.paged_endpoint(&["sheets", sheet_id, "records"], page);
        self.page("list_records", url).await
    }
}
