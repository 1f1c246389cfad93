//! End-to-end extraction: file → job → fetch → parse → normalize → write.
//!
//! Once a job exists, every failure is turned into exactly one stage-tagged
//! `fail` on that job and [`Extractor::extract`] still returns `Ok` with a
//! report; callers look at the job status. Errors before the job exists
//! (unknown file, bad config, job creation) are returned directly.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use sheetloader_parsers::ParserRegistry;
use sheetloader_remote::{FileApi, JobApi, WorkbookApi, list_all_sheets};
use sheetloader_shared::{
    Destination, ExtractConfig, FileRef, Job, JobOutcome, JobStatus, Result, Sheet, SheetOutcome,
    SheetloaderError, Stage,
};
use tracing::{info, instrument, warn};

use crate::fetch::BufferFetcher;
use crate::job::JobTracker;
use crate::normalize::{NormalizedCapture, normalize};
use crate::writer::{ChunkedWriter, SheetWrite};

/// Page size used when listing destination sheets.
const DEFAULT_PAGE_SIZE: u32 = 100;

/// Result of one extraction run.
#[derive(Debug, Clone)]
pub struct ExtractionReport {
    /// The job in its terminal state.
    pub job: Job,
    pub records_written: usize,
    pub sheets: Vec<SheetOutcome>,
    pub elapsed: Duration,
}

impl ExtractionReport {
    pub fn succeeded(&self) -> bool {
        self.job.status == JobStatus::Complete
    }
}

/// Progress callback for surfacing pipeline status.
pub trait ProgressReporter: Send + Sync {
    /// Called at each stage boundary with the job progress (0–100).
    fn tick(&self, progress: u8, info: &str);
    /// Called after each committed chunk.
    fn chunk_written(&self, sheet: &str, chunk: usize, chunks: usize, records: usize);
    /// Called once the job reached a terminal state.
    fn done(&self, report: &ExtractionReport);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn tick(&self, _progress: u8, _info: &str) {}
    fn chunk_written(&self, _sheet: &str, _chunk: usize, _chunks: usize, _records: usize) {}
    fn done(&self, _report: &ExtractionReport) {}
}

/// A pipeline error tagged with the stage it happened in.
struct StageFailure {
    stage: Stage,
    error: SheetloaderError,
}

trait AtStage<T> {
    fn at(self, stage: Stage) -> std::result::Result<T, StageFailure>;
}

impl<T> AtStage<T> for Result<T> {
    fn at(self, stage: Stage) -> std::result::Result<T, StageFailure> {
        self.map_err(|error| StageFailure { stage, error })
    }
}

/// Wall-clock state shared by [`Extractor::extract`] and the write stage.
#[derive(Debug, Default)]
struct Deadline {
    expired: AtomicBool,
    /// Set once the first chunk may be in flight.
    writing: AtomicBool,
}

/// Composes the pipeline over injected collaborators.
pub struct Extractor<'a> {
    files: &'a dyn FileApi,
    jobs: &'a dyn JobApi,
    workbooks: &'a dyn WorkbookApi,
    parsers: &'a ParserRegistry,
    page_size: u32,
}

impl<'a> Extractor<'a> {
    pub fn new(
        files: &'a dyn FileApi,
        jobs: &'a dyn JobApi,
        workbooks: &'a dyn WorkbookApi,
        parsers: &'a ParserRegistry,
    ) -> Self {
        Self {
            files,
            jobs,
            workbooks,
            parsers,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Run one extraction.
    ///
    /// 1. Resolve the file and create the job
    /// 2. Fetch, parse and normalize the file
    /// 3. Make sure destination sheets exist
    /// 4. Write all sheets in chunks
    /// 5. Complete the job, or fail it with the stage that broke
    ///
    /// `config.timeout` bounds steps 2 to 4. Expiring before the write stage
    /// abandons the run at once. Expiring during the write stage stops new
    /// chunks from starting and waits for in-flight chunk calls to return.
    /// Either way the job is failed with stage `timeout`. The final
    /// `complete` or `fail` call is outside that bound; the collaborator's
    /// own request timeout and retry policy limit it.
    #[instrument(skip_all, fields(file_id = %file_id))]
    pub async fn extract(
        &self,
        config: &ExtractConfig,
        file_id: &str,
        progress: &dyn ProgressReporter,
    ) -> Result<ExtractionReport> {
        let start = Instant::now();
        if config.chunk_size == 0 {
            return Err(SheetloaderError::validation("chunk size must be at least 1"));
        }
        if config.concurrency == 0 {
            return Err(SheetloaderError::validation("concurrency must be at least 1"));
        }

        let fetcher = BufferFetcher::new(self.files);
        let file = fetcher.resolve(file_id).await?;
        let mut tracker =
            JobTracker::start(self.jobs, &config.job_type, &config.operation, &file.id).await?;

        info!(job_id = %tracker.id(), name = %file.name, "starting extraction");

        let deadline = Deadline::default();
        let run = {
            let run = self.run(&mut tracker, &fetcher, &file, config, progress, &deadline);
            tokio::pin!(run);
            tokio::select! {
                biased;
                result = &mut run => Some(result),
                () = tokio::time::sleep(config.timeout) => {
                    deadline.expired.store(true, Ordering::SeqCst);
                    if deadline.writing.load(Ordering::SeqCst) {
                        warn!("timed out while writing, waiting for in-flight chunks");
                        let _ = run.await;
                    }
                    None
                }
            }
        };

        let (records_written, sheets) = match run {
            Some(Ok(outcome)) => {
                let written = outcome.records_written.unwrap_or(0);
                let sheets = outcome.sheets.clone();
                match tracker.complete(outcome).await {
                    Ok(()) => (written, sheets),
                    Err(e) => {
                        warn!(error = %e, "job store rejected completion");
                        let outcome = JobOutcome {
                            message: format!("{} failed: job completion rejected: {e}", Stage::Write),
                            records_written: Some(written),
                            sheets: sheets.clone(),
                        };
                        let _ = tracker.fail(outcome).await;
                        (written, sheets)
                    }
                }
            }
            Some(Err(failure)) => {
                let _ = tracker.fail_at(failure.stage, &failure.error).await;
                (0, Vec::new())
            }
            None => {
                let cause = SheetloaderError::Timeout {
                    after: config.timeout,
                };
                let _ = tracker.fail_at(Stage::Timeout, &cause).await;
                (0, Vec::new())
            }
        };

        let report = ExtractionReport {
            job: tracker.into_job(),
            records_written,
            sheets,
            elapsed: start.elapsed(),
        };
        info!(
            status = %report.job.status,
            records = report.records_written,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "extraction finished"
        );
        progress.done(&report);
        Ok(report)
    }

    async fn run(
        &self,
        tracker: &mut JobTracker<'_>,
        fetcher: &BufferFetcher<'_>,
        file: &FileRef,
        config: &ExtractConfig,
        progress: &dyn ProgressReporter,
        deadline: &Deadline,
    ) -> std::result::Result<JobOutcome, StageFailure> {
        tick(tracker, progress, 10, "fetching").await.at(Stage::Fetch)?;
        let buffer = fetcher.fetch(file).await.at(Stage::Fetch)?;

        tick(tracker, progress, 30, "parsing").await.at(Stage::Parse)?;
        let parser = self.parsers.resolve(&file.ext).at(Stage::Parse)?;
        let capture = parser.parse(&buffer).at(Stage::Parse)?;
        drop(buffer);
        info!(format = parser.format(), sheets = capture.len(), "file parsed");

        tick(tracker, progress, 50, "normalizing").await.at(Stage::Normalize)?;
        let normalized = normalize(capture).at(Stage::Normalize)?;

        if normalized.is_empty() {
            info!("file contains no sheets, nothing to write");
            return Ok(JobOutcome {
                records_written: Some(0),
                ..JobOutcome::message(format!("no records found in {}", file.name))
            });
        }

        let sheets = self
            .ensure_destination(config, file, &normalized)
            .await
            .at(Stage::Write)?;

        tick(tracker, progress, 70, "writing").await.at(Stage::Write)?;
        let writer = ChunkedWriter::new(
            self.workbooks,
            config.chunk_size,
            config.concurrency,
            tracker.id().as_str(),
        )
        .at(Stage::Write)?
        .stop_when(&deadline.expired);

        let writes: Vec<SheetWrite<'_>> = normalized
            .sheets
            .iter()
            .zip(&sheets)
            .map(|(source, dest)| SheetWrite {
                sheet_id: &dest.id,
                name: &source.name,
                rows: &source.rows,
            })
            .collect();
        deadline.writing.store(true, Ordering::SeqCst);
        let counts = writer.write_all(&writes, progress).await.at(Stage::Write)?;

        let outcomes: Vec<SheetOutcome> = sheets
            .iter()
            .zip(&counts)
            .map(|(sheet, &records)| SheetOutcome {
                name: sheet.name.clone(),
                sheet_id: sheet.id.clone(),
                records,
            })
            .collect();
        let total: usize = counts.iter().sum();

        Ok(JobOutcome {
            message: format!(
                "extracted {total} records into {} sheet(s)",
                outcomes.len()
            ),
            records_written: Some(total),
            sheets: outcomes,
        })
    }

    /// Resolve one destination sheet per normalized sheet, in the same order.
    async fn ensure_destination(
        &self,
        config: &ExtractConfig,
        file: &FileRef,
        normalized: &NormalizedCapture,
    ) -> Result<Vec<Sheet>> {
        match &config.destination {
            Destination::NewWorkbook => {
                let workbook = self
                    .workbooks
                    .create_workbook(file.stem(), &normalized.schemas())
                    .await?;
                info!(workbook_id = %workbook.id, "destination workbook created");

                normalized
                    .sheets
                    .iter()
                    .map(|source| {
                        workbook
                            .sheets
                            .iter()
                            .find(|s| s.name == source.name)
                            .cloned()
                            .ok_or_else(|| {
                                SheetloaderError::validation(format!(
                                    "workbook '{}' was created without sheet '{}'",
                                    workbook.id, source.name
                                ))
                            })
                    })
                    .collect()
            }
            Destination::Workbook(workbook_id) => {
                let existing = list_all_sheets(self.workbooks, workbook_id, self.page_size).await?;
                let mut resolved = Vec::with_capacity(normalized.sheets.len());

                for source in &normalized.sheets {
                    if let Some(sheet) = existing.iter().find(|s| s.name == source.name) {
                        resolved.push(sheet.clone());
                    } else if config.create_missing_sheets {
                        let sheet = self
                            .workbooks
                            .create_sheet(workbook_id, &source.schema)
                            .await?;
                        info!(sheet = %sheet.name, sheet_id = %sheet.id, "destination sheet created");
                        resolved.push(sheet);
                    } else {
                        return Err(SheetloaderError::validation(format!(
                            "workbook '{workbook_id}' has no sheet named '{}' and sheet creation is disabled",
                            source.name
                        )));
                    }
                }
                Ok(resolved)
            }
        }
    }
}

async fn tick(
    tracker: &mut JobTracker<'_>,
    progress: &dyn ProgressReporter,
    percent: u8,
    info: &str,
) -> Result<()> {
    tracker.ack(percent, info).await?;
    progress.tick(percent, info);
    Ok(())
}
