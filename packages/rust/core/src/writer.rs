//! Chunked, concurrency-bounded record writes.
//!
//! Rows are split into chunks of at most `chunk_size` and each chunk is one
//! insert call. Chunks of a sheet go out strictly in order; different sheets
//! are written concurrently, sharing one semaphore that caps in-flight calls.
//! Already committed chunks are never rolled back; every chunk carries a
//! deterministic idempotency key so a replayed run does not duplicate them on
//! stores that honour the key.

use std::sync::atomic::{AtomicBool, Ordering};

use futures::future::join_all;
use sha2::{Digest, Sha256};
use sheetloader_remote::WorkbookApi;
use sheetloader_shared::{Result, RowCapture, SheetloaderError};
use tokio::sync::Semaphore;
use tracing::{debug, info, instrument, warn};

use crate::pipeline::{ProgressReporter, SilentProgress};

/// Rows bound for one destination sheet.
#[derive(Debug, Clone, Copy)]
pub struct SheetWrite<'a> {
    pub sheet_id: &'a str,
    /// Display name used in errors and progress.
    pub name: &'a str,
    pub rows: &'a [RowCapture],
}

/// `sha256("{run_key}:{sheet_id}:{chunk_ordinal}")`, hex encoded.
pub fn idempotency_key(run_key: &str, sheet_id: &str, chunk_ordinal: usize) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("{run_key}:{sheet_id}:{chunk_ordinal}").as_bytes());
    format!("{:x}", hasher.finalize())
}

pub struct ChunkedWriter<'a> {
    api: &'a dyn WorkbookApi,
    chunk_size: usize,
    concurrency: usize,
    run_key: String,
    stop: Option<&'a AtomicBool>,
}

impl<'a> ChunkedWriter<'a> {
    /// `run_key` scopes idempotency keys; the job id is a natural choice.
    pub fn new(
        api: &'a dyn WorkbookApi,
        chunk_size: usize,
        concurrency: usize,
        run_key: impl Into<String>,
    ) -> Result<Self> {
        if chunk_size == 0 {
            return Err(SheetloaderError::validation("chunk size must be at least 1"));
        }
        if concurrency == 0 {
            return Err(SheetloaderError::validation("concurrency must be at least 1"));
        }
        Ok(Self {
            api,
            chunk_size,
            concurrency,
            run_key: run_key.into(),
            stop: None,
        })
    }

    /// Stop starting chunks once `stop` is set. Calls already in flight are
    /// never interrupted.
    pub fn stop_when(mut self, stop: &'a AtomicBool) -> Self {
        self.stop = Some(stop);
        self
    }

    fn stopped(&self) -> bool {
        self.stop.is_some_and(|stop| stop.load(Ordering::SeqCst))
    }

    /// Write one sheet's rows and return how many were written.
    pub async fn write(&self, sheet_id: &str, rows: &[RowCapture]) -> Result<usize> {
        let counts = self
            .write_all(
                &[SheetWrite {
                    sheet_id,
                    name: sheet_id,
                    rows,
                }],
                &SilentProgress,
            )
            .await?;
        Ok(counts.iter().sum())
    }

    /// Write every sheet, returning per-sheet counts in input order.
    ///
    /// After the first chunk failure no new chunk is started anywhere; calls
    /// already in flight are allowed to finish. The reported error is the
    /// first failure in sheet order.
    #[instrument(skip_all, fields(sheets = sheets.len(), chunk_size = self.chunk_size))]
    pub async fn write_all(
        &self,
        sheets: &[SheetWrite<'_>],
        progress: &dyn ProgressReporter,
    ) -> Result<Vec<usize>> {
        let semaphore = Semaphore::new(self.concurrency);
        let halted = AtomicBool::new(false);

        let results = join_all(
            sheets
                .iter()
                .map(|sheet| self.write_sheet(sheet, &semaphore, &halted, progress)),
        )
        .await;

        let counts = results.into_iter().collect::<Result<Vec<usize>>>()?;
        info!(
            records = counts.iter().sum::<usize>(),
            "all sheets written"
        );
        Ok(counts)
    }

    async fn write_sheet(
        &self,
        sheet: &SheetWrite<'_>,
        semaphore: &Semaphore,
        halted: &AtomicBool,
        progress: &dyn ProgressReporter,
    ) -> Result<usize> {
        let chunks = sheet.rows.len().div_ceil(self.chunk_size);
        let mut written = 0;

        for (index, chunk) in sheet.rows.chunks(self.chunk_size).enumerate() {
            let ordinal = index + 1;
            let write_error = |message: String| SheetloaderError::Write {
                sheet: sheet.name.to_string(),
                chunk: ordinal,
                chunks,
                message,
            };

            let _permit = semaphore
                .acquire()
                .await
                .map_err(|e| write_error(e.to_string()))?;
            if halted.load(Ordering::SeqCst) {
                debug!(sheet = sheet.name, ordinal, "halting after earlier failure");
                return Ok(written);
            }
            if self.stopped() {
                debug!(sheet = sheet.name, ordinal, chunks, "stop requested, not starting chunk");
                return Ok(written);
            }

            let key = idempotency_key(&self.run_key, sheet.sheet_id, ordinal);
            match self.api.insert_records(sheet.sheet_id, chunk, &key).await {
                Ok(count) => {
                    written += count;
                    debug!(sheet = sheet.name, ordinal, chunks, count, "chunk written");
                    progress.chunk_written(sheet.name, ordinal, chunks, count);
                }
                Err(e) => {
                    halted.store(true, Ordering::SeqCst);
                    warn!(sheet = sheet.name, ordinal, chunks, error = %e, "chunk write failed");
                    return Err(write_error(e.to_string()));
                }
            }
        }

        Ok(written)
    }
}
