//! Extraction pipeline for sheetloader.
//!
//! Ties the collaborator traits, format parsers and job bookkeeping together:
//! a file goes in, records land in a workbook, and the job ends either
//! complete or failed with a stage-tagged message.

pub mod fetch;
pub mod job;
pub mod normalize;
pub mod pipeline;
pub mod writer;

#[cfg(test)]
mod testing;

pub use fetch::{BufferFetcher, LocalFiles};
pub use job::{JobTracker, failure_message};
pub use normalize::{NormalizedCapture, NormalizedSheet, normalize, sanitize_key};
pub use pipeline::{ExtractionReport, Extractor, ProgressReporter, SilentProgress};
pub use writer::{ChunkedWriter, SheetWrite, idempotency_key};
