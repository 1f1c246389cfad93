//! Shared types, error model, and configuration for sheetloader.
//!
//! This crate is the foundation depended on by all other sheetloader crates.
//! It provides:
//! - [`SheetloaderError`]: the unified error type, tagged by [`Stage`]
//! - Capture types ([`WorkbookCapture`], [`SheetCapture`], [`RowCapture`])
//! - Remote entities ([`Workbook`], [`Sheet`], [`Job`])
//! - Configuration ([`AppConfig`], [`ExtractConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, DefaultsConfig, Destination, ExtractConfig, OfflineConfig, RemoteConfig,
    RetryConfig, config_dir, config_file_path, init_config, load_config, load_config_from,
    validate_api_token,
};
pub use error::{Result, SheetloaderError, Stage};
pub use types::{
    Cell, CellValue, FieldSchema, FileRef, Job, JobId, JobOutcome, JobStatus, NewJob, Page,
    Pagination, RawBuffer, Record, RecordUpdate, RowCapture, Sheet, SheetCapture, SheetOutcome,
    SheetSchema, Workbook, WorkbookCapture,
};
