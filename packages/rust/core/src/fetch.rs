//! Buffer fetching: file reference → raw bytes.
//!
//! No retries happen here. Any failure surfaces as a fetch error and the
//! caller decides what to do with it.

use std::path::Path;

use async_trait::async_trait;
use sheetloader_remote::FileApi;
use sheetloader_shared::{FileRef, RawBuffer, Result, SheetloaderError};
use tracing::{debug, info, instrument};

/// Resolves file references and downloads their content.
pub struct BufferFetcher<'a> {
    files: &'a dyn FileApi,
}

impl<'a> BufferFetcher<'a> {
    pub fn new(files: &'a dyn FileApi) -> Self {
        Self { files }
    }

    /// Look up file metadata.
    pub async fn resolve(&self, file_id: &str) -> Result<FileRef> {
        let file = self
            .files
            .get_file(file_id)
            .await
            .map_err(|e| as_fetch_error(e, || format!("resolving file '{file_id}' failed")))?;
        debug!(file_id, name = %file.name, ext = %file.ext, "file resolved");
        Ok(file.with_derived_ext())
    }

    #[instrument(skip_all, fields(file_id = %file.id, name = %file.name))]
    pub async fn fetch(&self, file: &FileRef) -> Result<RawBuffer> {
        let bytes = self
            .files
            .download_file(&file.id)
            .await
            .map_err(|e| as_fetch_error(e, || format!("downloading '{}' failed", file.name)))?;
        let buffer = RawBuffer::new(bytes);
        info!(bytes = buffer.len(), digest = %buffer.digest(), "buffer fetched");
        Ok(buffer)
    }
}

fn as_fetch_error(err: SheetloaderError, context: impl FnOnce() -> String) -> SheetloaderError {
    match err {
        SheetloaderError::Fetch { .. } => err,
        other => SheetloaderError::fetch(format!("{}: {other}", context())),
    }
}

/// [`FileApi`] over the local filesystem; the file id is its path.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalFiles;

#[async_trait]
impl FileApi for LocalFiles {
    async fn get_file(&self, id: &str) -> Result<FileRef> {
        let path = Path::new(id);
        let metadata = tokio::fs::metadata(path)
            .await
            .map_err(|e| SheetloaderError::fetch(format!("file '{id}' not found: {e}")))?;
        if !metadata.is_file() {
            return Err(SheetloaderError::fetch(format!("'{id}' is not a regular file")));
        }

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| id.to_string());
        Ok(FileRef::new(id, name))
    }

    async fn download_file(&self, id: &str) -> Result<Vec<u8>> {
        tokio::fs::read(id)
            .await
            .map_err(|e| SheetloaderError::fetch(format!("reading '{id}' failed: {e}")))
    }
}
