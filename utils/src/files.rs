//! Document text loading.

use std::io;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
#[error("failed to read document {}", path.display())]
pub struct ReadDocumentError {
    path: PathBuf,
    #[source]
    source: io::Error,
}

impl ReadDocumentError {
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Read a document as UTF-8 text for `textDocument/didOpen`.
///
/// Invalid UTF-8 sequences are replaced rather than rejected; servers only
/// ever see a JSON string.
pub fn read_document(path: &Path) -> Result<String, ReadDocumentError> {
    let bytes = std::fs::read(path).map_err(|source| ReadDocumentError {
        path: path.to_path_buf(),
        source,
    })?;
    match String::from_utf8(bytes) {
        Ok(text) => Ok(text),
        Err(err) => {
            tracing::warn!(path = %path.display(), "Document is not valid UTF-8, replacing invalid bytes");
            Ok(String::from_utf8_lossy(err.as_bytes()).into_owned())
        }
    }
}
