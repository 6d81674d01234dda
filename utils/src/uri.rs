//! Document URI helpers.
//!
//! Servers key diagnostics by the exact URI string they were sent, so every
//! URI the client hands out goes through one of these functions.

use std::path::{Component, Path, PathBuf};

use url::Url;

const FILE_SCHEME_PREFIX: &str = "file://";

#[derive(Debug, thiserror::Error)]
#[error("cannot convert path to file URI: {}", path.display())]
pub struct PathToUriError {
    path: PathBuf,
}

/// Lexically resolve `.` and `..` components without touching the filesystem.
fn normalize_components(path: &Path) -> PathBuf {
    let mut out = Vec::new();
    for c in path.components() {
        match c {
            Component::ParentDir => {
                out.pop();
            }
            Component::CurDir => {}
            other => out.push(other),
        }
    }
    out.iter().collect()
}

/// Convert a filesystem path into a `file://` URI.
///
/// Relative paths are resolved against the current directory first.
pub fn path_to_file_uri(path: &Path) -> Result<Url, PathToUriError> {
    let absolute = std::path::absolute(path).map_err(|_| PathToUriError {
        path: path.to_path_buf(),
    })?;
    Url::from_file_path(normalize_components(&absolute)).map_err(|()| PathToUriError {
        path: path.to_path_buf(),
    })
}

#[must_use]
pub fn file_uri_to_path(uri: &str) -> Option<PathBuf> {
    Url::parse(uri).ok().and_then(|u| u.to_file_path().ok())
}

/// Unify separators to `/` and drop a single trailing slash.
#[must_use]
pub fn normalize_path_string(path: &str) -> String {
    let mut normalized = path.replace('\\', "/");
    if normalized.len() > 1 && normalized.ends_with('/') {
        normalized.pop();
    }
    normalized
}

/// Coerce a caller-supplied document identifier into `file:///...` form.
///
/// Strings already carrying the `file://` scheme pass through untouched.
#[must_use]
pub fn normalize_document_uri(raw: &str) -> String {
    if raw.starts_with(FILE_SCHEME_PREFIX) {
        return raw.to_string();
    }
    let normalized = normalize_path_string(raw);
    format!("{FILE_SCHEME_PREFIX}/{}", normalized.trim_start_matches('/'))
}
