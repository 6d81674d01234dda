//! Shared infrastructure utilities for the bridge client.
//!
//! These are the stateless collaborators the protocol core consumes while
//! building request parameters:
//!
//! - **`uri`**: path ↔ `file://` URI conversion and normalization
//! - **`files`**: reading document text from disk

pub mod files;
pub mod uri;

pub use files::{ReadDocumentError, read_document};
pub use uri::{
    PathToUriError, file_uri_to_path, normalize_document_uri, normalize_path_string,
    path_to_file_uri,
};
