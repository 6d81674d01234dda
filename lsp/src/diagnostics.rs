//! Diagnostics store: the latest diagnostic set per document URI.
//!
//! One writer (the listener) and any number of readers share the store
//! through cheap clones of the same handle. Each publish replaces the whole
//! entry under the write lock, so a reader sees either the old set or the new
//! one, never a mix.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use crate::types::{Diagnostic, DiagnosticsSnapshot};

#[derive(Clone, Default)]
pub(crate) struct DiagnosticsStore {
    data: Arc<RwLock<HashMap<String, Vec<Diagnostic>>>>,
}

impl DiagnosticsStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the stored set for `uri`. An empty set clears the entry.
    pub fn update(&self, uri: String, items: Vec<Diagnostic>) {
        let mut data = self.data.write().unwrap_or_else(PoisonError::into_inner);
        if items.is_empty() {
            data.remove(&uri);
        } else {
            data.insert(uri, items);
        }
    }

    /// The last published set for `uri`, or empty if none was ever published.
    pub fn get(&self, uri: &str) -> Vec<Diagnostic> {
        self.data
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(uri)
            .cloned()
            .unwrap_or_default()
    }

    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        let mut files: Vec<(String, Vec<Diagnostic>)> = self
            .data
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(uri, items)| (uri.clone(), items.clone()))
            .collect();

        // Sort: documents with errors first, then by URI
        files.sort_by(|a, b| {
            let a_has_errors = a.1.iter().any(|d| d.severity().is_some_and(|s| s.is_error()));
            let b_has_errors = b.1.iter().any(|d| d.severity().is_some_and(|s| s.is_error()));
            b_has_errors.cmp(&a_has_errors).then_with(|| a.0.cmp(&b.0))
        });

        DiagnosticsSnapshot::new(files)
    }
}
