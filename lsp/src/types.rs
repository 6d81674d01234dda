//! Public types exchanged with callers.
//!
//! Callers read [`Diagnostic`]s and [`DiagnosticsSnapshot`]s from a
//! [`crate::Connection`] and observe inbound traffic as [`ServerEvent`]s.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Severity level for a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DiagnosticSeverity {
    Error = 1,
    Warning = 2,
    Information = 3,
    Hint = 4,
}

impl DiagnosticSeverity {
    /// Convert from LSP numeric severity (1=Error, 2=Warning, 3=Info, 4=Hint).
    ///
    /// Returns `None` for values outside the LSP-defined range.
    #[must_use]
    pub fn from_lsp(value: u64) -> Option<Self> {
        match value {
            1 => Some(Self::Error),
            2 => Some(Self::Warning),
            3 => Some(Self::Information),
            4 => Some(Self::Hint),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_error(self) -> bool {
        self == Self::Error
    }

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warning => "warning",
            Self::Information => "info",
            Self::Hint => "hint",
        }
    }
}

/// A single diagnostic as published by the server.
///
/// The payload is kept verbatim; the accessors only peek at the well-known
/// fields and never fail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Diagnostic(Value);

impl Diagnostic {
    #[must_use]
    pub fn new(raw: Value) -> Self {
        Self(raw)
    }

    #[must_use]
    pub fn raw(&self) -> &Value {
        &self.0
    }

    #[must_use]
    pub fn into_raw(self) -> Value {
        self.0
    }

    #[must_use]
    pub fn message(&self) -> Option<&str> {
        self.0.get("message").and_then(Value::as_str)
    }

    #[must_use]
    pub fn severity(&self) -> Option<DiagnosticSeverity> {
        self.0
            .get("severity")
            .and_then(Value::as_u64)
            .and_then(DiagnosticSeverity::from_lsp)
    }

    #[must_use]
    pub fn source(&self) -> Option<&str> {
        self.0.get("source").and_then(Value::as_str)
    }

    /// 0-indexed start line.
    #[must_use]
    pub fn line(&self) -> Option<u64> {
        self.0.pointer("/range/start/line").and_then(Value::as_u64)
    }

    /// 0-indexed start column.
    #[must_use]
    pub fn col(&self) -> Option<u64> {
        self.0
            .pointer("/range/start/character")
            .and_then(Value::as_u64)
    }

    /// Format as `uri:line:col: severity: [source] message` (1-indexed for display).
    #[must_use]
    pub fn display_with_uri(&self, uri: &str) -> String {
        format!(
            "{}:{}:{}: {}: [{}] {}",
            uri,
            self.line().unwrap_or(0) + 1,
            self.col().unwrap_or(0) + 1,
            self.severity().map_or("unknown", DiagnosticSeverity::label),
            self.source().unwrap_or("unknown"),
            self.message().unwrap_or(""),
        )
    }
}

/// `type` of a `window/showMessage` or `window/logMessage` notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Error,
    Warning,
    Info,
    Log,
}

impl MessageType {
    /// Unknown values read as `Log`, the least severe kind.
    #[must_use]
    pub fn from_lsp(value: u64) -> Self {
        match value {
            1 => Self::Error,
            2 => Self::Warning,
            3 => Self::Info,
            _ => Self::Log,
        }
    }
}

/// Something the server told us, broadcast to subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    /// The diagnostics for `uri` were replaced.
    Diagnostics { uri: String, count: usize },
    ShowMessage { kind: MessageType, message: String },
    LogMessage { kind: MessageType, message: String },
    /// The server closed its end of the stream.
    StreamClosed,
}

/// Immutable snapshot of all diagnostics.
///
/// Counts are computed from `files`, the only stored state.
#[derive(Debug, Clone, Default)]
pub struct DiagnosticsSnapshot {
    /// Per-document diagnostics, sorted with error-containing documents first.
    files: Vec<(String, Vec<Diagnostic>)>,
}

impl DiagnosticsSnapshot {
    pub(crate) fn new(files: Vec<(String, Vec<Diagnostic>)>) -> Self {
        Self { files }
    }

    #[must_use]
    pub fn files(&self) -> &[(String, Vec<Diagnostic>)] {
        &self.files
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    fn count_by_severity(&self, severity: DiagnosticSeverity) -> usize {
        self.files
            .iter()
            .flat_map(|(_, items)| items)
            .filter(|d| d.severity() == Some(severity))
            .count()
    }

    #[must_use]
    pub fn error_count(&self) -> usize {
        self.count_by_severity(DiagnosticSeverity::Error)
    }

    #[must_use]
    pub fn warning_count(&self) -> usize {
        self.count_by_severity(DiagnosticSeverity::Warning)
    }

    #[must_use]
    pub fn total_count(&self) -> usize {
        self.files.iter().map(|(_, items)| items.len()).sum()
    }

    /// Format a compact status string like "E:3 W:5".
    #[must_use]
    pub fn status_string(&self) -> String {
        if self.is_empty() {
            return String::new();
        }
        format!("E:{} W:{}", self.error_count(), self.warning_count())
    }
}
