//! Error taxonomy for the client runtime.
//!
//! Transport and handshake failures abort the calling operation. Frame-level
//! malformations never show up here: they are absorbed by the listener (see
//! [`crate::codec::FrameError`]). A populated `error` field in a response is
//! data, not an error, and reaches the caller inside [`crate::Response`].

use std::io;
use std::time::Duration;

use crate::lifecycle::{LifecycleState, TransitionError};

/// The transport to the server could not be established.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("{program} not found in PATH")]
    NotFound {
        program: String,
        #[source]
        source: which::Error,
    },
    #[error("spawning {program}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("{program} did not expose a piped {stream}")]
    MissingPipe {
        program: String,
        stream: &'static str,
    },
    #[error("connecting to {endpoint}")]
    Connect {
        endpoint: String,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    #[error("server rejected initialize: {0}")]
    InitializeRejected(serde_json::Value),
    #[error("connection is not ready (state: {0})")]
    NotReady(LifecycleState),
    #[error(transparent)]
    Lifecycle(#[from] TransitionError),
    #[error("connection closed")]
    ConnectionClosed,
    #[error("request {method} timed out after {after:?}")]
    Timeout { method: String, after: Duration },
    #[error("serializing {method}")]
    Serialize {
        method: String,
        #[source]
        source: serde_json::Error,
    },
}

impl ClientError {
    /// Whether the connection can no longer carry traffic.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::ConnectionClosed)
    }
}
