//! JSON-RPC client runtime for language/analysis servers.
//!
//! A [`Connection`] owns one session: the transport (child process or TCP
//! socket), the framing codec, request/response correlation, a background
//! listener for server-pushed notifications, and the diagnostics cache those
//! notifications feed.

pub mod codec;
pub mod error;
pub mod lifecycle;
pub mod protocol;
pub mod transport;
pub mod types;

mod connection;
pub(crate) mod diagnostics;
pub(crate) mod listener;
pub(crate) mod session;

pub use codec::{Frame, FrameError, FrameErrorKind, FrameReader, FrameWriter};
pub use connection::Connection;
pub use error::{ClientError, ConnectionError};
pub use lifecycle::{LifecycleState, TransitionError};
pub use protocol::{Response, WorkspaceInfo, methods};
pub use transport::{Transport, TransportHandle};
pub use types::{
    Diagnostic, DiagnosticSeverity, DiagnosticsSnapshot, MessageType, ServerEvent,
};
