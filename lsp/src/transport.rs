//! Transport: a duplex byte stream to the server.
//!
//! Two interchangeable implementations sit behind one [`Transport`] value,
//! picked by [`TransportTarget`]: a spawned child process talking over its
//! stdin/stdout, or a TCP connection to a server that is already running.

use std::process::Stdio;
use std::time::Duration;

use bridge_types::{LaunchSpec, SocketEndpoint, TransportTarget};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::process::{Child, Command};

use crate::error::ConnectionError;

pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Opaque handle used to release the transport once both halves are done.
#[derive(Debug)]
pub enum TransportHandle {
    Child { program: String, child: Child },
    Socket { endpoint: String },
    /// Caller-supplied streams; nothing to release.
    Streams,
}

impl TransportHandle {
    /// Release the underlying resource.
    ///
    /// A child process gets `grace` to exit on its own before it is killed.
    pub async fn close(self, grace: Duration) {
        match self {
            Self::Child { program, mut child } => {
                match tokio::time::timeout(grace, child.wait()).await {
                    Ok(Ok(status)) => {
                        tracing::debug!(%program, %status, "Server process exited");
                    }
                    Ok(Err(e)) => {
                        tracing::warn!(%program, "Failed to wait for server process: {e}");
                    }
                    Err(_) => {
                        tracing::debug!(%program, "Server didn't exit in time, killing");
                        let _ = child.kill().await;
                    }
                }
            }
            Self::Socket { endpoint } => {
                tracing::debug!(%endpoint, "Socket transport released");
            }
            Self::Streams => {}
        }
    }
}

/// An opened duplex stream plus the handle that closes it.
pub struct Transport {
    reader: BoxedReader,
    writer: BoxedWriter,
    handle: TransportHandle,
}

impl Transport {
    /// Wrap an existing pair of streams.
    pub fn from_streams(
        reader: impl AsyncRead + Send + Unpin + 'static,
        writer: impl AsyncWrite + Send + Unpin + 'static,
    ) -> Self {
        Self {
            reader: Box::new(reader),
            writer: Box::new(writer),
            handle: TransportHandle::Streams,
        }
    }

    pub(crate) fn into_parts(self) -> (BoxedReader, BoxedWriter, TransportHandle) {
        (self.reader, self.writer, self.handle)
    }
}

/// Open a transport to `target`.
pub async fn connect(target: &TransportTarget) -> Result<Transport, ConnectionError> {
    match target {
        TransportTarget::Launch(spec) => launch(spec),
        TransportTarget::Socket(endpoint) => dial(endpoint).await,
    }
}

fn launch(spec: &LaunchSpec) -> Result<Transport, ConnectionError> {
    let program = spec.program().to_string();
    let resolved = which::which(spec.program()).map_err(|source| ConnectionError::NotFound {
        program: program.clone(),
        source,
    })?;

    let mut child = Command::new(&resolved)
        .args(spec.args())
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| ConnectionError::Spawn {
            program: program.clone(),
            source,
        })?;

    let stdout = child.stdout.take().ok_or_else(|| ConnectionError::MissingPipe {
        program: program.clone(),
        stream: "stdout",
    })?;
    let stdin = child.stdin.take().ok_or_else(|| ConnectionError::MissingPipe {
        program: program.clone(),
        stream: "stdin",
    })?;

    tracing::info!(program = %resolved.display(), pid = child.id(), "Spawned server process");

    Ok(Transport {
        reader: Box::new(stdout),
        writer: Box::new(stdin),
        handle: TransportHandle::Child { program, child },
    })
}

async fn dial(endpoint: &SocketEndpoint) -> Result<Transport, ConnectionError> {
    let stream = TcpStream::connect((endpoint.host(), endpoint.port()))
        .await
        .map_err(|source| ConnectionError::Connect {
            endpoint: endpoint.to_string(),
            source,
        })?;
    if let Err(e) = stream.set_nodelay(true) {
        tracing::debug!(%endpoint, "Failed to set TCP_NODELAY: {e}");
    }
    tracing::info!(%endpoint, "Connected to server");

    let (reader, writer) = stream.into_split();
    Ok(Transport {
        reader: Box::new(reader),
        writer: Box::new(writer),
        handle: TransportHandle::Socket {
            endpoint: endpoint.to_string(),
        },
    })
}
