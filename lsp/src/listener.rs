//! Listener: the background task that decodes inbound frames and routes them.
//!
//! Responses go to the waiter registered under their id. Notifications update
//! the diagnostics store or get logged. Server-initiated requests are answered
//! with "method not found". Malformed frames are logged and skipped; only the
//! cancellation signal or the end of the stream stops the loop.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::io::AsyncRead;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use crate::codec::{Frame, FrameErrorKind, FrameReader};
use crate::diagnostics::DiagnosticsStore;
use crate::protocol::{self, IncomingFrame, MessageParams, PublishDiagnosticsParams, methods};
use crate::session::{Outbox, PendingRequests};
use crate::types::{MessageType, ServerEvent};

/// Why the listener loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ListenerExit {
    Cancelled,
    StreamClosed,
}

/// Routes decoded frames to their consumers.
#[derive(Clone)]
pub(crate) struct Dispatcher {
    pending: Arc<PendingRequests>,
    diagnostics: DiagnosticsStore,
    events: broadcast::Sender<ServerEvent>,
    outbox: Outbox,
}

impl Dispatcher {
    pub fn new(
        pending: Arc<PendingRequests>,
        diagnostics: DiagnosticsStore,
        events: broadcast::Sender<ServerEvent>,
        outbox: Outbox,
    ) -> Self {
        Self {
            pending,
            diagnostics,
            events,
            outbox,
        }
    }

    pub async fn handle(&self, frame: Frame) {
        match frame {
            Frame::Message(value) => self.dispatch(value).await,
            Frame::Empty(e) => match e.kind() {
                FrameErrorKind::Framing => tracing::warn!("Skipping malformed frame: {e}"),
                FrameErrorKind::Protocol => {
                    tracing::warn!("Skipping frame with invalid body: {e}");
                }
            },
        }
    }

    pub async fn dispatch(&self, frame: Value) {
        let Some(incoming) = protocol::parse_incoming(frame) else {
            tracing::trace!("Ignoring malformed JSON-RPC frame");
            return;
        };

        match incoming {
            IncomingFrame::Response(response) => {
                let id = response.id;
                if !self.pending.resolve(response).await {
                    tracing::warn!(id, "Unexpected response, no request is waiting for it");
                }
            }
            IncomingFrame::ServerRequest { id, method } => {
                // Servers may block until e.g. workspace/configuration is answered.
                tracing::debug!(%method, "Server sent request, replying method not found");
                if self
                    .outbox
                    .send(protocol::method_not_found(id, &method))
                    .await
                    .is_err()
                {
                    tracing::debug!(%method, "Could not reply, writer closed");
                }
            }
            IncomingFrame::Notification { method, params } => {
                self.handle_notification(&method, params);
            }
        }
    }

    fn handle_notification(&self, method: &str, params: Option<Value>) {
        match method {
            methods::PUBLISH_DIAGNOSTICS => {
                let Some(params) = params else { return };
                match serde_json::from_value::<PublishDiagnosticsParams>(params) {
                    Ok(PublishDiagnosticsParams { uri, diagnostics }) => {
                        let count = diagnostics.len();
                        tracing::debug!(%uri, count, "Diagnostics updated");
                        self.diagnostics.update(uri.clone(), diagnostics);
                        let _ = self.events.send(ServerEvent::Diagnostics { uri, count });
                    }
                    Err(e) => {
                        tracing::debug!("Failed to parse publishDiagnostics: {e}");
                    }
                }
            }
            methods::SHOW_MESSAGE | methods::LOG_MESSAGE => {
                let Some(MessageParams { kind, message }) =
                    params.and_then(|p| serde_json::from_value(p).ok())
                else {
                    tracing::debug!(%method, "Ignoring message notification without text");
                    return;
                };
                let kind = MessageType::from_lsp(kind);
                let event = if method == methods::SHOW_MESSAGE {
                    match kind {
                        MessageType::Error | MessageType::Warning => {
                            tracing::warn!(server_message = %message, "Server message");
                        }
                        MessageType::Info => tracing::info!(server_message = %message, "Server message"),
                        MessageType::Log => tracing::debug!(server_message = %message, "Server message"),
                    }
                    ServerEvent::ShowMessage { kind, message }
                } else {
                    tracing::debug!(server_log = %message, "Server log");
                    ServerEvent::LogMessage { kind, message }
                };
                let _ = self.events.send(event);
            }
            _ => {
                tracing::trace!(%method, "Ignoring notification");
            }
        }
    }

    /// The stream is gone: release waiters and tell subscribers.
    pub async fn stream_closed(&self) {
        let released = self.pending.close().await;
        if released > 0 {
            tracing::warn!(released, "Server closed the stream with requests in flight");
        }
        let _ = self.events.send(ServerEvent::StreamClosed);
    }
}

/// Spawn the listener loop over `reader`.
///
/// The loop exits when `cancel` turns `true` (or its sender is dropped) or
/// the stream ends.
pub(crate) fn spawn<R>(
    reader: FrameReader<R>,
    dispatcher: Dispatcher,
    cancel: watch::Receiver<bool>,
) -> JoinHandle<ListenerExit>
where
    R: AsyncRead + Send + Unpin + 'static,
{
    tokio::spawn(run(reader, dispatcher, cancel))
}

async fn run<R>(
    mut reader: FrameReader<R>,
    dispatcher: Dispatcher,
    mut cancel: watch::Receiver<bool>,
) -> ListenerExit
where
    R: AsyncRead + Unpin,
{
    loop {
        if *cancel.borrow_and_update() {
            return ListenerExit::Cancelled;
        }

        // A partially read frame is dropped on cancellation; nothing reads
        // from this stream afterwards.
        let frame = tokio::select! {
            biased;
            changed = cancel.changed() => {
                if changed.is_err() {
                    return ListenerExit::Cancelled;
                }
                continue;
            }
            frame = reader.read_frame() => frame,
        };

        match frame {
            Ok(Some(frame)) => dispatcher.handle(frame).await,
            Ok(None) => {
                tracing::info!("Server closed the stream");
                dispatcher.stream_closed().await;
                return ListenerExit::StreamClosed;
            }
            Err(e) => {
                tracing::warn!("Read from server failed: {e}");
                dispatcher.stream_closed().await;
                return ListenerExit::StreamClosed;
            }
        }
    }
}

/// Send `$/ping` every `interval` until cancelled.
pub(crate) fn spawn_heartbeat(
    outbox: Outbox,
    interval: Duration,
    mut cancel: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // The first tick completes immediately; the handshake just proved liveness.
        ticker.tick().await;
        loop {
            tokio::select! {
                biased;
                changed = cancel.changed() => {
                    if changed.is_err() || *cancel.borrow() {
                        return;
                    }
                }
                _ = ticker.tick() => {
                    let ping = serde_json::json!({ "jsonrpc": "2.0", "method": methods::PING });
                    if outbox.send(ping).await.is_err() {
                        return;
                    }
                    tracing::trace!("Heartbeat sent");
                }
            }
        }
    })
}
