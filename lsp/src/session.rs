//! RPC session: request ids, outbound frames, and response correlation.
//!
//! Every outbound frame goes through one writer task, so frames reach the
//! wire in the order they were enqueued. Each request registers a one-shot
//! waiter under its id; the listener resolves it when the matching response
//! arrives. Any number of requests may be in flight.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::codec::FrameWriter;
use crate::error::ClientError;
use crate::protocol::{Notification, Request, Response};
use crate::transport::BoxedWriter;

const WRITER_CHANNEL_CAPACITY: usize = 64;

pub(crate) enum WriterCommand {
    Send(Value),
    Shutdown,
}

/// Cloneable sending side of the writer task.
#[derive(Clone)]
pub(crate) struct Outbox {
    tx: mpsc::Sender<WriterCommand>,
}

impl Outbox {
    pub async fn send(&self, frame: Value) -> Result<(), ClientError> {
        self.tx
            .send(WriterCommand::Send(frame))
            .await
            .map_err(|_| ClientError::ConnectionClosed)
    }

    /// Ask the writer to close its half of the stream after draining.
    ///
    /// Never waits: with the queue full, the writer stops once every
    /// `Outbox` is dropped instead.
    pub fn close(&self) {
        if let Err(e) = self.tx.try_send(WriterCommand::Shutdown) {
            tracing::debug!("Writer close not queued: {e}");
        }
    }
}

/// Spawn the writer task that owns the write half of the transport.
pub(crate) fn spawn_writer(writer: BoxedWriter) -> (Outbox, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel::<WriterCommand>(WRITER_CHANNEL_CAPACITY);
    let handle = tokio::spawn(async move {
        let mut writer = FrameWriter::new(writer);
        while let Some(cmd) = rx.recv().await {
            match cmd {
                WriterCommand::Send(frame) => {
                    if let Err(e) = writer.write_frame(&frame).await {
                        tracing::warn!("Write to server failed: {e}");
                        break;
                    }
                }
                WriterCommand::Shutdown => break,
            }
        }
        rx.close();
        if let Err(e) = writer.shutdown().await {
            tracing::debug!("Closing write half failed: {e}");
        }
    });
    (Outbox { tx }, handle)
}

#[derive(Default)]
struct PendingState {
    waiters: HashMap<u64, oneshot::Sender<Response>>,
    closed: bool,
}

/// Waiters for in-flight requests, keyed by request id.
#[derive(Default)]
pub(crate) struct PendingRequests {
    inner: Mutex<PendingState>,
}

impl PendingRequests {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a waiter for `id`. Fails once the table has been closed.
    pub async fn register(&self, id: u64) -> Result<oneshot::Receiver<Response>, ClientError> {
        let mut state = self.inner.lock().await;
        if state.closed {
            return Err(ClientError::ConnectionClosed);
        }
        let (tx, rx) = oneshot::channel();
        state.waiters.insert(id, tx);
        Ok(rx)
    }

    /// Hand `response` to its waiter. Returns `false` if nobody was waiting.
    pub async fn resolve(&self, response: Response) -> bool {
        let waiter = self.inner.lock().await.waiters.remove(&response.id);
        match waiter {
            // The caller may have timed out and dropped its receiver.
            Some(tx) => tx.send(response).is_ok(),
            None => false,
        }
    }

    pub async fn forget(&self, id: u64) {
        self.inner.lock().await.waiters.remove(&id);
    }

    /// Refuse new waiters and release the current ones with `ConnectionClosed`.
    ///
    /// Returns how many waiters were released.
    pub async fn close(&self) -> usize {
        let mut state = self.inner.lock().await;
        state.closed = true;
        let released = state.waiters.len();
        state.waiters.clear();
        released
    }

    pub async fn is_closed(&self) -> bool {
        self.inner.lock().await.closed
    }

    #[cfg(test)]
    pub async fn len(&self) -> usize {
        self.inner.lock().await.waiters.len()
    }
}

/// A request that has been written and is waiting for its response.
pub(crate) struct InFlight {
    pub id: u64,
    pub rx: oneshot::Receiver<Response>,
}

pub(crate) struct RpcSession {
    /// Next id to hand out. Held across enqueueing so wire order is id order.
    next_id: Mutex<u64>,
    outbox: Outbox,
    pending: Arc<PendingRequests>,
    default_timeout: Option<Duration>,
}

impl RpcSession {
    pub fn new(
        outbox: Outbox,
        pending: Arc<PendingRequests>,
        default_timeout: Option<Duration>,
    ) -> Self {
        Self {
            next_id: Mutex::new(1),
            outbox,
            pending,
            default_timeout,
        }
    }

    pub fn outbox(&self) -> &Outbox {
        &self.outbox
    }

    /// Allocate an id, register its waiter, and enqueue the request frame.
    pub async fn start_request(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<InFlight, ClientError> {
        let mut next_id = self.next_id.lock().await;
        let id = *next_id;

        let frame = serde_json::to_value(Request::new(id, method, params)).map_err(|source| {
            ClientError::Serialize {
                method: method.to_string(),
                source,
            }
        })?;
        let rx = self.pending.register(id).await?;
        if let Err(e) = self.outbox.send(frame).await {
            // Don't leak the waiter when the writer is gone.
            self.pending.forget(id).await;
            return Err(e);
        }

        *next_id += 1;
        tracing::debug!(id, %method, "Request sent");
        Ok(InFlight { id, rx })
    }

    /// Send a request and wait for its response, honouring the default timeout.
    pub async fn send_request(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<Response, ClientError> {
        self.send_request_with(method, params, self.default_timeout)
            .await
    }

    pub async fn send_request_with(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Option<Duration>,
    ) -> Result<Response, ClientError> {
        let in_flight = self.start_request(method, params).await?;
        self.wait(method, in_flight, timeout).await
    }

    async fn wait(
        &self,
        method: &str,
        in_flight: InFlight,
        timeout: Option<Duration>,
    ) -> Result<Response, ClientError> {
        let InFlight { id, rx } = in_flight;
        let Some(after) = timeout else {
            return rx.await.map_err(|_| ClientError::ConnectionClosed);
        };

        match tokio::time::timeout(after, rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(ClientError::ConnectionClosed),
            Err(_) => {
                // Remove the waiter so repeated timeouts don't grow the table.
                self.pending.forget(id).await;
                tracing::warn!(id, %method, ?after, "Request timed out");
                Err(ClientError::Timeout {
                    method: method.to_string(),
                    after,
                })
            }
        }
    }

    pub async fn send_notification(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<(), ClientError> {
        if self.pending.is_closed().await {
            return Err(ClientError::ConnectionClosed);
        }
        let frame = serde_json::to_value(Notification::new(method, params)).map_err(|source| {
            ClientError::Serialize {
                method: method.to_string(),
                source,
            }
        })?;
        self.outbox.send(frame).await?;
        tracing::debug!(%method, "Notification sent");
        Ok(())
    }
}
