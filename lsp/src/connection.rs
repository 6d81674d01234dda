//! `Connection`: one session with one server, from connect to close.
//!
//! Construction does no I/O. [`Connection::initialize`] opens the transport
//! and runs the handshake, pumping inbound frames itself until the
//! `initialize` reply arrives. Only then is the listener spawned and the
//! connection `Ready`. [`Connection::shutdown`] runs the exit handshake,
//! cancels and joins the background tasks, and only then releases the
//! transport.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use bridge_types::{SessionSettings, TransportTarget};
use bridge_utils::normalize_document_uri;
use serde_json::Value;
use tokio::sync::oneshot::error::TryRecvError;
use tokio::sync::{broadcast, oneshot, watch};
use tokio::task::JoinHandle;

use crate::codec::FrameReader;
use crate::diagnostics::DiagnosticsStore;
use crate::error::ClientError;
use crate::lifecycle::{Lifecycle, LifecycleState};
use crate::listener::{self, Dispatcher, ListenerExit};
use crate::protocol::{self, Response, WorkspaceInfo, methods};
use crate::session::{PendingRequests, RpcSession, spawn_writer};
use crate::transport::{self, BoxedReader, Transport, TransportHandle};
use crate::types::{Diagnostic, DiagnosticsSnapshot, ServerEvent};

/// Channel capacity for server events.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Command that asks the analyzer for its display name.
const GET_SOURCE_NAME: &str = "getSourceName";

/// Where the transport comes from. Consumed by `initialize`.
enum Endpoint {
    Target(TransportTarget),
    Transport(Transport),
}

/// Background machinery that exists only while the connection is live.
struct Running {
    session: RpcSession,
    cancel: watch::Sender<bool>,
    listener: JoinHandle<ListenerExit>,
    writer: JoinHandle<()>,
    heartbeat: Option<JoinHandle<()>>,
    handle: TransportHandle,
}

impl Running {
    async fn stop(self, grace: Duration) {
        let Running {
            session,
            cancel,
            listener,
            writer,
            heartbeat,
            handle,
        } = self;

        // The listener must still be running to route the shutdown reply.
        // A wedged writer can stall even the enqueue, so bound the whole exchange.
        let exchange = async {
            match session
                .send_request_with(methods::SHUTDOWN, None, Some(grace))
                .await
            {
                Ok(response) if response.is_error() => {
                    tracing::warn!("Server rejected shutdown: {:?}", response.error);
                }
                Ok(_) => {
                    if let Err(e) = session.send_notification(methods::EXIT, None).await {
                        tracing::debug!("Failed to send exit: {e}");
                    }
                }
                Err(e) => tracing::debug!("Shutdown request failed: {e}"),
            }
        };
        if tokio::time::timeout(grace, exchange).await.is_err() {
            tracing::warn!(?grace, "Shutdown exchange stalled");
        }

        cancel.send_replace(true);
        if let Some(heartbeat) = heartbeat {
            join_within("heartbeat", heartbeat, grace).await;
        }
        if let Some(exit) = join_within("listener", listener, grace).await {
            tracing::debug!(?exit, "Listener stopped");
        }

        session.outbox().close();
        drop(session);
        join_within("writer", writer, grace).await;
        handle.close(grace).await;
    }
}

/// Wait up to `grace` for a background task, aborting it after that.
async fn join_within<T>(name: &str, mut task: JoinHandle<T>, grace: Duration) -> Option<T> {
    match tokio::time::timeout(grace, &mut task).await {
        Ok(Ok(value)) => Some(value),
        Ok(Err(e)) => {
            tracing::warn!(task = name, "Task failed: {e}");
            None
        }
        Err(_) => {
            tracing::warn!(task = name, ?grace, "Task did not stop in time, aborting");
            task.abort();
            None
        }
    }
}

/// A client session with a single language/analysis server.
pub struct Connection {
    endpoint: Option<Endpoint>,
    settings: SessionSettings,
    lifecycle: Lifecycle,
    diagnostics: DiagnosticsStore,
    events: broadcast::Sender<ServerEvent>,
    runtime: Option<Running>,
    /// Last version sent per document URI.
    versions: Mutex<HashMap<String, i32>>,
    capabilities: Option<Value>,
}

impl Connection {
    #[must_use]
    pub fn new(target: TransportTarget, settings: SessionSettings) -> Self {
        Self::with_endpoint(Endpoint::Target(target), settings)
    }

    /// Use an already opened transport instead of connecting.
    #[must_use]
    pub fn from_transport(transport: Transport, settings: SessionSettings) -> Self {
        Self::with_endpoint(Endpoint::Transport(transport), settings)
    }

    fn with_endpoint(endpoint: Endpoint, settings: SessionSettings) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            endpoint: Some(endpoint),
            settings,
            lifecycle: Lifecycle::new(),
            diagnostics: DiagnosticsStore::new(),
            events,
            runtime: None,
            versions: Mutex::new(HashMap::new()),
            capabilities: None,
        }
    }

    #[must_use]
    pub fn state(&self) -> LifecycleState {
        self.lifecycle.state()
    }

    #[must_use]
    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    /// The `capabilities` object from the `initialize` reply, once `Ready`.
    #[must_use]
    pub fn capabilities(&self) -> Option<&Value> {
        self.capabilities.as_ref()
    }

    /// Receive server events from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.events.subscribe()
    }

    /// Connect and run the `initialize` / `initialized` handshake.
    ///
    /// Returns the `result` of the `initialize` reply. Any failure leaves the
    /// connection `Closed`; it never becomes `Ready`.
    pub async fn initialize(&mut self, workspace: &WorkspaceInfo) -> Result<Value, ClientError> {
        self.lifecycle.advance(LifecycleState::Connecting)?;

        let transport = match self.endpoint.take() {
            Some(Endpoint::Target(target)) => match transport::connect(&target).await {
                Ok(transport) => transport,
                Err(e) => {
                    self.lifecycle.advance(LifecycleState::Closed)?;
                    return Err(e.into());
                }
            },
            Some(Endpoint::Transport(transport)) => transport,
            None => {
                self.lifecycle.advance(LifecycleState::Closed)?;
                return Err(ClientError::ConnectionClosed);
            }
        };
        self.lifecycle.advance(LifecycleState::Initializing)?;

        let (reader, writer, handle) = transport.into_parts();
        let (outbox, writer) = spawn_writer(writer);
        let pending = Arc::new(PendingRequests::new());
        let session = RpcSession::new(
            outbox.clone(),
            pending.clone(),
            self.settings.request_timeout(),
        );
        let dispatcher = Dispatcher::new(
            pending,
            self.diagnostics.clone(),
            self.events.clone(),
            outbox.clone(),
        );
        let mut reader = FrameReader::new(reader);

        let outcome = self
            .handshake(&session, &mut reader, &dispatcher, workspace)
            .await;
        let result = match outcome {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!("Handshake failed: {e}");
                let grace = self.settings.shutdown_timeout();
                outbox.close();
                drop((session, dispatcher, outbox));
                join_within("writer", writer, grace).await;
                handle.close(grace).await;
                self.lifecycle.advance(LifecycleState::Closed)?;
                return Err(e);
            }
        };

        let (cancel, cancel_rx) = watch::channel(false);
        let listener = listener::spawn(reader, dispatcher, cancel_rx.clone());
        let heartbeat = self
            .settings
            .heartbeat_interval()
            .map(|interval| listener::spawn_heartbeat(outbox, interval, cancel_rx));

        self.capabilities = result.get("capabilities").cloned();
        self.runtime = Some(Running {
            session,
            cancel,
            listener,
            writer,
            heartbeat,
            handle,
        });
        self.lifecycle.advance(LifecycleState::Ready)?;
        tracing::info!(root = %workspace.root_uri, "Connection ready");
        Ok(result)
    }

    async fn handshake(
        &self,
        session: &RpcSession,
        reader: &mut FrameReader<BoxedReader>,
        dispatcher: &Dispatcher,
        workspace: &WorkspaceInfo,
    ) -> Result<Value, ClientError> {
        let params = protocol::initialize_params(workspace);
        let in_flight = session
            .start_request(methods::INITIALIZE, Some(params))
            .await?;

        let response = match self.settings.request_timeout() {
            Some(after) => {
                tokio::time::timeout(after, pump_until_reply(reader, dispatcher, in_flight.rx))
                    .await
                    .map_err(|_| ClientError::Timeout {
                        method: methods::INITIALIZE.to_string(),
                        after,
                    })??
            }
            None => pump_until_reply(reader, dispatcher, in_flight.rx).await?,
        };

        let result = response
            .into_result()
            .map_err(ClientError::InitializeRejected)?;
        session
            .send_notification(methods::INITIALIZED, Some(serde_json::json!({})))
            .await?;
        Ok(result)
    }

    fn session(&self) -> Result<&RpcSession, ClientError> {
        match self.lifecycle.state() {
            LifecycleState::Ready => self
                .runtime
                .as_ref()
                .map(|running| &running.session)
                .ok_or(ClientError::ConnectionClosed),
            LifecycleState::ShuttingDown | LifecycleState::Closed => {
                Err(ClientError::ConnectionClosed)
            }
            state => Err(ClientError::NotReady(state)),
        }
    }

    /// Send a request and wait for the server's reply.
    ///
    /// A reply carrying `error` is returned as-is; check
    /// [`Response::is_error`]. The configured request timeout applies.
    pub async fn send_request(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<Response, ClientError> {
        self.session()?.send_request(method, params).await
    }

    /// Like [`send_request`](Self::send_request) with an explicit deadline.
    pub async fn send_request_timeout(
        &self,
        method: &str,
        params: Option<Value>,
        after: Duration,
    ) -> Result<Response, ClientError> {
        self.session()?
            .send_request_with(method, params, Some(after))
            .await
    }

    pub async fn send_notification(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<(), ClientError> {
        self.session()?.send_notification(method, params).await
    }

    /// Leave the session: `shutdown` + `exit`, then stop tasks and close.
    ///
    /// A no-op when never initialized or already closed.
    pub async fn shutdown(&mut self) {
        match self.lifecycle.state() {
            LifecycleState::Uninitialized | LifecycleState::Closed => return,
            _ => {}
        }
        if let Err(e) = self.lifecycle.advance(LifecycleState::ShuttingDown) {
            tracing::debug!("{e}");
        }

        if let Some(running) = self.runtime.take() {
            running.stop(self.settings.shutdown_timeout()).await;
        }

        if let Err(e) = self.lifecycle.advance(LifecycleState::Closed) {
            tracing::debug!("{e}");
        }
        tracing::info!("Connection closed");
    }

    /// The last diagnostics published for `uri`, or empty.
    #[must_use]
    pub fn diagnostics(&self, uri: &str) -> Vec<Diagnostic> {
        self.diagnostics.get(uri)
    }

    #[must_use]
    pub fn diagnostics_snapshot(&self) -> DiagnosticsSnapshot {
        self.diagnostics.snapshot()
    }

    /// Send `textDocument/didOpen` with version 1. Returns the URI used.
    pub async fn open_document(
        &self,
        uri: &str,
        text: &str,
        language_id: &str,
    ) -> Result<String, ClientError> {
        let uri = normalize_document_uri(uri);
        let params = protocol::did_open_params(&uri, language_id, 1, text);
        self.send_notification(methods::DID_OPEN, Some(params))
            .await?;
        self.record_version(&uri, 1);
        Ok(uri)
    }

    /// Send the full new content of `uri` as `textDocument/didChange`.
    pub async fn did_change(&self, uri: &str, text: &str, version: i32) -> Result<(), ClientError> {
        let uri = normalize_document_uri(uri);
        let params = protocol::did_change_params(&uri, version, text);
        self.send_notification(methods::DID_CHANGE, Some(params))
            .await?;
        self.record_version(&uri, version);
        Ok(())
    }

    /// Open `uri` the first time, send a change with the next version after.
    ///
    /// Returns the version sent.
    pub async fn sync_document(
        &self,
        uri: &str,
        language_id: &str,
        text: &str,
    ) -> Result<i32, ClientError> {
        let normalized = normalize_document_uri(uri);
        let last = self
            .versions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&normalized)
            .copied();
        match last {
            Some(version) => {
                let next = version.saturating_add(1);
                self.did_change(&normalized, text, next).await?;
                Ok(next)
            }
            None => {
                self.open_document(&normalized, text, language_id).await?;
                Ok(1)
            }
        }
    }

    fn record_version(&self, uri: &str, version: i32) {
        self.versions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(uri.to_string(), version);
    }

    pub async fn did_save(&self, uri: &str) -> Result<(), ClientError> {
        let uri = normalize_document_uri(uri);
        self.send_notification(methods::DID_SAVE, Some(protocol::did_save_params(&uri)))
            .await
    }

    pub async fn completion(
        &self,
        uri: &str,
        line: u32,
        character: u32,
    ) -> Result<Response, ClientError> {
        let uri = normalize_document_uri(uri);
        let params = protocol::text_document_position_params(&uri, line, character);
        self.send_request(methods::COMPLETION, Some(params)).await
    }

    pub async fn definition(
        &self,
        uri: &str,
        line: u32,
        character: u32,
    ) -> Result<Response, ClientError> {
        let uri = normalize_document_uri(uri);
        let params = protocol::text_document_position_params(&uri, line, character);
        self.send_request(methods::DEFINITION, Some(params)).await
    }

    pub async fn did_change_configuration(&self, settings: Value) -> Result<(), ClientError> {
        let params = protocol::did_change_configuration_params(settings);
        self.send_notification(methods::DID_CHANGE_CONFIGURATION, Some(params))
            .await
    }

    pub async fn execute_command(
        &self,
        command: &str,
        arguments: Vec<Value>,
    ) -> Result<Response, ClientError> {
        let params = protocol::execute_command_params(command, arguments);
        self.send_request(methods::EXECUTE_COMMAND, Some(params))
            .await
    }

    /// The analyzer's display name, if the server reports one.
    pub async fn source_name(&self) -> Result<Option<String>, ClientError> {
        let response = self.execute_command(GET_SOURCE_NAME, Vec::new()).await?;
        Ok(response
            .into_result()
            .ok()
            .and_then(|result| result.as_str().map(String::from)))
    }
}

/// Read and dispatch frames until `rx` holds the reply.
async fn pump_until_reply(
    reader: &mut FrameReader<BoxedReader>,
    dispatcher: &Dispatcher,
    mut rx: oneshot::Receiver<Response>,
) -> Result<Response, ClientError> {
    loop {
        match rx.try_recv() {
            Ok(response) => return Ok(response),
            Err(TryRecvError::Closed) => return Err(ClientError::ConnectionClosed),
            Err(TryRecvError::Empty) => {}
        }
        match reader.read_frame().await {
            Ok(Some(frame)) => dispatcher.handle(frame).await,
            Ok(None) => {
                dispatcher.stream_closed().await;
                return Err(ClientError::ConnectionClosed);
            }
            Err(e) => {
                tracing::warn!("Read from server failed during handshake: {e}");
                dispatcher.stream_closed().await;
                return Err(ClientError::ConnectionClosed);
            }
        }
    }
}
