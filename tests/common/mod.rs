//! Shared test utilities and fixtures
//!
//! An in-process mock server joined to the client by `tokio::io::duplex`.
//! It records every inbound message and answers requests through a
//! caller-supplied responder.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use bridge_lsp::{
    Connection, Frame, FrameReader, FrameWriter, ServerEvent, Transport, WorkspaceInfo,
};
use bridge_types::SessionSettings;
use serde_json::{Value, json};
use tokio::sync::{broadcast, mpsc};

const WAIT_LIMIT: Duration = Duration::from_secs(5);

pub type Responder = Box<dyn Fn(&Value) -> Vec<Value> + Send + Sync>;

enum Outbound {
    Bytes(Vec<u8>),
    Close,
}

pub struct MockServer {
    received: Arc<Mutex<Vec<Value>>>,
    outbound: mpsc::UnboundedSender<Outbound>,
}

impl MockServer {
    /// Start a mock server and return the client side of its transport.
    pub fn start(responder: Responder) -> (Transport, Self) {
        let (client, server) = tokio::io::duplex(256 * 1024);
        let (client_read, client_write) = tokio::io::split(client);
        let (server_read, server_write) = tokio::io::split(server);

        let received = Arc::new(Mutex::new(Vec::new()));
        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<Outbound>();

        tokio::spawn(async move {
            let mut writer = FrameWriter::new(server_write);
            while let Some(item) = outbound_rx.recv().await {
                match item {
                    Outbound::Bytes(bytes) => {
                        if writer.write_raw(&bytes).await.is_err() {
                            break;
                        }
                    }
                    Outbound::Close => break,
                }
            }
            let _ = writer.shutdown().await;
        });

        let log = received.clone();
        let replies = outbound.clone();
        tokio::spawn(async move {
            let mut reader = FrameReader::new(server_read);
            while let Ok(Some(frame)) = reader.read_frame().await {
                let Frame::Message(message) = frame else {
                    continue;
                };
                log.lock().unwrap().push(message.clone());
                for reply in responder(&message) {
                    let bytes = bridge_lsp::codec::encode(&reply).unwrap();
                    if replies.send(Outbound::Bytes(bytes)).is_err() {
                        return;
                    }
                }
            }
        });

        (
            Transport::from_streams(client_read, client_write),
            Self { received, outbound },
        )
    }

    /// Push a message to the client.
    pub fn push(&self, message: Value) {
        let bytes = bridge_lsp::codec::encode(&message).unwrap();
        self.push_raw(bytes);
    }

    /// Push bytes to the client without framing them.
    pub fn push_raw(&self, bytes: impl Into<Vec<u8>>) {
        let _ = self.outbound.send(Outbound::Bytes(bytes.into()));
    }

    /// Close the server's write side; the client sees end of stream.
    pub fn close(&self) {
        let _ = self.outbound.send(Outbound::Close);
    }

    pub fn received(&self) -> Vec<Value> {
        self.received.lock().unwrap().clone()
    }

    /// Methods of every message received so far, in arrival order.
    pub fn received_methods(&self) -> Vec<String> {
        self.received()
            .iter()
            .filter_map(|m| m["method"].as_str().map(String::from))
            .collect()
    }

    /// Wait until a received message satisfies `pred` and return it.
    pub async fn wait_for(&self, pred: impl Fn(&Value) -> bool) -> Value {
        let found = tokio::time::timeout(WAIT_LIMIT, async {
            loop {
                if let Some(message) = self.received().into_iter().find(|m| pred(m)) {
                    return message;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await;
        found.expect("mock server never received the expected message")
    }

    pub async fn wait_for_method(&self, method: &str) -> Value {
        self.wait_for(|m| m["method"] == method).await
    }
}

/// Successful reply to the request `request`.
pub fn reply(request: &Value, result: Value) -> Value {
    json!({ "jsonrpc": "2.0", "id": request["id"].clone(), "result": result })
}

pub fn error_reply(request: &Value, code: i64, message: &str) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": request["id"].clone(),
        "error": { "code": code, "message": message }
    })
}

fn is_request(message: &Value) -> bool {
    message.get("id").is_some() && message.get("method").is_some()
}

/// Answers `initialize` with empty capabilities, `getSourceName` with a name,
/// and every other request with `{"echo": method}`. Requests whose method
/// starts with `test/hang` are never answered.
pub fn standard_reply(message: &Value) -> Vec<Value> {
    if !is_request(message) {
        return Vec::new();
    }
    let method = message["method"].as_str().unwrap_or_default();
    match method {
        "initialize" => vec![reply(message, json!({ "capabilities": {} }))],
        "shutdown" => vec![reply(message, Value::Null)],
        "workspace/executeCommand" if message["params"]["command"] == "getSourceName" => {
            vec![reply(message, json!("MockAnalyzer"))]
        }
        m if m.starts_with("test/hang") => Vec::new(),
        m => vec![reply(message, json!({ "echo": m }))],
    }
}

pub fn standard_responder() -> Responder {
    Box::new(standard_reply)
}

pub fn workspace() -> WorkspaceInfo {
    WorkspaceInfo {
        root_uri: "file:///workspace".to_string(),
        name: "DemoProject".to_string(),
        initialization_options: None,
    }
}

/// A connection to a mock server, not yet initialized.
pub fn mock_connection(
    responder: Responder,
    settings: SessionSettings,
) -> (Connection, MockServer) {
    let (transport, server) = MockServer::start(responder);
    (Connection::from_transport(transport, settings), server)
}

/// A `Ready` connection to a mock server using [`standard_reply`].
pub async fn ready_connection() -> (Connection, MockServer) {
    let (mut connection, server) = mock_connection(standard_responder(), SessionSettings::default());
    connection.initialize(&workspace()).await.unwrap();
    (connection, server)
}

/// Wait for the next event satisfying `pred`.
pub async fn next_event(
    events: &mut broadcast::Receiver<ServerEvent>,
    pred: impl Fn(&ServerEvent) -> bool,
) -> ServerEvent {
    let found = tokio::time::timeout(WAIT_LIMIT, async {
        loop {
            match events.recv().await {
                Ok(event) if pred(&event) => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => panic!("event channel closed"),
            }
        }
    })
    .await;
    found.expect("expected event never arrived")
}

pub fn publish_diagnostics(uri: &str, messages: &[&str]) -> Value {
    let diagnostics: Vec<Value> = messages
        .iter()
        .map(|m| diagnostic(1, m))
        .collect();
    json!({
        "jsonrpc": "2.0",
        "method": "textDocument/publishDiagnostics",
        "params": { "uri": uri, "diagnostics": diagnostics }
    })
}

pub fn diagnostic(severity: u64, message: &str) -> Value {
    json!({
        "range": {
            "start": { "line": 2, "character": 4 },
            "end": { "line": 2, "character": 9 }
        },
        "severity": severity,
        "source": "mock",
        "message": message
    })
}
