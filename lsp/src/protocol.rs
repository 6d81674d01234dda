//! JSON-RPC message types and LSP parameter builders.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::Diagnostic;

/// Method names the client sends or understands.
pub mod methods {
    pub const INITIALIZE: &str = "initialize";
    pub const INITIALIZED: &str = "initialized";
    pub const SHUTDOWN: &str = "shutdown";
    pub const EXIT: &str = "exit";
    pub const DID_OPEN: &str = "textDocument/didOpen";
    pub const DID_CHANGE: &str = "textDocument/didChange";
    pub const DID_SAVE: &str = "textDocument/didSave";
    pub const COMPLETION: &str = "textDocument/completion";
    pub const DEFINITION: &str = "textDocument/definition";
    pub const DID_CHANGE_CONFIGURATION: &str = "workspace/didChangeConfiguration";
    pub const EXECUTE_COMMAND: &str = "workspace/executeCommand";
    pub const PUBLISH_DIAGNOSTICS: &str = "textDocument/publishDiagnostics";
    pub const SHOW_MESSAGE: &str = "window/showMessage";
    pub const LOG_MESSAGE: &str = "window/logMessage";
    pub const PING: &str = "$/ping";
}

/// JSON-RPC error code for a method the client does not implement.
pub(crate) const METHOD_NOT_FOUND: i64 = -32601;

const CLIENT_NAME: &str = env!("CARGO_PKG_NAME");
const CLIENT_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Serialize)]
pub(crate) struct Request<'a> {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl<'a> Request<'a> {
    pub fn new(id: u64, method: &'a str, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            method,
            params,
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct Notification<'a> {
    pub jsonrpc: &'static str,
    pub method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl<'a> Notification<'a> {
    pub fn new(method: &'a str, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            method,
            params,
        }
    }
}

/// The reply to a request, exactly as the server sent it.
///
/// A server-side failure is data: `error` is populated and the caller
/// decides what it means.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Response {
    pub id: u64,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<Value>,
}

impl Response {
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.error.as_ref().is_some_and(|e| !e.is_null())
    }

    /// Split into the result (a missing result reads as `null`) or the raw error.
    pub fn into_result(self) -> Result<Value, Value> {
        match self.error {
            Some(error) if !error.is_null() => Err(error),
            _ => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

pub(crate) enum IncomingFrame {
    Response(Response),
    ServerRequest { id: Value, method: String },
    Notification { method: String, params: Option<Value> },
}

pub(crate) fn parse_incoming(frame: Value) -> Option<IncomingFrame> {
    let has_id = frame.get("id").is_some_and(|id| !id.is_null());
    let method = frame
        .get("method")
        .and_then(Value::as_str)
        .map(String::from);
    let has_result_or_error = frame.get("result").is_some() || frame.get("error").is_some();

    match (has_id, method, has_result_or_error) {
        (true, None, true) => serde_json::from_value(frame).ok().map(IncomingFrame::Response),
        (true, Some(method), _) => Some(IncomingFrame::ServerRequest {
            id: frame["id"].clone(),
            method,
        }),
        (false, Some(method), _) => {
            let params = frame.get("params").cloned();
            Some(IncomingFrame::Notification { method, params })
        }
        _ => None,
    }
}

pub(crate) fn method_not_found(id: Value, method: &str) -> Value {
    serde_json::json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": {
            "code": METHOD_NOT_FOUND,
            "message": format!("Method not found: {method}")
        }
    })
}

/// Workspace identity sent with `initialize`.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkspaceInfo {
    pub root_uri: String,
    pub name: String,
    /// Forwarded verbatim as `initializationOptions`.
    pub initialization_options: Option<Value>,
}

#[must_use]
pub fn initialize_params(workspace: &WorkspaceInfo) -> Value {
    let mut params = serde_json::json!({
        "processId": std::process::id(),
        "clientInfo": {
            "name": CLIENT_NAME,
            "version": CLIENT_VERSION
        },
        "rootUri": workspace.root_uri,
        "workspaceFolders": [{
            "uri": workspace.root_uri,
            "name": workspace.name
        }],
        "capabilities": {
            "workspace": {
                "configuration": true,
                "workspaceFolders": true,
                "didChangeConfiguration": {
                    "dynamicRegistration": true
                }
            },
            "textDocument": {
                "synchronization": {
                    "dynamicRegistration": true,
                    "didSave": true
                },
                "publishDiagnostics": {
                    "relatedInformation": true
                }
            }
        }
    });
    if let Some(options) = &workspace.initialization_options {
        params["initializationOptions"] = options.clone();
    }
    params
}

#[must_use]
pub fn did_open_params(uri: &str, language_id: &str, version: i32, text: &str) -> Value {
    serde_json::json!({
        "textDocument": {
            "uri": uri,
            "languageId": language_id,
            "version": version,
            "text": text
        }
    })
}

#[must_use]
pub fn did_change_params(uri: &str, version: i32, text: &str) -> Value {
    serde_json::json!({
        "textDocument": {
            "uri": uri,
            "version": version
        },
        "contentChanges": [{
            "text": text
        }]
    })
}

#[must_use]
pub fn did_save_params(uri: &str) -> Value {
    serde_json::json!({
        "textDocument": { "uri": uri }
    })
}

/// Shared shape of `completion` and `definition` requests.
#[must_use]
pub fn text_document_position_params(uri: &str, line: u32, character: u32) -> Value {
    serde_json::json!({
        "textDocument": { "uri": uri },
        "position": {
            "line": line,
            "character": character
        }
    })
}

#[must_use]
pub fn did_change_configuration_params(settings: Value) -> Value {
    serde_json::json!({ "settings": settings })
}

#[must_use]
pub fn execute_command_params(command: &str, arguments: Vec<Value>) -> Value {
    let mut params = serde_json::json!({ "command": command });
    if !arguments.is_empty() {
        params["arguments"] = Value::Array(arguments);
    }
    params
}

#[derive(Debug, Deserialize)]
pub(crate) struct PublishDiagnosticsParams {
    pub uri: String,
    pub diagnostics: Vec<Diagnostic>,
}

/// Shape shared by `window/showMessage` and `window/logMessage`.
#[derive(Debug, Deserialize)]
pub(crate) struct MessageParams {
    #[serde(rename = "type")]
    pub kind: u64,
    pub message: String,
}
