//! Handshake, shutdown, and stream-close behavior of `Connection`.

use std::time::Duration;

use bridge_lsp::{
    ClientError, Connection, Frame, FrameReader, FrameWriter, LifecycleState, ServerEvent,
    Transport,
};
use bridge_types::{LaunchSpec, SessionSettings, TransportTarget};
use serde_json::json;

use crate::common::{
    error_reply, mock_connection, next_event, publish_diagnostics,
    ready_connection, reply, standard_reply, standard_responder, workspace,
};

#[tokio::test]
async fn initialize_reaches_ready_and_starts_listener() {
    let (mut connection, server) =
        mock_connection(standard_responder(), SessionSettings::default());
    assert_eq!(connection.state(), LifecycleState::Uninitialized);

    let result = connection.initialize(&workspace()).await.unwrap();
    assert_eq!(result, json!({ "capabilities": {} }));
    assert_eq!(connection.state(), LifecycleState::Ready);
    assert_eq!(connection.capabilities(), Some(&json!({})));

    let init = server.wait_for_method("initialize").await;
    assert_eq!(init["id"], 1);
    assert_eq!(init["params"]["rootUri"], "file:///workspace");
    server.wait_for_method("initialized").await;
    assert_eq!(server.received_methods(), ["initialize", "initialized"]);

    // The listener is live: a pushed notification lands in the store.
    let mut events = connection.subscribe();
    server.push(publish_diagnostics("file:///a.java", &["d1"]));
    next_event(&mut events, |e| matches!(e, ServerEvent::Diagnostics { .. })).await;
    assert_eq!(connection.diagnostics("file:///a.java").len(), 1);

    connection.shutdown().await;
}

#[tokio::test]
async fn notifications_during_handshake_are_dispatched() {
    let responder = Box::new(|message: &serde_json::Value| {
        if message["method"] == "initialize" {
            vec![
                json!({
                    "jsonrpc": "2.0",
                    "method": "window/showMessage",
                    "params": { "type": 3, "message": "indexing" }
                }),
                json!({
                    "jsonrpc": "2.0",
                    "id": "cfg-1",
                    "method": "workspace/configuration",
                    "params": { "items": [] }
                }),
                reply(message, json!({ "capabilities": { "hoverProvider": true } })),
            ]
        } else {
            standard_reply(message)
        }
    });
    let (mut connection, server) = mock_connection(responder, SessionSettings::default());
    let mut events = connection.subscribe();

    connection.initialize(&workspace()).await.unwrap();
    assert_eq!(
        connection.capabilities().unwrap()["hoverProvider"],
        json!(true)
    );

    let event = next_event(&mut events, |e| matches!(e, ServerEvent::ShowMessage { .. })).await;
    assert!(matches!(event, ServerEvent::ShowMessage { message, .. } if message == "indexing"));

    let answer = server.wait_for(|m| m["id"] == "cfg-1").await;
    assert_eq!(answer["error"]["code"], -32601);

    connection.shutdown().await;
}

#[tokio::test]
async fn initialize_error_never_reaches_ready() {
    let responder = Box::new(|message: &serde_json::Value| {
        if message["method"] == "initialize" {
            vec![error_reply(message, -32002, "workspace missing")]
        } else {
            standard_reply(message)
        }
    });
    let (mut connection, server) = mock_connection(responder, SessionSettings::default());

    let err = connection.initialize(&workspace()).await.unwrap_err();
    match err {
        ClientError::InitializeRejected(error) => assert_eq!(error["code"], -32002),
        other => panic!("expected InitializeRejected, got {other:?}"),
    }
    assert_eq!(connection.state(), LifecycleState::Closed);
    assert!(!server.received_methods().contains(&"initialized".to_string()));

    let err = connection.send_request("textDocument/completion", None).await.unwrap_err();
    assert!(err.is_closed());
}

#[tokio::test]
async fn server_closing_during_handshake_fails_initialize() {
    let responder = Box::new(|_: &serde_json::Value| Vec::<serde_json::Value>::new());
    let (mut connection, server) = mock_connection(responder, SessionSettings::default());
    server.close();

    let err = connection.initialize(&workspace()).await.unwrap_err();
    assert!(err.is_closed());
    assert_eq!(connection.state(), LifecycleState::Closed);
}

#[tokio::test]
async fn handshake_honours_request_timeout() {
    let responder = Box::new(|_: &serde_json::Value| Vec::<serde_json::Value>::new());
    let settings =
        SessionSettings::default().with_request_timeout(Some(Duration::from_millis(50)));
    let (mut connection, _server) = mock_connection(responder, settings);

    let err = connection.initialize(&workspace()).await.unwrap_err();
    assert!(matches!(err, ClientError::Timeout { ref method, .. } if method == "initialize"));
    assert_eq!(connection.state(), LifecycleState::Closed);
}

#[tokio::test]
async fn unreachable_program_is_connection_error() {
    let target = TransportTarget::Launch(
        LaunchSpec::new("definitely-not-a-real-analyzer-binary", Vec::new()).unwrap(),
    );
    let mut connection = Connection::new(target, SessionSettings::default());

    let err = connection.initialize(&workspace()).await.unwrap_err();
    assert!(matches!(err, ClientError::Connection(_)));
    assert_eq!(connection.state(), LifecycleState::Closed);
}

#[tokio::test]
async fn initialize_twice_is_rejected() {
    let (mut connection, _server) = ready_connection().await;
    let err = connection.initialize(&workspace()).await.unwrap_err();
    assert!(matches!(err, ClientError::Lifecycle(_)));
    assert_eq!(connection.state(), LifecycleState::Ready);
    connection.shutdown().await;
}

#[tokio::test]
async fn requests_before_initialize_are_not_ready() {
    let (connection, _server) = mock_connection(standard_responder(), SessionSettings::default());
    let err = connection.send_request("textDocument/completion", None).await.unwrap_err();
    assert!(matches!(
        err,
        ClientError::NotReady(LifecycleState::Uninitialized)
    ));
}

#[tokio::test]
async fn shutdown_before_initialize_is_a_noop() {
    let (mut connection, server) =
        mock_connection(standard_responder(), SessionSettings::default());
    connection.shutdown().await;
    connection.shutdown().await;
    assert_eq!(connection.state(), LifecycleState::Uninitialized);
    assert!(server.received().is_empty());

    // Still usable afterwards.
    connection.initialize(&workspace()).await.unwrap();
    assert_eq!(connection.state(), LifecycleState::Ready);
    connection.shutdown().await;
}

#[tokio::test]
async fn shutdown_sends_shutdown_then_exit_and_closes() {
    let (mut connection, server) = ready_connection().await;
    connection.shutdown().await;
    assert_eq!(connection.state(), LifecycleState::Closed);

    server.wait_for_method("exit").await;
    assert_eq!(
        server.received_methods(),
        ["initialize", "initialized", "shutdown", "exit"]
    );

    // Twice in a row is fine and sends nothing more.
    connection.shutdown().await;
    assert_eq!(connection.state(), LifecycleState::Closed);
    assert_eq!(server.received().len(), 4);
}

#[tokio::test]
async fn closed_connection_refuses_requests_but_keeps_diagnostics() {
    let (mut connection, server) = ready_connection().await;
    let mut events = connection.subscribe();
    server.push(publish_diagnostics("file:///a.java", &["d1", "d2"]));
    next_event(&mut events, |e| matches!(e, ServerEvent::Diagnostics { .. })).await;

    connection.shutdown().await;

    let err = connection.send_request("textDocument/completion", None).await.unwrap_err();
    assert!(err.is_closed());
    let err = connection.send_notification("textDocument/didSave", None).await.unwrap_err();
    assert!(err.is_closed());

    let cached = connection.diagnostics("file:///a.java");
    let messages: Vec<_> = cached.iter().filter_map(|d| d.message()).collect();
    assert_eq!(messages, ["d1", "d2"]);
}

#[tokio::test]
async fn shutdown_survives_unresponsive_server() {
    let responder = Box::new(|message: &serde_json::Value| {
        if message["method"] == "shutdown" {
            Vec::new()
        } else {
            standard_reply(message)
        }
    });
    let settings = SessionSettings::default().with_shutdown_timeout(Duration::from_millis(50));
    let (mut connection, server) = mock_connection(responder, settings);
    connection.initialize(&workspace()).await.unwrap();

    connection.shutdown().await;
    assert_eq!(connection.state(), LifecycleState::Closed);
    server.wait_for_method("shutdown").await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    // No reply to shutdown, so no exit either.
    assert_eq!(
        server.received_methods(),
        ["initialize", "initialized", "shutdown"]
    );
}

#[tokio::test]
async fn shutdown_is_bounded_when_server_stops_reading() {
    let (client, server) = tokio::io::duplex(4096);
    let (client_read, client_write) = tokio::io::split(client);
    let (server_read, server_write) = tokio::io::split(server);
    let mut server_reader = FrameReader::new(server_read);
    let mut server_writer = FrameWriter::new(server_write);

    let settings = SessionSettings::default().with_shutdown_timeout(Duration::from_millis(100));
    let mut connection =
        Connection::from_transport(Transport::from_streams(client_read, client_write), settings);

    // Answer initialize, then never read again.
    let workspace = workspace();
    let (result, ()) = tokio::join!(connection.initialize(&workspace), async {
        let Some(Frame::Message(request)) = server_reader.read_frame().await.unwrap() else {
            panic!("expected initialize");
        };
        server_writer
            .write_frame(&reply(&request, json!({ "capabilities": {} })))
            .await
            .unwrap();
    });
    result.unwrap();

    let text = "x".repeat(64 * 1024);
    connection
        .open_document("file:///big.txt", &text, "plaintext")
        .await
        .unwrap();

    tokio::time::timeout(Duration::from_secs(3), connection.shutdown())
        .await
        .expect("shutdown should finish within its grace periods");
    assert_eq!(connection.state(), LifecycleState::Closed);
    drop((server_reader, server_writer));
}

#[tokio::test]
async fn peer_close_releases_pending_requests() {
    let (mut connection, server) = ready_connection().await;
    let mut events = connection.subscribe();

    let (result, ()) = tokio::join!(
        connection.send_request("test/hang", None),
        async {
            server.wait_for_method("test/hang").await;
            server.close();
        }
    );
    assert!(result.unwrap_err().is_closed());
    next_event(&mut events, |e| *e == ServerEvent::StreamClosed).await;

    let err = connection.send_request("textDocument/completion", None).await.unwrap_err();
    assert!(err.is_closed());

    connection.shutdown().await;
    assert_eq!(connection.state(), LifecycleState::Closed);
}

#[tokio::test]
async fn heartbeat_is_off_by_default() {
    let (mut connection, server) = ready_connection().await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!server.received_methods().iter().any(|m| m == "$/ping"));
    connection.shutdown().await;
}

#[tokio::test]
async fn heartbeat_pings_while_ready() {
    let settings =
        SessionSettings::default().with_heartbeat_interval(Some(Duration::from_millis(10)));
    let (mut connection, server) = mock_connection(standard_responder(), settings);
    connection.initialize(&workspace()).await.unwrap();

    let ping = server.wait_for_method("$/ping").await;
    assert!(ping.get("id").is_none());

    connection.shutdown().await;
    let count_pings = |methods: Vec<String>| methods.iter().filter(|m| *m == "$/ping").count();
    tokio::time::sleep(Duration::from_millis(40)).await;
    let pings = count_pings(server.received_methods());
    tokio::time::sleep(Duration::from_millis(40)).await;
    let after = count_pings(server.received_methods());
    assert_eq!(pings, after, "heartbeat kept running after shutdown");
}
