//! Client and server bridges sharing a directory instead of a bucket, each
//! through its own `LocalStorage` handle as two hosts would.

use std::sync::Arc;
use std::time::Duration;

use mcp_relay::client::{ClientBridge, ClientOptions};
use mcp_relay::protocol::{KeyScheme, Message, SessionId};
use mcp_relay::server::{ServerBridge, ServerOptions};
use mcp_relay::storage::{LocalStorage, ObjectStorage};
use serde_json::json;
use tokio::io::AsyncReadExt;

mod common;
use common::RecordingDownstream;

#[tokio::test]
async fn test_round_trip_through_shared_directory() {
    let dir = tempfile::tempdir().unwrap();
    let client_side = Arc::new(LocalStorage::open(dir.path()).await.unwrap());
    let server_side = Arc::new(LocalStorage::open(dir.path()).await.unwrap());
    let keys = KeyScheme::new("relay");

    let server = ServerBridge::new(
        server_side,
        keys.clone(),
        Arc::new(RecordingDownstream::new()),
        ServerOptions {
            poll_interval: Duration::from_millis(20),
            upload_retries: 0,
        },
    );
    let runner = server.clone();
    let handle = tokio::spawn(async move { runner.start().await });

    let client = ClientBridge::with_session(
        client_side.clone(),
        keys,
        SessionId::new("sess-local"),
        ClientOptions {
            poll_interval: Duration::from_millis(20),
            timeout: Duration::from_secs(10),
            upload_retries: 0,
        },
    );
    let input = concat!(
        "{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"ping\"}\n",
        "{\"jsonrpc\":\"2.0\",\"method\":\"notifications/initialized\"}\n",
        "{\"jsonrpc\":\"2.0\",\"id\":\"a/b\",\"method\":\"tools/list\"}\n",
    );
    let (writer, mut reader) = tokio::io::duplex(1 << 16);
    let summary = client.run(input.as_bytes(), writer).await.unwrap();
    let mut output = String::new();
    reader.read_to_string(&mut output).await.unwrap();

    assert_eq!(summary.dispatched, 3);
    let mut lines: Vec<serde_json::Value> = output
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    lines.sort_by_key(|line| line["id"].to_string());
    assert_eq!(
        lines,
        vec![
            json!({"jsonrpc": "2.0", "id": "a/b", "result": {"method": "tools/list"}}),
            json!({"jsonrpc": "2.0", "id": 1, "result": "pong"}),
        ]
    );

    server.stop();
    handle.await.unwrap().unwrap();

    // Everything was consumed; only empty directories may remain.
    assert!(client_side.list("relay/").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_ids_that_encode_to_dot_names_are_answered() {
    let dir = tempfile::tempdir().unwrap();
    let storage = Arc::new(LocalStorage::open(dir.path()).await.unwrap());
    let server = ServerBridge::new(
        storage.clone(),
        KeyScheme::default(),
        Arc::new(RecordingDownstream::new()),
        ServerOptions {
            poll_interval: Duration::from_millis(20),
            upload_retries: 0,
        },
    );
    let runner = server.clone();
    let handle = tokio::spawn(async move { runner.start().await });

    let client = ClientBridge::with_session(
        storage,
        KeyScheme::default(),
        SessionId::new("sess-dots"),
        ClientOptions {
            poll_interval: Duration::from_millis(20),
            timeout: Duration::from_secs(5),
            upload_retries: 0,
        },
    );
    for id in [".x", ""] {
        let request = Message::from_value(json!({"jsonrpc": "2.0", "id": id, "method": "ping"}))
            .unwrap();
        let reply = client.handle_message(request).await.unwrap().into_value();
        assert_eq!(reply, json!({"jsonrpc": "2.0", "id": id, "result": "pong"}), "id {id:?}");
    }

    server.stop();
    handle.await.unwrap().unwrap();
}
