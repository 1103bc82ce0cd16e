//! Subprocess downstream against small `sh` scripts standing in for MCP
//! servers.

#![cfg(unix)]

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use mcp_relay::Error;
use mcp_relay::downstream::{Downstream, SubprocessDownstream};
use mcp_relay::protocol::Message;
use mcp_relay::storage::InMemoryStorage;
use serde_json::{Value, json};

mod common;
use common::{client, run_client};

/// Echo server: answers each request by renaming `"method":` to `"result":`.
const ECHO: &str = r#"while IFS= read -r line; do
  printf '%s\n' "$line" | sed 's/"method":/"result":/'
done"#;

fn shell(script: &str, extra: &[&str], timeout: Duration) -> SubprocessDownstream {
    let mut args = vec!["-c".to_string(), script.to_string(), "sh".to_string()];
    args.extend(extra.iter().map(ToString::to_string));
    SubprocessDownstream::new("sh", args, timeout)
}

fn message(value: Value) -> Message {
    Message::from_value(value).unwrap()
}

async fn wait_for_file(path: &Path) -> String {
    for _ in 0..100 {
        if let Ok(contents) = tokio::fs::read_to_string(path).await {
            if !contents.is_empty() {
                return contents;
            }
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("{} was never written", path.display());
}

#[tokio::test]
async fn test_reply_carries_the_original_id() {
    let downstream = shell(ECHO, &[], Duration::from_secs(5));
    downstream.start().await.unwrap();

    let reply = downstream
        .call(message(json!({"jsonrpc": "2.0", "id": "abc", "method": "ping"})))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        reply.into_value(),
        json!({"jsonrpc": "2.0", "id": "abc", "result": "ping"})
    );
    assert_eq!(downstream.pending_calls(), 0);

    downstream.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_log_lines_on_stdout_are_skipped() {
    let noisy = r#"echo 'starting up'
while IFS= read -r line; do
  echo 'handling request'
  echo '[1, 2]'
  printf '%s\n' "$line" | sed 's/"method":/"result":/'
done"#;
    let downstream = shell(noisy, &[], Duration::from_secs(5));
    downstream.start().await.unwrap();

    for id in 1..=3 {
        let reply = downstream
            .call(message(json!({"jsonrpc": "2.0", "id": id, "method": "ping"})))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            reply.into_value(),
            json!({"jsonrpc": "2.0", "id": id, "result": "ping"})
        );
    }

    downstream.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_colliding_ids_are_correlated_separately() {
    let downstream = shell(ECHO, &[], Duration::from_secs(5));
    downstream.start().await.unwrap();

    let (first, second) = tokio::join!(
        downstream.call(message(json!({"jsonrpc": "2.0", "id": 1, "method": "first"}))),
        downstream.call(message(json!({"jsonrpc": "2.0", "id": 1, "method": "second"}))),
    );
    let first = first.unwrap().unwrap().into_value();
    let second = second.unwrap().unwrap().into_value();

    assert_eq!(first["id"], json!(1));
    assert_eq!(first["result"], json!("first"));
    assert_eq!(second["id"], json!(1));
    assert_eq!(second["result"], json!("second"));

    downstream.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_notifications_are_written_verbatim() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("stdin.log");
    let script = r#"while IFS= read -r line; do printf '%s\n' "$line" >> "$1"; done"#;
    let downstream = shell(script, &[log.to_str().unwrap()], Duration::from_secs(5));
    downstream.start().await.unwrap();

    let reply = downstream
        .call(message(
            json!({"jsonrpc": "2.0", "method": "notifications/initialized"}),
        ))
        .await
        .unwrap();
    assert!(reply.is_none());
    assert_eq!(
        wait_for_file(&log).await,
        "{\"jsonrpc\":\"2.0\",\"method\":\"notifications/initialized\"}\n"
    );

    downstream.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_server_initiated_request_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let rejection = dir.path().join("rejection.json");
    let script = r#"printf '%s\n' '{"jsonrpc":"2.0","id":"s1","method":"sampling/createMessage"}'
while IFS= read -r line; do
  case "$line" in
    *-32601*) printf '%s\n' "$line" > "$1" ;;
    *) printf '%s\n' "$line" | sed 's/"method":/"result":/' ;;
  esac
done"#;
    let downstream = shell(script, &[rejection.to_str().unwrap()], Duration::from_secs(5));
    downstream.start().await.unwrap();

    let reply: Value = serde_json::from_str(&wait_for_file(&rejection).await).unwrap();
    assert_eq!(reply["id"], json!("s1"));
    assert_eq!(reply["error"]["code"], json!(-32601));

    // Regular traffic is unaffected.
    let echoed = downstream
        .call(message(json!({"jsonrpc": "2.0", "id": 2, "method": "ping"})))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(echoed.into_value()["result"], json!("ping"));

    downstream.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_exit_fails_outstanding_and_later_calls() {
    let downstream = shell("IFS= read -r line; exit 0", &[], Duration::from_secs(5));
    downstream.start().await.unwrap();

    let outstanding = downstream
        .call(message(json!({"jsonrpc": "2.0", "id": 1, "method": "ping"})))
        .await;
    assert!(matches!(outstanding, Err(Error::DownstreamExited)));

    tokio::time::timeout(Duration::from_secs(5), downstream.closed())
        .await
        .expect("closed() resolves after exit");
    let later = downstream
        .call(message(json!({"jsonrpc": "2.0", "id": 2, "method": "ping"})))
        .await;
    assert!(matches!(later, Err(Error::DownstreamExited)));
    assert_eq!(downstream.pending_calls(), 0);
}

#[tokio::test]
async fn test_silent_server_times_out() {
    let downstream = shell(
        "while IFS= read -r line; do :; done",
        &[],
        Duration::from_millis(200),
    );
    downstream.start().await.unwrap();

    let result = downstream
        .call(message(json!({"jsonrpc": "2.0", "id": 1, "method": "ping"})))
        .await;
    assert!(matches!(result, Err(Error::DownstreamTimeout(_))));
    assert_eq!(downstream.pending_calls(), 0);

    downstream.shutdown().await.unwrap();
}

// ========== Through the bridges ==========

#[tokio::test]
async fn test_bridged_round_trip_through_child_process() {
    let storage = Arc::new(InMemoryStorage::new());
    let (server, handle) =
        common::spawn_server(&storage, Arc::new(shell(ECHO, &[], Duration::from_secs(5))));

    let (_, lines) = run_client(
        &client(&storage, "sess-a"),
        "{\"jsonrpc\":\"2.0\",\"id\":9,\"method\":\"tools/list\"}\n",
    )
    .await;
    assert_eq!(
        lines,
        vec![json!({"jsonrpc": "2.0", "id": 9, "result": "tools/list"})]
    );

    server.stop();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_server_bridge_halts_when_child_exits() {
    let storage = Arc::new(InMemoryStorage::new());
    let (_server, handle) =
        common::spawn_server(&storage, Arc::new(shell("exit 0", &[], Duration::from_secs(5))));

    let result = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("bridge halts on its own")
        .unwrap();
    assert!(matches!(result, Err(Error::DownstreamExited)));
}
