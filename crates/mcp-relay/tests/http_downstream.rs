//! HTTP downstream against an in-process axum server.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::http::header::CONTENT_TYPE;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use mcp_relay::Error;
use mcp_relay::downstream::{Downstream, HttpDownstream};
use mcp_relay::protocol::{Message, TUNNEL_ERROR_CODE};
use mcp_relay::storage::InMemoryStorage;
use serde_json::{Value, json};

mod common;
use common::{client, run_client, spawn_server};

type Received = Arc<Mutex<Vec<Value>>>;

async fn json_endpoint(
    State(received): State<Received>,
    axum::Json(body): axum::Json<Value>,
) -> Response {
    received.lock().unwrap().push(body.clone());
    match (body.get("id"), body.get("method")) {
        (Some(id), Some(method)) => {
            axum::Json(json!({"jsonrpc": "2.0", "id": id, "result": {"echo": method}}))
                .into_response()
        }
        _ => StatusCode::ACCEPTED.into_response(),
    }
}

async fn sse_endpoint(axum::Json(body): axum::Json<Value>) -> Response {
    let progress = json!({"jsonrpc": "2.0", "method": "notifications/progress"});
    let reply = json!({"jsonrpc": "2.0", "id": body["id"], "result": "streamed"});
    let stream = format!("event: message\ndata: {progress}\n\nevent: message\ndata: {reply}\n\n");
    ([(CONTENT_TYPE, "text/event-stream")], stream).into_response()
}

async fn wrong_id_endpoint() -> Response {
    axum::Json(json!({"jsonrpc": "2.0", "id": 999, "result": "stale"})).into_response()
}

async fn failing_endpoint() -> Response {
    (StatusCode::INTERNAL_SERVER_ERROR, "boom").into_response()
}

/// Serve `router` on an ephemeral port and return the `/mcp` URL.
async fn serve(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, router).await.unwrap() });
    format!("http://{addr}/mcp")
}

async fn recording_server() -> (String, Received) {
    let received = Received::default();
    let router = Router::new()
        .route("/mcp", post(json_endpoint))
        .with_state(received.clone());
    (serve(router).await, received)
}

fn downstream(url: &str) -> HttpDownstream {
    HttpDownstream::new(url, Duration::from_secs(5)).unwrap()
}

fn message(value: Value) -> Message {
    Message::from_value(value).unwrap()
}

#[tokio::test]
async fn test_json_reply_is_returned() {
    let (url, received) = recording_server().await;

    let reply = downstream(&url)
        .call(message(json!({"jsonrpc": "2.0", "id": 3, "method": "tools/list"})))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(
        reply.into_value(),
        json!({"jsonrpc": "2.0", "id": 3, "result": {"echo": "tools/list"}})
    );
    assert_eq!(
        *received.lock().unwrap(),
        vec![json!({"jsonrpc": "2.0", "id": 3, "method": "tools/list"})]
    );
}

#[tokio::test]
async fn test_notification_yields_no_reply() {
    let (url, received) = recording_server().await;

    let reply = downstream(&url)
        .call(message(json!({"jsonrpc": "2.0", "method": "notifications/initialized"})))
        .await
        .unwrap();

    assert!(reply.is_none());
    assert_eq!(received.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_event_stream_reply_is_extracted() {
    let url = serve(Router::new().route("/mcp", post(sse_endpoint))).await;

    let reply = downstream(&url)
        .call(message(json!({"jsonrpc": "2.0", "id": "s-1", "method": "tools/call"})))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(reply.into_value()["result"], json!("streamed"));
}

#[tokio::test]
async fn test_json_reply_for_another_id_is_rejected() {
    let url = serve(Router::new().route("/mcp", post(wrong_id_endpoint))).await;

    let result = downstream(&url)
        .call(message(json!({"jsonrpc": "2.0", "id": 2, "method": "ping"})))
        .await;

    match result {
        Err(Error::InvalidMessage(text)) => assert!(text.contains("999"), "{text}"),
        other => panic!("expected InvalidMessage, got {other:?}"),
    }
}

#[tokio::test]
async fn test_error_status_is_reported() {
    let url = serve(Router::new().route("/mcp", post(failing_endpoint))).await;

    let result = downstream(&url)
        .call(message(json!({"jsonrpc": "2.0", "id": 1, "method": "ping"})))
        .await;

    match result {
        Err(Error::HttpStatus { status, body }) => {
            assert_eq!(status, 500);
            assert_eq!(body, "boom");
        }
        other => panic!("expected HttpStatus, got {other:?}"),
    }
}

#[tokio::test]
async fn test_unreachable_endpoint_is_an_http_error() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let result = downstream(&format!("http://{addr}/mcp"))
        .call(message(json!({"jsonrpc": "2.0", "id": 1, "method": "ping"})))
        .await;
    assert!(matches!(result, Err(Error::Http(_))));
}

// ========== Through the bridges ==========

#[tokio::test]
async fn test_bridged_round_trip_over_http() {
    let (url, _) = recording_server().await;
    let storage = Arc::new(InMemoryStorage::new());
    let (server, handle) = spawn_server(&storage, Arc::new(downstream(&url)));

    let (_, lines) = run_client(
        &client(&storage, "sess-a"),
        "{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"ping\"}\n",
    )
    .await;
    assert_eq!(
        lines,
        vec![json!({"jsonrpc": "2.0", "id": 1, "result": {"echo": "ping"}})]
    );

    server.stop();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_downstream_failure_becomes_tunnel_error() {
    let url = serve(Router::new().route("/mcp", post(failing_endpoint))).await;
    let storage = Arc::new(InMemoryStorage::new());
    let (server, handle) = spawn_server(&storage, Arc::new(downstream(&url)));

    let (_, lines) = run_client(
        &client(&storage, "sess-a"),
        "{\"jsonrpc\":\"2.0\",\"id\":4,\"method\":\"tools/call\"}\n",
    )
    .await;

    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0]["id"], json!(4));
    assert_eq!(lines[0]["error"]["code"], json!(TUNNEL_ERROR_CODE));
    let text = lines[0]["error"]["message"].as_str().unwrap();
    assert!(text.starts_with("Downstream dispatch failed"), "{text}");

    server.stop();
    handle.await.unwrap().unwrap();
}
