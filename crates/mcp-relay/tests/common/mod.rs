//! Common test utilities shared across integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use mcp_relay::client::{ClientBridge, ClientOptions, RunSummary};
use mcp_relay::downstream::Downstream;
use mcp_relay::protocol::{KeyScheme, Message, MessageKind, SessionId};
use mcp_relay::server::{ServerBridge, ServerOptions};
use mcp_relay::storage::{InMemoryStorage, ObjectStorage};
use serde_json::{Value, json};
use tokio::io::AsyncReadExt;
use tokio::task::JoinHandle;

/// Downstream that records every message and answers requests itself.
///
/// `ping` is answered with `"pong"`; any other method with
/// `{"method": <method>}`. Per-method delays simulate slow tools.
#[derive(Default)]
pub struct RecordingDownstream {
    received: Mutex<Vec<Vec<u8>>>,
    delays: HashMap<String, Duration>,
}

impl RecordingDownstream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(mut self, method: &str, delay: Duration) -> Self {
        self.delays.insert(method.to_string(), delay);
        self
    }

    /// Compact serializations of every message received, in arrival order.
    pub fn received(&self) -> Vec<String> {
        self.received
            .lock()
            .unwrap()
            .iter()
            .map(|bytes| String::from_utf8(bytes.clone()).unwrap())
            .collect()
    }
}

#[async_trait]
impl Downstream for RecordingDownstream {
    async fn call(&self, message: Message) -> mcp_relay::Result<Option<Message>> {
        self.received.lock().unwrap().push(message.to_vec()?);

        let method = message.method().unwrap_or_default().to_string();
        if let Some(delay) = self.delays.get(&method) {
            tokio::time::sleep(*delay).await;
        }
        if message.kind() != MessageKind::Request {
            return Ok(None);
        }

        let result = if method == "ping" {
            json!("pong")
        } else {
            json!({ "method": method })
        };
        let reply = json!({"jsonrpc": "2.0", "id": message.id(), "result": result});
        Ok(Some(Message::from_value(reply)?))
    }

    fn describe(&self) -> String {
        "recording".to_string()
    }
}

pub fn client_options() -> ClientOptions {
    ClientOptions {
        poll_interval: Duration::from_millis(250),
        timeout: Duration::from_secs(30),
        upload_retries: 0,
    }
}

pub fn server_options() -> ServerOptions {
    ServerOptions {
        poll_interval: Duration::from_millis(100),
        upload_retries: 0,
    }
}

pub fn client(storage: &Arc<InMemoryStorage>, session: &str) -> ClientBridge {
    ClientBridge::with_session(
        storage.clone(),
        KeyScheme::default(),
        SessionId::new(session),
        client_options(),
    )
}

/// Start a server bridge in the background.
pub fn spawn_server(
    storage: &Arc<InMemoryStorage>,
    downstream: Arc<dyn Downstream>,
) -> (ServerBridge, JoinHandle<mcp_relay::Result<()>>) {
    let bridge = ServerBridge::new(
        storage.clone(),
        KeyScheme::default(),
        downstream,
        server_options(),
    );
    let runner = bridge.clone();
    let handle = tokio::spawn(async move { runner.start().await });
    (bridge, handle)
}

/// Feed `input` to a client bridge and collect every line it writes.
pub async fn run_client(bridge: &ClientBridge, input: &str) -> (RunSummary, Vec<Value>) {
    let (writer, mut reader) = tokio::io::duplex(1 << 16);
    let summary = bridge.run(input.as_bytes(), writer).await.unwrap();

    let mut output = String::new();
    reader.read_to_string(&mut output).await.unwrap();
    let lines = output
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    (summary, lines)
}

/// Keys currently in the bucket under `dir` (`requests` or `responses`).
pub async fn keys_under(storage: &InMemoryStorage, dir: &str) -> Vec<String> {
    storage.list(&format!("mcp-relay/{dir}/")).await.unwrap()
}
