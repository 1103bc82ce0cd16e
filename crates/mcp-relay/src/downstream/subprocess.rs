//! Child-process downstream over newline-delimited JSON-RPC.
//!
//! Every outbound request gets a relay-local integer `id` before it is
//! written to the child's stdin; the pending map is keyed by that id and the
//! original `id` is put back on the reply. Requests from different sessions
//! that happen to share an `id` therefore never collide inside the one child.
//!
//! A background task reads the child's stdout:
//!
//! - Responses are matched against the pending map; unmatched ones are dropped
//! - Requests from the child are answered with `-32601` (there is no channel
//!   back to the client)
//! - Notifications are dropped
//!
//! When stdout closes the child is considered gone: every outstanding call
//! fails with `Error::DownstreamExited` and [`Downstream::closed`] resolves.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use mcp_relay_jsonl::{JsonlReader, JsonlWriter, WarningCollector};
use serde_json::Value;
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{oneshot, watch};
use tracing::{debug, info, trace, warn};

use super::Downstream;
use crate::error::{Error, Result};
use crate::protocol::message::METHOD_NOT_FOUND_CODE;
use crate::protocol::{Message, MessageKind};

struct PendingCall {
    original_id: Value,
    reply: oneshot::Sender<Message>,
}

struct Shared {
    pending: Mutex<HashMap<u64, PendingCall>>,
    stdin: tokio::sync::Mutex<Option<JsonlWriter<ChildStdin>>>,
    exited: watch::Sender<bool>,
}

impl Shared {
    fn pending(&self) -> MutexGuard<'_, HashMap<u64, PendingCall>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn send(&self, message: &Message) -> Result<()> {
        let mut stdin = self.stdin.lock().await;
        let writer = stdin.as_mut().ok_or(Error::NotStarted)?;
        writer.send(message).await?;
        Ok(())
    }
}

/// Downstream MCP server running as a child process.
pub struct SubprocessDownstream {
    program: String,
    args: Vec<String>,
    timeout: Duration,
    next_id: AtomicU64,
    shared: Arc<Shared>,
    child: tokio::sync::Mutex<Option<Child>>,
}

impl SubprocessDownstream {
    /// Describe the child to spawn; nothing runs until [`Downstream::start`].
    #[must_use]
    pub fn new(program: impl Into<String>, args: Vec<String>, timeout: Duration) -> Self {
        let (exited, _) = watch::channel(false);
        Self {
            program: program.into(),
            args,
            timeout,
            next_id: AtomicU64::new(1),
            shared: Arc::new(Shared {
                pending: Mutex::new(HashMap::new()),
                stdin: tokio::sync::Mutex::new(None),
                exited,
            }),
            child: tokio::sync::Mutex::new(None),
        }
    }

    /// Number of calls waiting for a reply.
    #[must_use]
    pub fn pending_calls(&self) -> usize {
        self.shared.pending().len()
    }

    fn has_exited(&self) -> bool {
        *self.shared.exited.borrow()
    }

    fn spawn_failed(&self, source: std::io::Error) -> Error {
        Error::SpawnFailed {
            command: self.describe(),
            source,
        }
    }

    async fn request(&self, mut message: Message) -> Result<Option<Message>> {
        let local_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let original_id = message.id().cloned().unwrap_or(Value::Null);
        message.set_id(Value::from(local_id));

        let (reply, receiver) = oneshot::channel();
        self.shared.pending().insert(
            local_id,
            PendingCall {
                original_id,
                reply,
            },
        );

        trace!(local_id, method = message.method(), "Writing request to downstream");
        if let Err(e) = self.shared.send(&message).await {
            self.shared.pending().remove(&local_id);
            return Err(e);
        }

        match tokio::time::timeout(self.timeout, receiver).await {
            Ok(Ok(response)) => Ok(Some(response)),
            Ok(Err(_)) => Err(Error::DownstreamExited),
            Err(_) => {
                self.shared.pending().remove(&local_id);
                Err(Error::DownstreamTimeout(self.timeout))
            }
        }
    }
}

#[async_trait]
impl Downstream for SubprocessDownstream {
    async fn start(&self) -> Result<()> {
        info!(command = %self.describe(), "Starting downstream process");

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| self.spawn_failed(e))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| self.spawn_failed(std::io::Error::other("stdin was not captured")))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| self.spawn_failed(std::io::Error::other("stdout was not captured")))?;

        *self.shared.stdin.lock().await = Some(JsonlWriter::new(stdin));
        *self.child.lock().await = Some(child);
        tokio::spawn(read_loop(stdout, Arc::clone(&self.shared)));
        Ok(())
    }

    async fn call(&self, message: Message) -> Result<Option<Message>> {
        if self.has_exited() {
            return Err(Error::DownstreamExited);
        }
        if message.kind() == MessageKind::Request {
            self.request(message).await
        } else {
            self.shared.send(&message).await?;
            Ok(None)
        }
    }

    async fn closed(&self) {
        let mut exited = self.shared.exited.subscribe();
        // Err only if the sender is dropped, which cannot outlive `self`.
        let _ = exited.wait_for(|exited| *exited).await;
    }

    async fn shutdown(&self) -> Result<()> {
        // Closing stdin lets well-behaved servers exit on their own.
        self.shared.stdin.lock().await.take();

        if let Some(mut child) = self.child.lock().await.take() {
            if let Err(e) = child.kill().await {
                warn!(error = %e, "Failed to kill downstream process");
            }
            match child.wait().await {
                Ok(status) => debug!(%status, "Downstream process exited"),
                Err(e) => warn!(error = %e, "Failed to reap downstream process"),
            }
        }
        Ok(())
    }

    fn describe(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

async fn read_loop(stdout: ChildStdout, shared: Arc<Shared>) {
    let mut reader = JsonlReader::new(stdout);
    let warnings = WarningCollector::new();
    let mut skipped = 0usize;

    loop {
        let next = reader.next_value_resilient::<Value>(&warnings).await;
        // The reader already logs each bad line; only the count is kept.
        skipped += warnings.drain().len();
        match next {
            Ok(Some(value)) => handle_incoming(value, &shared).await,
            Ok(None) => {
                debug!(skipped_lines = skipped, "Downstream stdout closed");
                break;
            }
            Err(e) => {
                warn!(error = %e, "Failed to read from downstream stdout");
                break;
            }
        }
    }

    shared.exited.send_replace(true);
    let abandoned: Vec<_> = shared.pending().drain().collect();
    if !abandoned.is_empty() {
        warn!(count = abandoned.len(), "Downstream exited with calls outstanding");
    }
}

async fn handle_incoming(value: Value, shared: &Shared) {
    let mut message = match Message::from_value(value) {
        Ok(message) => message,
        Err(e) => {
            warn!(error = %e, "Ignoring invalid message from downstream");
            return;
        }
    };

    match message.kind() {
        MessageKind::Response => {
            let Some(local_id) = message.id().and_then(Value::as_u64) else {
                warn!(id = ?message.id(), "Dropping downstream response with unknown id");
                return;
            };
            let Some(call) = shared.pending().remove(&local_id) else {
                warn!(local_id, "Dropping unmatched downstream response");
                return;
            };
            message.set_id(call.original_id);
            if call.reply.send(message).is_err() {
                debug!(local_id, "Caller gave up before downstream replied");
            }
        }
        MessageKind::Request => {
            let method = message.method().unwrap_or_default().to_string();
            debug!(%method, "Rejecting server-initiated request");
            let reply = Message::error_response(
                message.id().cloned().unwrap_or(Value::Null),
                METHOD_NOT_FOUND_CODE,
                format!("Server-initiated request '{method}' cannot be relayed"),
            );
            if let Err(e) = shared.send(&reply).await {
                warn!(error = %e, "Failed to answer server-initiated request");
            }
        }
        MessageKind::Notification => {
            debug!(method = message.method(), "Dropping downstream notification");
        }
    }
}
