//! Client bridge: the stdio end an MCP host launches.
//!
//! Each line read from stdin is one JSON-RPC message. Requests are uploaded
//! as request objects and then polled for a response object; notifications
//! (and client-side responses) are uploaded and forgotten. Every message is
//! handled on its own task, and all output funnels through one writer task so
//! concurrent responses never interleave on stdout.
//!
//! A request always ends with exactly one line on stdout: the downstream's
//! response, or a `-32000` error if the tunnel could not deliver one.

use std::sync::Arc;
use std::time::Duration;

use mcp_relay_jsonl::{JsonlReader, JsonlWriter, Warning, WarningCollector};
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn};

use crate::error::{Error, Result};
use crate::protocol::{
    BridgeMetadata, CONTENT_TYPE_JSON, KeyScheme, Message, RequestId, SessionId,
    TUNNEL_ERROR_CODE, envelope,
};
use crate::storage::{ObjectStorage, put_with_retries};

/// Error message emitted when no response arrives before the deadline.
pub const TIMEOUT_MESSAGE: &str = "Tunnel timeout waiting for response";

/// Error message emitted when the response object is not a valid message.
pub const MALFORMED_RESPONSE_MESSAGE: &str = "Tunnel received malformed response";

const OUTPUT_BUFFER: usize = 64;

/// Client bridge timing and retry knobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientOptions {
    /// Delay between response existence checks.
    pub poll_interval: Duration,
    /// How long to wait for a response before giving up.
    pub timeout: Duration,
    /// Extra attempts for a failed request upload.
    pub upload_retries: u32,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(250),
            timeout: Duration::from_secs(30),
            upload_retries: 3,
        }
    }
}

/// What happened over one [`ClientBridge::run`].
#[derive(Debug, Default)]
pub struct RunSummary {
    /// Messages dispatched to the tunnel.
    pub dispatched: usize,
    /// Lines written to the output.
    pub responses_written: usize,
    /// Input lines that were dropped, with reasons.
    pub warnings: Vec<Warning>,
}

/// The client half of the relay.
///
/// Cheap to clone; clones share storage and session.
#[derive(Clone)]
pub struct ClientBridge {
    storage: Arc<dyn ObjectStorage>,
    keys: KeyScheme,
    session: SessionId,
    options: ClientOptions,
}

impl ClientBridge {
    /// Create a bridge with a freshly minted session id.
    #[must_use]
    pub fn new(storage: Arc<dyn ObjectStorage>, keys: KeyScheme, options: ClientOptions) -> Self {
        Self::with_session(storage, keys, SessionId::generate(), options)
    }

    /// Create a bridge for an explicit session id.
    #[must_use]
    pub fn with_session(
        storage: Arc<dyn ObjectStorage>,
        keys: KeyScheme,
        session: SessionId,
        options: ClientOptions,
    ) -> Self {
        Self {
            storage,
            keys,
            session,
            options,
        }
    }

    /// This bridge's session id.
    #[must_use]
    pub fn session(&self) -> &SessionId {
        &self.session
    }

    /// Relay one message through the bucket.
    ///
    /// Returns the line to write back to the client: the response for a
    /// request (real or synthetic), `None` for anything else.
    pub async fn handle_message(&self, message: Message) -> Option<Message> {
        let expects_response = message.kind().expects_response();
        let request_id = RequestId::for_message(&message);
        let key = self.keys.request_key(&self.session, &request_id);
        let reply_id = message.id().cloned().unwrap_or(Value::Null);

        let metadata = BridgeMetadata::now(self.session.clone(), request_id.clone());
        let uploaded = match envelope::seal(&message, &metadata) {
            Ok(body) => {
                put_with_retries(
                    self.storage.as_ref(),
                    &key,
                    &body,
                    CONTENT_TYPE_JSON,
                    self.options.upload_retries,
                )
                .await
            }
            Err(e) => Err(e),
        };

        if let Err(e) = uploaded {
            error!(%key, error = %e, "Failed to upload request");
            return expects_response.then(|| {
                Message::error_response(
                    reply_id,
                    TUNNEL_ERROR_CODE,
                    format!("Tunnel failed to upload request: {e}"),
                )
            });
        }

        if !expects_response {
            debug!(%key, method = message.method(), "Relayed fire-and-forget message");
            return None;
        }

        debug!(%key, method = message.method(), "Uploaded request, awaiting response");
        Some(self.await_response(&request_id, reply_id).await)
    }

    /// Poll for the response to `request_id` until it appears or the timeout
    /// elapses. A final check is always made at the deadline itself.
    async fn await_response(&self, request_id: &RequestId, reply_id: Value) -> Message {
        let key = self.keys.response_key(&self.session, request_id);
        let deadline = Instant::now() + self.options.timeout;

        loop {
            match self.storage.exists(&key).await {
                Ok(true) => {
                    if let Some(response) = self.collect_response(&key, &reply_id).await {
                        return response;
                    }
                }
                Ok(false) => {}
                Err(e) => warn!(%key, error = %e, "Response check failed, will retry"),
            }

            let now = Instant::now();
            if now >= deadline {
                warn!(%key, timeout = ?self.options.timeout, "Timed out waiting for response");
                return Message::error_response(reply_id, TUNNEL_ERROR_CODE, TIMEOUT_MESSAGE);
            }
            tokio::time::sleep(self.options.poll_interval.min(deadline - now)).await;
        }
    }

    /// Download, delete and unwrap a response object.
    ///
    /// `None` means "not there after all" and polling should continue.
    async fn collect_response(&self, key: &str, reply_id: &Value) -> Option<Message> {
        let body = match self.storage.get(key).await {
            Ok(Some(body)) => body,
            Ok(None) => {
                debug!(%key, "Response vanished before download");
                return None;
            }
            Err(e) => {
                warn!(%key, error = %e, "Response download failed, will retry");
                return None;
            }
        };

        if let Err(e) = self.storage.delete(key).await {
            warn!(%key, error = %e, "Failed to delete consumed response");
        }

        match envelope::open(&body) {
            Ok((response, _)) => {
                trace!(%key, "Received response");
                Some(response)
            }
            Err(e) => {
                error!(%key, error = %e, "Response object is not a valid message");
                Some(Message::error_response(
                    reply_id.clone(),
                    TUNNEL_ERROR_CODE,
                    MALFORMED_RESPONSE_MESSAGE,
                ))
            }
        }
    }

    /// Pump `input` through the tunnel until EOF, writing replies to `output`.
    ///
    /// Lines that are not JSON, or not JSON-RPC messages, are logged and
    /// skipped. After EOF, work already dispatched is allowed to finish (each
    /// request is bounded by the response timeout) before returning.
    ///
    /// # Errors
    ///
    /// Returns an error if reading `input` or writing `output` fails.
    pub async fn run<R, W>(&self, input: R, output: W) -> Result<RunSummary>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        info!(session = %self.session, prefix = self.keys.prefix(), "Client bridge started");

        let (replies, receiver) = mpsc::channel(OUTPUT_BUFFER);
        let writer = tokio::spawn(write_replies(JsonlWriter::new(output), receiver));

        let mut reader = JsonlReader::new(input);
        let warnings = WarningCollector::new();
        let mut tasks = JoinSet::new();
        let mut dispatched = 0;

        while let Some(value) = reader.next_value_resilient::<Value>(&warnings).await? {
            let message = match Message::from_value(value) {
                Ok(message) => message,
                Err(e) => {
                    let line_number = reader.line_number();
                    warn!(line = line_number, error = %e, "Dropping invalid message");
                    warnings.add(Warning::SkippedLine {
                        line_number,
                        reason: e.to_string(),
                    });
                    continue;
                }
            };

            dispatched += 1;
            let bridge = self.clone();
            let replies = replies.clone();
            tasks.spawn(async move {
                if let Some(reply) = bridge.handle_message(message).await {
                    // Only fails if the writer has stopped, which it reports itself.
                    let _ = replies.send(reply).await;
                }
            });

            while let Some(finished) = tasks.try_join_next() {
                log_task_failure(finished);
            }
        }

        info!(in_flight = tasks.len(), "Input closed, draining in-flight messages");
        while let Some(finished) = tasks.join_next().await {
            log_task_failure(finished);
        }
        drop(replies);

        let responses_written = writer
            .await
            .map_err(|e| Error::Io(std::io::Error::other(e)))??;

        Ok(RunSummary {
            dispatched,
            responses_written,
            warnings: warnings.into_warnings(),
        })
    }
}

async fn write_replies<W>(mut writer: JsonlWriter<W>, mut replies: mpsc::Receiver<Message>) -> Result<usize>
where
    W: AsyncWrite + Unpin,
{
    let mut written = 0;
    while let Some(reply) = replies.recv().await {
        if let Err(e) = writer.send(&reply).await {
            error!(error = %e, "Failed to write to output");
            return Err(e.into());
        }
        written += 1;
    }
    Ok(written)
}

fn log_task_failure(finished: std::result::Result<(), tokio::task::JoinError>) {
    if let Err(e) = finished {
        error!(error = %e, "Message task failed");
    }
}
