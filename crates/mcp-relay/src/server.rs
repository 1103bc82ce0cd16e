//! Server bridge: drains request objects into a downstream MCP server.
//!
//! The bridge lists `{prefix}/requests/` on a fixed interval. Each request
//! object not already being worked on is claimed in an in-flight set and
//! processed on its own task:
//!
//! 1. Download and parse; strip bridge metadata
//! 2. Dispatch to the [`Downstream`]
//! 3. Upload the reply (if any) under the matching response key
//! 4. Delete the request object
//!
//! A failure in one request is logged with its key and never affects the
//! poll loop or other requests. Delivery is at-most-once once dispatch has
//! happened: the request object is deleted even when the response upload
//! fails.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, trace, warn};

use crate::downstream::Downstream;
use crate::error::{Error, Result};
use crate::protocol::{
    CONTENT_TYPE_JSON, KeyScheme, Message, MessageKind, RequestId, SessionId, TUNNEL_ERROR_CODE,
    envelope,
};
use crate::storage::{ObjectStorage, put_with_retries};

/// Server bridge timing and retry knobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerOptions {
    /// Delay between listings of the request prefix.
    pub poll_interval: Duration,
    /// Extra attempts for a failed response upload.
    pub upload_retries: u32,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            upload_retries: 3,
        }
    }
}

/// How processing of one request object ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// The reply was uploaded.
    Answered,
    /// Delivered downstream; no reply was expected.
    Forwarded,
    /// The object was gone before it could be downloaded.
    Vanished,
    /// The object was not a valid message and was deleted unprocessed.
    Discarded,
    /// Dispatched, but the reply could not be stored.
    ResponseLost,
}

struct Inner {
    storage: Arc<dyn ObjectStorage>,
    keys: KeyScheme,
    downstream: Arc<dyn Downstream>,
    options: ServerOptions,
    in_flight: Mutex<HashSet<String>>,
    stop: watch::Sender<bool>,
}

/// The server half of the relay.
///
/// Cheap to clone; clones share state, so one clone can [`stop`] a bridge
/// another clone is running.
///
/// [`stop`]: ServerBridge::stop
#[derive(Clone)]
pub struct ServerBridge {
    inner: Arc<Inner>,
}

/// Releases an in-flight claim when dropped, even if the task panics.
struct Claim {
    inner: Arc<Inner>,
    key: String,
}

impl Drop for Claim {
    fn drop(&mut self) {
        self.inner
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.key);
    }
}

impl ServerBridge {
    /// Create a bridge; nothing runs until [`start`](Self::start).
    #[must_use]
    pub fn new(
        storage: Arc<dyn ObjectStorage>,
        keys: KeyScheme,
        downstream: Arc<dyn Downstream>,
        options: ServerOptions,
    ) -> Self {
        let (stop, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                storage,
                keys,
                downstream,
                options,
                in_flight: Mutex::new(HashSet::new()),
                stop,
            }),
        }
    }

    /// Start the downstream and poll until [`stop`](Self::stop) is called.
    ///
    /// On the way out the downstream is shut down and in-flight requests are
    /// allowed to finish.
    ///
    /// # Errors
    ///
    /// - `Error::SpawnFailed` if the downstream process cannot be started
    /// - `Error::DownstreamExited` if the downstream dies while polling
    pub async fn start(&self) -> Result<()> {
        let inner = &self.inner;
        inner.downstream.start().await?;
        info!(
            downstream = %inner.downstream.describe(),
            prefix = inner.keys.prefix(),
            interval = ?inner.options.poll_interval,
            "Server bridge polling"
        );

        let mut stop = inner.stop.subscribe();
        let mut tasks = JoinSet::new();
        let outcome = loop {
            if *stop.borrow_and_update() {
                info!("Stop requested");
                break Ok(());
            }

            self.poll_once(&mut tasks).await;
            while let Some(finished) = tasks.try_join_next() {
                log_task_failure(finished);
            }

            tokio::select! {
                biased;
                _ = stop.changed() => {}
                () = inner.downstream.closed() => {
                    error!("Downstream exited unexpectedly, halting");
                    break Err(Error::DownstreamExited);
                }
                () = tokio::time::sleep(inner.options.poll_interval) => {}
            }
        };

        if let Err(e) = inner.downstream.shutdown().await {
            warn!(error = %e, "Downstream shutdown failed");
        }
        while let Some(finished) = tasks.join_next().await {
            log_task_failure(finished);
        }
        outcome
    }

    /// Ask a running [`start`](Self::start) loop to finish.
    pub fn stop(&self) {
        self.inner.stop.send_replace(true);
    }

    /// Run one listing cycle, spawning a task onto `tasks` for every
    /// unclaimed request object. Returns how many tasks were spawned.
    ///
    /// Listing failures are logged; the next cycle tries again.
    pub async fn poll_once(&self, tasks: &mut JoinSet<()>) -> usize {
        let root = self.inner.keys.requests_root();
        let keys = match self.inner.storage.list(&root).await {
            Ok(keys) => keys,
            Err(e) => {
                warn!(prefix = %root, error = %e, "Listing requests failed, will retry");
                return 0;
            }
        };

        let mut spawned = 0;
        for key in keys {
            if !self.inner.keys.is_request_object(&key) {
                continue;
            }
            let Some(claim) = self.claim(&key) else {
                trace!(%key, "Already in flight");
                continue;
            };
            let bridge = self.clone();
            tasks.spawn(async move {
                match bridge.process_request(&claim.key).await {
                    Ok(outcome) => debug!(key = %claim.key, ?outcome, "Request processed"),
                    Err(e) => warn!(key = %claim.key, error = %e, "Request processing failed"),
                }
                drop(claim);
            });
            spawned += 1;
        }
        spawned
    }

    /// Number of request objects currently being processed.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.inner
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn claim(&self, key: &str) -> Option<Claim> {
        let mut in_flight = self
            .inner
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        in_flight.insert(key.to_string()).then(|| Claim {
            inner: Arc::clone(&self.inner),
            key: key.to_string(),
        })
    }

    /// Process the request object at `key` end to end.
    ///
    /// # Errors
    ///
    /// Returns an error only for storage failures while downloading or
    /// deleting the object; dispatch and upload failures are handled here.
    pub async fn process_request(&self, key: &str) -> Result<ProcessOutcome> {
        let inner = &self.inner;
        let Some(body) = inner.storage.get(key).await? else {
            debug!(%key, "Request vanished before download");
            return Ok(ProcessOutcome::Vanished);
        };

        let (message, metadata) = match envelope::open(&body) {
            Ok(opened) => opened,
            Err(e) => {
                error!(%key, error = %e, "Discarding unparseable request object");
                inner.storage.delete(key).await?;
                return Ok(ProcessOutcome::Discarded);
            }
        };

        let from_key = inner.keys.parse_request_key(key);
        let session = metadata
            .session_id
            .or_else(|| from_key.as_ref().map(|(session, _)| session.clone()));
        let request_id = metadata
            .request_id
            .or_else(|| message.id().map(RequestId::from_json_id))
            .or_else(|| from_key.map(|(_, request)| request));

        let kind = message.kind();
        let reply_id = message.id().cloned().unwrap_or(Value::Null);
        trace!(%key, method = message.method(), "Dispatching downstream");

        let reply = match inner.downstream.call(message).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!(%key, error = %e, "Downstream dispatch failed");
                (kind == MessageKind::Request).then(|| {
                    Message::error_response(
                        reply_id,
                        TUNNEL_ERROR_CODE,
                        format!("Downstream dispatch failed: {e}"),
                    )
                })
            }
        };

        let outcome = match reply {
            Some(reply) => self.store_reply(key, session, request_id, &reply).await,
            None => ProcessOutcome::Forwarded,
        };

        if let Err(e) = inner.storage.delete(key).await {
            error!(%key, error = %e, "Failed to delete processed request; it may be dispatched again");
            return Err(e);
        }
        Ok(outcome)
    }

    async fn store_reply(
        &self,
        key: &str,
        session: Option<SessionId>,
        request_id: Option<RequestId>,
        reply: &Message,
    ) -> ProcessOutcome {
        let (Some(session), Some(request_id)) = (session, request_id) else {
            error!(%key, "Cannot address response: request carries no session or request id");
            return ProcessOutcome::ResponseLost;
        };
        let response_key = self.inner.keys.response_key(&session, &request_id);

        let stored = match reply.to_vec() {
            Ok(body) => {
                put_with_retries(
                    self.inner.storage.as_ref(),
                    &response_key,
                    &body,
                    CONTENT_TYPE_JSON,
                    self.inner.options.upload_retries,
                )
                .await
            }
            Err(e) => Err(e),
        };

        match stored {
            Ok(()) => {
                debug!(%key, %response_key, "Response uploaded");
                ProcessOutcome::Answered
            }
            Err(e) => {
                error!(%key, %response_key, error = %e, "Failed to upload response");
                ProcessOutcome::ResponseLost
            }
        }
    }
}

fn log_task_failure(finished: std::result::Result<(), tokio::task::JoinError>) {
    if let Err(e) = finished {
        error!(error = %e, "Request task failed");
    }
}
