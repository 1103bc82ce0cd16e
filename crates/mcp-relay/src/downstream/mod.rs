//! The MCP server behind the server bridge.
//!
//! Two transports implement [`Downstream`]:
//!
//! - [`subprocess`]: a child process speaking newline-delimited JSON-RPC on
//!   stdin/stdout, with replies correlated through a pending-call map
//! - [`http`]: one HTTP POST per message to an MCP endpoint
//!
//! The server bridge only ever sees the trait, so tests substitute their own
//! implementations.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;
use crate::protocol::Message;

pub mod http;
pub mod subprocess;

pub use http::HttpDownstream;
pub use subprocess::SubprocessDownstream;

/// A JSON-RPC endpoint the server bridge dispatches to.
#[async_trait]
pub trait Downstream: Send + Sync {
    /// Bring the downstream up. Called once before the first [`call`].
    ///
    /// [`call`]: Downstream::call
    async fn start(&self) -> Result<()> {
        Ok(())
    }

    /// Deliver one message.
    ///
    /// For requests, resolves to the correlated response. For notifications
    /// and responses, resolves to `None` once the message has been handed
    /// off.
    async fn call(&self, message: Message) -> Result<Option<Message>>;

    /// Resolves if the downstream terminates on its own. Transports that
    /// cannot die (HTTP) never resolve.
    async fn closed(&self) {
        futures::future::pending::<()>().await;
    }

    /// Tear the downstream down. Outstanding calls fail.
    async fn shutdown(&self) -> Result<()> {
        Ok(())
    }

    /// Human-readable description for logs.
    fn describe(&self) -> String;
}

/// Where the server bridge sends requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownstreamTarget {
    /// Spawn `program` with `args` and talk over its stdio.
    Command {
        /// Executable to run.
        program: String,
        /// Arguments passed to it.
        args: Vec<String>,
    },

    /// POST to an MCP HTTP endpoint.
    Http {
        /// Endpoint URL.
        url: String,
    },
}

/// Build the downstream for `target`.
///
/// `dispatch_timeout` bounds each subprocess call; `http_timeout` bounds each
/// HTTP exchange.
///
/// # Errors
///
/// Returns `Error::Http` if the HTTP client cannot be constructed.
pub fn connect(
    target: DownstreamTarget,
    dispatch_timeout: Duration,
    http_timeout: Duration,
) -> Result<Arc<dyn Downstream>> {
    match target {
        DownstreamTarget::Command { program, args } => Ok(Arc::new(SubprocessDownstream::new(
            program,
            args,
            dispatch_timeout,
        ))),
        DownstreamTarget::Http { url } => Ok(Arc::new(HttpDownstream::new(url, http_timeout)?)),
    }
}
