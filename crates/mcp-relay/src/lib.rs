//! mcp-relay - tunnel MCP JSON-RPC traffic through an object storage bucket.
//!
//! Two cooperating bridges share a bucket and nothing else:
//!
//! - The [`client`] bridge runs where the MCP host runs. It reads JSON-RPC
//!   messages from stdin, writes each one as a request object, and polls for
//!   the matching response object.
//! - The [`server`] bridge runs next to the MCP server. It lists request
//!   objects, dispatches them to a [`downstream`] (a spawned process or an
//!   HTTP endpoint), and writes the replies back as response objects.
//!
//! Request and response keys share a session id and a request id, so the
//! client finds its answer by path alone (see [`protocol::keys`]).
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use mcp_relay::client::{ClientBridge, ClientOptions};
//! use mcp_relay::protocol::KeyScheme;
//! use mcp_relay::storage::{StorageBackend, create_storage};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let storage = create_storage(StorageBackend::Local { root: "/tmp/relay".into() }).await?;
//!     let bridge = ClientBridge::new(storage, KeyScheme::default(), ClientOptions::default());
//!     bridge.run(tokio::io::stdin(), tokio::io::stdout()).await?;
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]

pub mod client;
pub mod config;
pub mod downstream;
pub mod error;
pub mod protocol;
pub mod server;
pub mod storage;

// Public CLI module (needed by binary)
pub mod cli;

pub use error::{Error, Result};
