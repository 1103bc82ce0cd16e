//! Newline-delimited JSON framing for JSON-RPC streams.
//!
//! MCP's stdio transport carries one JSON-RPC message per line. This crate
//! provides the two halves of that framing:
//!
//! - [`JsonlReader`] buffers raw bytes from any [`tokio::io::AsyncRead`],
//!   splits them on `\n`, and parses each line. The resilient read path
//!   drops malformed lines (recording a [`Warning`]) instead of failing, so a
//!   single bad line never stalls the stream.
//! - [`JsonlWriter`] serializes values as compact single-line JSON followed
//!   by `\n`.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod reader;
pub mod warning;
pub mod writer;

pub use error::{Error, Result};
pub use reader::JsonlReader;
pub use warning::{Warning, WarningCollector};
pub use writer::JsonlWriter;
