//! Conventions shared by the client and server bridges.
//!
//! - [`message`]: JSON-RPC message classification and error responses
//! - [`ids`]: session ids, request ids and notify tokens
//! - [`envelope`]: bridge metadata attached to request objects
//! - [`keys`]: the `{prefix}/requests|responses/{session}/{request}.json` layout

pub mod envelope;
pub mod ids;
pub mod keys;
pub mod message;

pub use envelope::{BridgeMetadata, FoundMetadata};
pub use ids::{RequestId, SessionId};
pub use keys::KeyScheme;
pub use message::{Message, MessageKind, TUNNEL_ERROR_CODE};

/// Content type of every object the bridges write.
pub const CONTENT_TYPE_JSON: &str = "application/json";
