//! JSON-RPC 2.0 messages as they cross the tunnel.
//!
//! The relay is protocol-transparent: it never interprets `params` or
//! `result`, it only needs to know whether a message expects a reply and what
//! its `id` is. Messages are therefore kept as JSON objects (with key order
//! preserved) rather than decoded into typed MCP structures.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::error::{Error, Result};

/// JSON-RPC protocol version string.
pub const JSONRPC_VERSION: &str = "2.0";

/// Error code for failures produced by the tunnel itself (timeouts, upload
/// failures, downstream dispatch failures).
pub const TUNNEL_ERROR_CODE: i64 = -32000;

/// Standard JSON-RPC "method not found" code.
pub const METHOD_NOT_FOUND_CODE: i64 = -32601;

/// What a message is, judged by the presence of `id` and `method`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// Has `method` and `id`; expects exactly one response.
    Request,
    /// Has `method` but no `id`; never answered.
    Notification,
    /// Has `id` but no `method`; carries `result` or `error`.
    Response,
}

impl MessageKind {
    /// Whether the sender waits for a correlated reply.
    #[must_use]
    pub fn expects_response(self) -> bool {
        matches!(self, Self::Request)
    }
}

/// A single JSON-RPC message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Message(Map<String, Value>);

impl Message {
    /// Validate a parsed JSON value as a JSON-RPC message.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidMessage`] if the value is not an object (batch
    /// arrays and scalars are rejected) or carries neither `id` nor `method`.
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(map) => Self::from_map(map),
            Value::Array(_) => Err(Error::InvalidMessage(
                "JSON-RPC batches are not supported".to_string(),
            )),
            other => Err(Error::InvalidMessage(format!(
                "expected a JSON object, got {}",
                json_type_name(&other)
            ))),
        }
    }

    /// Validate a JSON object as a JSON-RPC message.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidMessage`] if the object has neither `id` nor
    /// `method`.
    pub fn from_map(map: Map<String, Value>) -> Result<Self> {
        if !map.contains_key("id") && !map.contains_key("method") {
            return Err(Error::InvalidMessage(
                "message has neither 'id' nor 'method'".to_string(),
            ));
        }
        Ok(Self(map))
    }

    /// Build an error response.
    #[must_use]
    pub fn error_response(id: Value, code: i64, message: impl Into<String>) -> Self {
        let mut map = Map::new();
        map.insert("jsonrpc".to_string(), Value::from(JSONRPC_VERSION));
        map.insert("id".to_string(), id);
        map.insert(
            "error".to_string(),
            json!({ "code": code, "message": message.into() }),
        );
        Self(map)
    }

    /// Classify the message.
    #[must_use]
    pub fn kind(&self) -> MessageKind {
        match (self.0.contains_key("method"), self.0.contains_key("id")) {
            (true, true) => MessageKind::Request,
            (true, false) => MessageKind::Notification,
            (false, _) => MessageKind::Response,
        }
    }

    /// The JSON-RPC `id`, if present.
    #[must_use]
    pub fn id(&self) -> Option<&Value> {
        self.0.get("id")
    }

    /// Replace the `id` in place, keeping its position among the keys.
    pub fn set_id(&mut self, id: Value) {
        if let Some(slot) = self.0.get_mut("id") {
            *slot = id;
        } else {
            self.0.insert("id".to_string(), id);
        }
    }

    /// The `method`, if present and a string.
    #[must_use]
    pub fn method(&self) -> Option<&str> {
        self.0.get("method").and_then(Value::as_str)
    }

    /// Borrow the underlying object.
    #[must_use]
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Consume into a [`Value`].
    #[must_use]
    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }

    /// Serialize as compact JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_vec(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(&self.0)?)
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
