//! Bridge metadata carried alongside a message inside a request object.
//!
//! The client bridge appends `sessionId`, `requestId` and `timestamp` as
//! extra top-level members of the JSON-RPC object it uploads. These members
//! are removed again before the message is handed to the downstream server or
//! written to the client's stdout; neither end ever sees them.

use chrono::Utc;
use serde_json::{Map, Value};

use super::ids::{RequestId, SessionId};
use super::message::Message;
use crate::error::{Error, Result};

/// Member name of the session id.
pub const SESSION_ID_FIELD: &str = "sessionId";
/// Member name of the request id.
pub const REQUEST_ID_FIELD: &str = "requestId";
/// Member name of the upload timestamp (Unix epoch milliseconds).
pub const TIMESTAMP_FIELD: &str = "timestamp";

/// Metadata attached by the client bridge on upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeMetadata {
    /// Session of the uploading client.
    pub session_id: SessionId,
    /// Storage-level id of this message.
    pub request_id: RequestId,
    /// Upload time, Unix epoch milliseconds.
    pub timestamp: i64,
}

impl BridgeMetadata {
    /// Metadata stamped with the current time.
    #[must_use]
    pub fn now(session_id: SessionId, request_id: RequestId) -> Self {
        Self {
            session_id,
            request_id,
            timestamp: Utc::now().timestamp_millis(),
        }
    }
}

/// Metadata as found on a downloaded object. Any member may be missing,
/// for instance when an object was written by a foreign client.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FoundMetadata {
    /// `sessionId`, if present and a string.
    pub session_id: Option<SessionId>,
    /// `requestId`, if present and a string.
    pub request_id: Option<RequestId>,
    /// `timestamp`, if present and an integer.
    pub timestamp: Option<i64>,
}

/// Serialize `message` with `metadata` appended, ready for upload.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn seal(message: &Message, metadata: &BridgeMetadata) -> Result<Vec<u8>> {
    let mut map = message.as_map().clone();
    map.insert(
        SESSION_ID_FIELD.to_string(),
        Value::from(metadata.session_id.as_str()),
    );
    map.insert(
        REQUEST_ID_FIELD.to_string(),
        Value::from(metadata.request_id.as_str()),
    );
    map.insert(TIMESTAMP_FIELD.to_string(), Value::from(metadata.timestamp));
    Ok(serde_json::to_vec(&map)?)
}

/// Parse a downloaded object, strip bridge metadata, and validate the rest.
///
/// # Errors
///
/// Returns [`Error::Json`] if the bytes are not JSON, or
/// [`Error::InvalidMessage`] if what remains is not a JSON-RPC message.
pub fn open(bytes: &[u8]) -> Result<(Message, FoundMetadata)> {
    let Value::Object(mut map) = serde_json::from_slice::<Value>(bytes)? else {
        return Err(Error::InvalidMessage(
            "stored object is not a JSON object".to_string(),
        ));
    };
    let metadata = strip(&mut map);
    Ok((Message::from_map(map)?, metadata))
}

/// Remove bridge metadata members from `map`, preserving the order of the
/// remaining members.
pub fn strip(map: &mut Map<String, Value>) -> FoundMetadata {
    let session_id = map
        .shift_remove(SESSION_ID_FIELD)
        .and_then(|v| v.as_str().map(SessionId::new));
    let request_id = map
        .shift_remove(REQUEST_ID_FIELD)
        .and_then(|v| v.as_str().map(RequestId::new));
    let timestamp = map.shift_remove(TIMESTAMP_FIELD).and_then(|v| v.as_i64());
    FoundMetadata {
        session_id,
        request_id,
        timestamp,
    }
}
