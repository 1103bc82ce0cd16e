//! Session and request identifiers.
//!
//! Both are plain strings used only as storage key components; neither ever
//! appears in the JSON-RPC stream seen by the downstream server.
//!
//! Random components are SHA-256 over wall-clock nanoseconds, the process id
//! and a per-process counter, truncated to 8 bytes and rendered in base36.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use super::message::Message;

const BASE36_CHARS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
const SESSION_TOKEN_LEN: usize = 12;
const NOTIFY_TOKEN_LEN: usize = 6;
const NOTIFY_PREFIX: &str = "notify-";

static TOKEN_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Identity of one client bridge process.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Wrap an existing session identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Mint a fresh session identifier, e.g. `sess-0k3v9x2m1qz4`.
    #[must_use]
    pub fn generate() -> Self {
        Self(format!("sess-{}", random_token(SESSION_TOKEN_LEN)))
    }

    /// Borrow as `&str`.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Storage-level identifier of one relayed message.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(String);

impl RequestId {
    /// Wrap an existing request identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Derive the request id from a JSON-RPC `id` value.
    ///
    /// Strings are used verbatim, numbers in their JSON form, and anything
    /// else as compact JSON.
    #[must_use]
    pub fn from_json_id(id: &Value) -> Self {
        match id {
            Value::String(s) => Self(s.clone()),
            other => Self(other.to_string()),
        }
    }

    /// Pick the request id for an outbound client message.
    ///
    /// Requests use their own `id` so the response path is predictable.
    /// Everything else (notifications and client-side responses to
    /// server-initiated requests) gets a generated notify token, which keeps
    /// it out of the key space of real request ids.
    #[must_use]
    pub fn for_message(message: &Message) -> Self {
        match message.id() {
            Some(id) if message.kind().expects_response() => Self::from_json_id(id),
            _ => Self::notify_token(),
        }
    }

    /// Generate a `notify-{timestampMillis}-{random}` token.
    #[must_use]
    pub fn notify_token() -> Self {
        Self(format!(
            "{NOTIFY_PREFIX}{}-{}",
            Utc::now().timestamp_millis(),
            random_token(NOTIFY_TOKEN_LEN)
        ))
    }

    /// Borrow as `&str`.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn random_token(length: usize) -> String {
    let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();
    let counter = TOKEN_COUNTER.fetch_add(1, Ordering::Relaxed);

    let mut hasher = Sha256::new();
    hasher.update(format!("{nanos}|{}|{counter}", std::process::id()).as_bytes());
    let hash = hasher.finalize();

    encode_base36(&hash[..8], length)
}

fn encode_base36(bytes: &[u8], length: usize) -> String {
    let mut n = bytes
        .iter()
        .fold(0u64, |acc, &byte| acc.wrapping_shl(8).wrapping_add(u64::from(byte)));

    let mut digits = Vec::with_capacity(length);
    while digits.len() < length {
        #[allow(clippy::cast_possible_truncation)]
        let remainder = (n % 36) as usize;
        digits.push(char::from(BASE36_CHARS[remainder]));
        n /= 36;
    }
    digits.iter().rev().collect()
}
