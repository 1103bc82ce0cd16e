//! Storage key layout.
//!
//! ```text
//! {prefix}/requests/{sessionId}/{requestId}.json
//! {prefix}/responses/{sessionId}/{requestId}.json
//! ```
//!
//! Session and request ids are percent-encoded as key segments, so an id
//! containing `/`, spaces or non-ASCII text cannot change the layout. Both
//! bridges use the same encoder, so a response is always written under the
//! same segment its request was uploaded under.

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, percent_decode_str, utf8_percent_encode};

use super::ids::{RequestId, SessionId};

/// Default key prefix.
pub const DEFAULT_PREFIX: &str = "mcp-relay";

const REQUESTS_DIR: &str = "requests";
const RESPONSES_DIR: &str = "responses";
const OBJECT_SUFFIX: &str = ".json";

/// Everything except RFC 3986 unreserved characters is encoded.
const SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Builds and parses object keys under one deployment prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyScheme {
    prefix: String,
}

impl KeyScheme {
    /// Create a scheme for `prefix`. Leading and trailing `/` are ignored.
    #[must_use]
    pub fn new(prefix: &str) -> Self {
        Self {
            prefix: prefix.trim_matches('/').to_string(),
        }
    }

    /// The normalized prefix.
    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Prefix under which all request objects live, with trailing `/`.
    #[must_use]
    pub fn requests_root(&self) -> String {
        format!("{}/", self.join(REQUESTS_DIR))
    }

    /// Key of the request object for `request` in `session`.
    #[must_use]
    pub fn request_key(&self, session: &SessionId, request: &RequestId) -> String {
        self.object_key(REQUESTS_DIR, session, request)
    }

    /// Key of the response object for `request` in `session`.
    #[must_use]
    pub fn response_key(&self, session: &SessionId, request: &RequestId) -> String {
        self.object_key(RESPONSES_DIR, session, request)
    }

    /// Recover the session and request ids from a request object key.
    ///
    /// Returns `None` for keys outside `requests/`, keys that are not
    /// `{session}/{request}.json` below it, or segments that do not decode.
    #[must_use]
    pub fn parse_request_key(&self, key: &str) -> Option<(SessionId, RequestId)> {
        let rest = key.strip_prefix(&self.requests_root())?;
        let (session, file) = rest.split_once('/')?;
        let request = file.strip_suffix(OBJECT_SUFFIX)?;
        if session.is_empty() || request.is_empty() || request.contains('/') {
            return None;
        }
        Some((
            SessionId::new(decode_segment(session)?),
            RequestId::new(decode_segment(request)?),
        ))
    }

    /// Whether `key` looks like a request object (ends in `.json`).
    #[must_use]
    pub fn is_request_object(&self, key: &str) -> bool {
        key.starts_with(&self.requests_root()) && key.ends_with(OBJECT_SUFFIX)
    }

    fn object_key(&self, dir: &str, session: &SessionId, request: &RequestId) -> String {
        let path = format!(
            "{dir}/{}/{}{OBJECT_SUFFIX}",
            encode_segment(session.as_str()),
            encode_segment(request.as_str())
        );
        self.join(&path)
    }

    fn join(&self, path: &str) -> String {
        if self.prefix.is_empty() {
            path.to_string()
        } else {
            format!("{}/{path}", self.prefix)
        }
    }
}

impl Default for KeyScheme {
    fn default() -> Self {
        Self::new(DEFAULT_PREFIX)
    }
}

/// Percent-encode a single key segment.
#[must_use]
pub fn encode_segment(raw: &str) -> String {
    utf8_percent_encode(raw, SEGMENT).to_string()
}

fn decode_segment(encoded: &str) -> Option<String> {
    percent_decode_str(encoded)
        .decode_utf8()
        .ok()
        .map(|s| s.into_owned())
}
