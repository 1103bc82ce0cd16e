//! HTTP downstream: one POST per message.
//!
//! The cleaned JSON-RPC message is the request body; the response body is
//! the JSON-RPC reply. Servers that answer with `text/event-stream` are
//! supported for the common single-reply case: the stream is scanned for a
//! `data:` event whose `id` matches the request. A plain JSON reply must
//! carry the request's `id` too.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde_json::Value;
use tracing::{debug, trace, warn};

use super::Downstream;
use crate::error::{Error, Result};
use crate::protocol::Message;

const ACCEPT_VALUE: &str = "application/json, text/event-stream";
const EVENT_STREAM: &str = "text/event-stream";
const MAX_ERROR_BODY: usize = 512;

/// Downstream MCP server reachable over HTTP.
#[derive(Debug, Clone)]
pub struct HttpDownstream {
    client: reqwest::Client,
    url: String,
}

impl HttpDownstream {
    /// Create a client for `url` with a per-exchange `timeout`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Http` if the client cannot be built (e.g. TLS
    /// initialization fails).
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl Downstream for HttpDownstream {
    async fn call(&self, message: Message) -> Result<Option<Message>> {
        trace!(url = %self.url, method = message.method(), "POST to downstream");
        let response = self
            .client
            .post(&self.url)
            .header(ACCEPT, ACCEPT_VALUE)
            .json(&message)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let mut body = response.text().await.unwrap_or_default();
            truncate_at_char_boundary(&mut body, MAX_ERROR_BODY);
            return Err(Error::HttpStatus {
                status: status.as_u16(),
                body,
            });
        }

        if !message.kind().expects_response() {
            debug!(%status, "Downstream accepted message");
            return Ok(None);
        }

        let is_event_stream = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.starts_with(EVENT_STREAM));
        let body = response.bytes().await?;

        let reply = if is_event_stream {
            reply_from_event_stream(&String::from_utf8_lossy(&body), message.id())?
        } else {
            let reply = Message::from_value(serde_json::from_slice(&body)?)?;
            ensure_reply_id(&reply, message.id())?;
            reply
        };
        Ok(Some(reply))
    }

    fn describe(&self) -> String {
        self.url.clone()
    }
}

/// Find the reply to `id` among the `data:` events of an SSE body.
///
/// Multi-line `data:` fields of one event are joined with `\n`; events are
/// separated by a blank line.
fn reply_from_event_stream(body: &str, id: Option<&Value>) -> Result<Message> {
    let mut data = String::new();
    for line in body.lines().chain(std::iter::once("")) {
        if line.is_empty() {
            if !data.is_empty() {
                if let Ok(value) = serde_json::from_str::<Value>(&data) {
                    if value.get("method").is_none() && value.get("id") == id {
                        return Message::from_value(value);
                    }
                }
                data.clear();
            }
        } else if let Some(field) = line.strip_prefix("data:") {
            if !data.is_empty() {
                data.push('\n');
            }
            data.push_str(field.strip_prefix(' ').unwrap_or(field));
        }
    }
    Err(Error::InvalidMessage(
        "event stream ended without a matching response".to_string(),
    ))
}

fn ensure_reply_id(reply: &Message, id: Option<&Value>) -> Result<()> {
    if reply.id() == id {
        return Ok(());
    }
    warn!(expected = ?id, actual = ?reply.id(), "Downstream reply id does not match request");
    Err(Error::InvalidMessage(format!(
        "downstream replied with id {} to request {}",
        reply.id().unwrap_or(&Value::Null),
        id.unwrap_or(&Value::Null),
    )))
}

fn truncate_at_char_boundary(s: &mut String, max: usize) {
    if s.len() > max {
        let mut end = max;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        s.truncate(end);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn event_stream_reply_is_matched_by_id() {
        let body = concat!(
            "event: message\n",
            "data: {\"jsonrpc\":\"2.0\",\"method\":\"notifications/progress\"}\n",
            "\n",
            "event: message\n",
            "data: {\"jsonrpc\":\"2.0\",\"id\":7,\n",
            "data: \"result\":{\"ok\":true}}\n",
            "\n",
        );
        let reply = reply_from_event_stream(body, Some(&json!(7))).unwrap();
        assert_eq!(
            reply.into_value(),
            json!({"jsonrpc": "2.0", "id": 7, "result": {"ok": true}})
        );
    }

    #[test]
    fn json_reply_must_echo_the_request_id() {
        let reply =
            Message::from_value(json!({"jsonrpc": "2.0", "id": 8, "result": {}})).unwrap();
        assert!(ensure_reply_id(&reply, Some(&json!(8))).is_ok());
        assert!(matches!(
            ensure_reply_id(&reply, Some(&json!("8"))),
            Err(Error::InvalidMessage(_))
        ));
    }

    #[test]
    fn event_stream_without_trailing_blank_line_still_parses() {
        let body = "data: {\"jsonrpc\":\"2.0\",\"id\":\"a\",\"result\":1}";
        assert!(reply_from_event_stream(body, Some(&json!("a"))).is_ok());
    }

    #[test]
    fn event_stream_without_match_is_an_error() {
        let body = "data: {\"jsonrpc\":\"2.0\",\"id\":1,\"result\":1}\n\n";
        assert!(matches!(
            reply_from_event_stream(body, Some(&json!(2))),
            Err(Error::InvalidMessage(_))
        ));
    }

    #[test]
    fn error_bodies_are_truncated_on_char_boundaries() {
        let mut body = "é".repeat(400);
        truncate_at_char_boundary(&mut body, 511);
        assert_eq!(body.len(), 510);
    }
}
