//! The connection wire protocol.
//!
//! One connection carries one request (client → server) followed by an
//! ordered stream of text frames (server → client):
//!
//! ```text
//! (Content | Status)* EndOfStream Sources      on success
//! Error                                        on failure
//! ```
//!
//! Frames are told apart by a reserved prefix or an exact marker. Content
//! frames have no envelope at all, so the encoder must never send content
//! that looks like a marker; [`content_frames`] splits such text so the
//! concatenation on the client side restores it unchanged.

use crate::error::ProtocolError;
use crate::knowledge::Source;
use crate::message::HistoryPair;
use serde::{Deserialize, Serialize};

pub const STATUS_PREFIX: &str = "!<|STATUS|>!";
pub const EOF_MARKER: &str = "!<|EOF_STREAM|>!";
pub const ERROR_PREFIX: &str = "<!ERROR!>:";

/// Message an upstream gateway pushes when its own request timer fires.
pub const GATEWAY_TIMEOUT_MESSAGE: &str = "Endpoint request timed out";

/// One unit of the server-to-client stream.
#[derive(Debug, Clone, PartialEq)]
pub enum ProtocolFrame {
    Content(String),
    Status(String),
    EndOfStream,
    Sources(Vec<Source>),
    Error(String),
}

impl ProtocolFrame {
    /// Serialize to the wire text.
    pub fn encode(&self) -> String {
        match self {
            Self::Content(text) => text.clone(),
            Self::Status(text) => format!("{STATUS_PREFIX}{text}"),
            Self::EndOfStream => EOF_MARKER.to_string(),
            Self::Sources(sources) => {
                serde_json::to_string(sources).unwrap_or_else(|_| "[]".to_string())
            }
            Self::Error(message) => format!("{ERROR_PREFIX} {message}"),
        }
    }
}

/// True when `text` sent raw would be read as something other than content.
pub fn is_reserved(text: &str) -> bool {
    text == EOF_MARKER || text.starts_with(STATUS_PREFIX) || text.starts_with(ERROR_PREFIX)
}

/// Content frames carrying `text`, split after the first character when the
/// text would otherwise collide with a reserved marker.
pub fn content_frames(text: &str) -> Vec<ProtocolFrame> {
    if text.is_empty() {
        return Vec::new();
    }
    if !is_reserved(text) {
        return vec![ProtocolFrame::Content(text.to_string())];
    }
    let split = text.chars().next().map_or(0, char::len_utf8);
    let (head, tail) = text.split_at(split);
    vec![
        ProtocolFrame::Content(head.to_string()),
        ProtocolFrame::Content(tail.to_string()),
    ]
}

/// Whether a raw frame is an upstream gateway timeout notice.
pub fn is_gateway_timeout_notice(raw: &str) -> bool {
    if !raw.trim_start().starts_with('{') {
        return false;
    }
    serde_json::from_str::<serde_json::Value>(raw).is_ok_and(|v| {
        v["message"].as_str() == Some(GATEWAY_TIMEOUT_MESSAGE) && v.get("connectionId").is_some()
    })
}

/// Classify one raw frame.
///
/// Precedence: error prefix, status prefix, exact EOF marker, then content
/// before EOF or the sources array after it. Returns `None` for frames that
/// must be ignored (gateway timeout notices, malformed sources).
pub fn classify(raw: &str, past_eof: bool) -> Option<ProtocolFrame> {
    if is_gateway_timeout_notice(raw) {
        return None;
    }
    if let Some(message) = raw.strip_prefix(ERROR_PREFIX) {
        return Some(ProtocolFrame::Error(message.trim().to_string()));
    }
    if let Some(status) = raw.strip_prefix(STATUS_PREFIX) {
        return Some(ProtocolFrame::Status(status.to_string()));
    }
    if raw == EOF_MARKER {
        return Some(ProtocolFrame::EndOfStream);
    }
    if !past_eof {
        return Some(ProtocolFrame::Content(raw.to_string()));
    }
    serde_json::from_str::<Vec<Source>>(raw)
        .ok()
        .map(ProtocolFrame::Sources)
}

/// The single request a client sends after opening a connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub user_message: String,

    #[serde(alias = "user_id")]
    pub user_id: String,

    #[serde(alias = "session_id")]
    pub session_id: String,

    #[serde(default)]
    pub chat_history: Vec<HistoryPair>,

    /// Accepted for compatibility, unused
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retrieval_source: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RequestEnvelope {
    Action {
        #[allow(dead_code)]
        action: String,
        data: ChatRequest,
    },
    Bare(ChatRequest),
}

/// Parse a request in either bare or `{action, data}` form.
pub fn parse_request(raw: &str) -> std::result::Result<ChatRequest, ProtocolError> {
    let envelope: RequestEnvelope =
        serde_json::from_str(raw).map_err(|e| ProtocolError::MalformedRequest(e.to_string()))?;
    let request = match envelope {
        RequestEnvelope::Action { data, .. } => data,
        RequestEnvelope::Bare(request) => request,
    };
    if request.user_message.trim().is_empty() {
        return Err(ProtocolError::MalformedRequest("userMessage is empty".into()));
    }
    Ok(request)
}
