//! Agent-level streaming events.
//!
//! `AgentStreamEvent` is what the agent loop hands to the transport while an
//! exchange is running. Only `chunk` and `status` reach the client; tool
//! events are kept for logging.

use serde::{Deserialize, Serialize};

/// Events emitted by the agent during one exchange.
///
/// - `chunk`: answer text, in the order the model produced it
/// - `status`: "working, no content yet" line
/// - `tool_call`: the agent is about to run a tool
/// - `tool_result`: the tool finished
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentStreamEvent {
    /// Partial answer text.
    Chunk { content: String },

    /// Progress line shown while no content is flowing.
    Status { message: String },

    /// The agent is calling a tool.
    ToolCall {
        id: String,
        name: String,
        input: serde_json::Value,
    },

    /// Tool execution completed.
    ToolResult {
        id: String,
        name: String,
        success: bool,
    },
}

impl AgentStreamEvent {
    pub fn chunk(content: impl Into<String>) -> Self {
        Self::Chunk {
            content: content.into(),
        }
    }

    pub fn status(message: impl Into<String>) -> Self {
        Self::Status {
            message: message.into(),
        }
    }

    /// Short name of the event kind, used in log fields.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Chunk { .. } => "chunk",
            Self::Status { .. } => "status",
            Self::ToolCall { .. } => "tool_call",
            Self::ToolResult { .. } => "tool_result",
        }
    }

    /// Whether the event is meant for the client.
    pub fn is_client_visible(&self) -> bool {
        matches!(self, Self::Chunk { .. } | Self::Status { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_serialization() {
        let json = serde_json::to_string(&AgentStreamEvent::chunk("Hello")).unwrap();
        assert!(json.contains(r#""type":"chunk""#));
        assert!(json.contains(r#""content":"Hello""#));
    }

    #[test]
    fn tool_call_serialization() {
        let event = AgentStreamEvent::ToolCall {
            id: "toolu_1".into(),
            name: "query_db".into(),
            input: serde_json::json!({"query": "hvac"}),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"tool_call""#));
        assert!(json.contains(r#""name":"query_db""#));
    }

    #[test]
    fn visibility_and_names() {
        assert!(AgentStreamEvent::chunk("x").is_client_visible());
        assert!(AgentStreamEvent::status("Searching...").is_client_visible());
        let result = AgentStreamEvent::ToolResult {
            id: "a".into(),
            name: "query_db".into(),
            success: true,
        };
        assert!(!result.is_client_visible());
        assert_eq!(result.event_type(), "tool_result");
        assert_eq!(AgentStreamEvent::status("x").event_type(), "status");
    }

    #[test]
    fn deserialization() {
        let event: AgentStreamEvent =
            serde_json::from_str(r#"{"type":"status","message":"Reading"}"#).unwrap();
        assert_eq!(event, AgentStreamEvent::status("Reading"));
    }
}
