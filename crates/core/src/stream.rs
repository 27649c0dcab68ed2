//! Normalized streaming events.
//!
//! Providers emit heterogeneous raw chunks; the normalizer maps every chunk
//! to exactly one [`StreamEvent`]. Chunks the loop has no use for map to
//! [`StreamEvent::Ignore`] so that nothing downstream ever sees an unset
//! value.

use serde::{Deserialize, Serialize};

/// Why one streaming model call ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    ToolUse,
    EndTurn,
    MaxTokens,
    StopSequence,
    Other(String),
}

impl StopReason {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "tool_use" => Self::ToolUse,
            "end_turn" => Self::EndTurn,
            "max_tokens" => Self::MaxTokens,
            "stop_sequence" => Self::StopSequence,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn is_tool_use(&self) -> bool {
        matches!(self, Self::ToolUse)
    }
}

/// The closed set of semantic events the agent loop reacts to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StreamEvent {
    /// A fragment of model text, or of tool input JSON while a tool call is
    /// being assembled.
    TextFragment { text: String },

    /// The model opened a tool-use block.
    ToolCallStarted { id: String, name: String },

    /// The model closed a content block.
    ToolCallStopped,

    /// The model call finished.
    TurnStopped { reason: StopReason },

    /// A chunk with no meaning for the loop (pings, message start, usage).
    Ignore,
}

impl StreamEvent {
    pub fn text(text: impl Into<String>) -> Self {
        Self::TextFragment { text: text.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_reason_parsing() {
        assert_eq!(StopReason::parse("tool_use"), StopReason::ToolUse);
        assert_eq!(StopReason::parse("end_turn"), StopReason::EndTurn);
        assert_eq!(
            StopReason::parse("refusal"),
            StopReason::Other("refusal".into())
        );
        assert!(StopReason::ToolUse.is_tool_use());
        assert!(!StopReason::MaxTokens.is_tool_use());
    }
}
