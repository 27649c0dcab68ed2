//! Conversation domain types.
//!
//! A conversation sent to the model is an ordered sequence of [`Turn`]s,
//! each holding one or more [`ContentBlock`]s. Stored history arrives from
//! the client as [`HistoryPair`]s and is flattened into turns by the model
//! adapter.

use serde::{Deserialize, Serialize};

/// The role of a turn's author.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The end user (tool results are also delivered in user turns)
    User,
    /// The model
    Assistant,
}

/// One block of turn content.
///
/// `ToolResult::content` is always a plain string; the provider rejects
/// structured tool results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
    },
}

/// A single turn in the conversation sent to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: Vec<ContentBlock>,
}

impl Turn {
    /// A user turn with a single text block.
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: vec![ContentBlock::Text { text: text.into() }],
        }
    }

    /// An assistant turn with a single text block.
    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: vec![ContentBlock::Text { text: text.into() }],
        }
    }

    /// A user turn carrying the result of a tool call.
    pub fn tool_result(tool_use_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: vec![ContentBlock::ToolResult {
                tool_use_id: tool_use_id.into(),
                content: content.into(),
            }],
        }
    }

    /// Identifiers of every `tool_use` block in this turn.
    pub fn tool_use_ids(&self) -> impl Iterator<Item = &str> {
        self.content.iter().filter_map(|block| match block {
            ContentBlock::ToolUse { id, .. } => Some(id.as_str()),
            _ => None,
        })
    }
}

/// One stored exchange as the client sends it back with each request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryPair {
    pub user: String,

    #[serde(rename = "chatbot")]
    pub assistant: String,

    /// Serialized sources of the assistant answer (opaque here)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<String>,
}

impl HistoryPair {
    pub fn new(user: impl Into<String>, assistant: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            assistant: assistant.into(),
            metadata: None,
        }
    }
}

/// The trailing `size` pairs of a stored history.
///
/// This bounds the context sent to the model independently of how long the
/// persisted session grows.
pub fn conversation_window(history: &[HistoryPair], size: usize) -> &[HistoryPair] {
    let start = history.len().saturating_sub(size);
    &history[start..]
}

/// Check that every `tool_use` block is answered by a matching
/// `tool_result` in the very next turn.
pub fn tool_pairing_holds(turns: &[Turn]) -> bool {
    turns.iter().enumerate().all(|(i, turn)| {
        turn.tool_use_ids().all(|id| {
            turns.get(i + 1).is_some_and(|next| {
                next.content.iter().any(|block| {
                    matches!(block, ContentBlock::ToolResult { tool_use_id, .. } if tool_use_id == id)
                })
            })
        })
    })
}
