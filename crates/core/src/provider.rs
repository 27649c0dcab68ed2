//! Provider trait: the abstraction over LLM backends.
//!
//! A Provider knows how to send a conversation to an LLM and hand back
//! either the raw streamed chunks or the raw single-shot response body.
//! Decoding those payloads is the job of the normalizer and the model
//! adapter, not of the provider.

use crate::error::ProviderError;
use crate::message::Turn;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A tool definition sent to the LLM so it knows what tools it can call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// The tool name
    pub name: String,

    /// Description of what the tool does
    pub description: String,

    /// JSON Schema describing the tool's input
    pub input_schema: serde_json::Value,
}

/// Configuration for a provider request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderRequest {
    /// The model to use
    pub model: String,

    /// Top-level system prompt
    pub system: String,

    /// The conversation turns
    pub turns: Vec<Turn>,

    /// Temperature (0.0 = deterministic)
    pub temperature: f32,

    /// Maximum tokens to generate
    pub max_tokens: u32,

    /// Available tools the model can call
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDefinition>,
}

/// One undecoded chunk from a provider stream.
pub type RawChunk = serde_json::Value;

/// Receiving half of a provider stream.
pub type ChunkReceiver =
    tokio::sync::mpsc::Receiver<std::result::Result<RawChunk, ProviderError>>;

/// The core Provider trait.
#[async_trait]
pub trait Provider: Send + Sync {
    /// A human-readable name for this provider.
    fn name(&self) -> &str;

    /// Start a streaming call. Errors before the first chunk are returned
    /// directly; errors mid-stream arrive as `Err` items on the receiver.
    async fn stream(&self, request: ProviderRequest) -> std::result::Result<ChunkReceiver, ProviderError>;

    /// Single-shot call returning the raw response body.
    async fn complete(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<serde_json::Value, ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_definition_serialization() {
        let tool = ToolDefinition {
            name: "query_db".into(),
            description: "Query the knowledge base".into(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "query": { "type": "string" }
                },
                "required": ["query"]
            }),
        };
        let json = serde_json::to_string(&tool).unwrap();
        assert!(json.contains("query_db"));
        assert!(json.contains("input_schema"));
    }
}
