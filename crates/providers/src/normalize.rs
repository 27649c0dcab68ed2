//! Stream Event Normalizer for Anthropic Messages SSE payloads.
//!
//! Every raw chunk maps to exactly one [`StreamEvent`]. A chunk whose
//! expected field is missing or has the wrong type maps to
//! [`StreamEvent::Ignore`], never to an empty or placeholder fragment.

use kbchat_core::provider::RawChunk;
use kbchat_core::stream::{StopReason, StreamEvent};

/// Decode one raw provider chunk.
pub fn normalize(chunk: &RawChunk) -> StreamEvent {
    match chunk["type"].as_str() {
        Some("content_block_start") => block_start(&chunk["content_block"]),
        Some("content_block_delta") => block_delta(&chunk["delta"]),
        Some("content_block_stop") => StreamEvent::ToolCallStopped,
        Some("message_delta") => match chunk["delta"]["stop_reason"].as_str() {
            Some(reason) => StreamEvent::TurnStopped {
                reason: StopReason::parse(reason),
            },
            None => StreamEvent::Ignore,
        },
        _ => StreamEvent::Ignore,
    }
}

fn block_start(block: &serde_json::Value) -> StreamEvent {
    match block["type"].as_str() {
        Some("tool_use") => match (block["id"].as_str(), block["name"].as_str()) {
            (Some(id), Some(name)) => StreamEvent::ToolCallStarted {
                id: id.to_string(),
                name: name.to_string(),
            },
            _ => StreamEvent::Ignore,
        },
        // Text blocks open empty; their content arrives as deltas
        Some("text") => match block["text"].as_str() {
            Some(text) if !text.is_empty() => StreamEvent::text(text),
            _ => StreamEvent::Ignore,
        },
        _ => StreamEvent::Ignore,
    }
}

fn block_delta(delta: &serde_json::Value) -> StreamEvent {
    let fragment = match delta["type"].as_str() {
        Some("text_delta") => delta["text"].as_str(),
        Some("input_json_delta") => delta["partial_json"].as_str(),
        _ => None,
    };
    fragment.map_or(StreamEvent::Ignore, StreamEvent::text)
}
