//! A provider that replays scripted raw chunks.
//!
//! Each call to `stream` plays the next script in the queue; each call to
//! `complete` returns the next scripted body. Used by the agent and gateway
//! tests and for running the server offline.

use async_trait::async_trait;
use kbchat_core::error::ProviderError;
use kbchat_core::provider::{ChunkReceiver, Provider, ProviderRequest, RawChunk};
use serde_json::json;
use std::collections::VecDeque;
use std::sync::Mutex;

/// One step of a scripted streaming call.
#[derive(Debug, Clone)]
pub enum ScriptStep {
    Chunk(RawChunk),
    /// The stream fails at this point
    Fail(ProviderError),
}

/// One scripted streaming call.
#[derive(Debug, Clone)]
pub enum Script {
    Stream(Vec<ScriptStep>),
    /// The call is rejected before any chunk arrives
    Reject(ProviderError),
}

impl Script {
    /// A plain answer streamed in the given pieces, ending with `end_turn`.
    pub fn text(pieces: &[&str]) -> Self {
        let mut steps = vec![
            chunk(json!({"type": "message_start", "message": {"id": "msg_scripted"}})),
            chunk(json!({"type": "content_block_start", "index": 0,
                "content_block": {"type": "text", "text": ""}})),
        ];
        steps.extend(pieces.iter().map(|p| text_delta(p)));
        steps.push(chunk(json!({"type": "content_block_stop", "index": 0})));
        steps.extend(end("end_turn"));
        Self::Stream(steps)
    }

    /// Optional preamble text, then a `tool_use` block whose input arrives
    /// in the given JSON pieces, ending with `tool_use`.
    ///
    /// Like the live API, the tool block's first input delta is empty.
    pub fn tool_call(preamble: &str, id: &str, name: &str, input_pieces: &[&str]) -> Self {
        let mut steps = vec![chunk(
            json!({"type": "message_start", "message": {"id": "msg_scripted"}}),
        )];
        let mut index = 0;
        if !preamble.is_empty() {
            steps.push(chunk(json!({"type": "content_block_start", "index": 0,
                "content_block": {"type": "text", "text": ""}})));
            steps.push(text_delta(preamble));
            steps.push(chunk(json!({"type": "content_block_stop", "index": 0})));
            index = 1;
        }
        steps.push(chunk(json!({"type": "content_block_start", "index": index,
            "content_block": {"type": "tool_use", "id": id, "name": name, "input": {}}})));
        steps.push(input_delta(""));
        steps.extend(input_pieces.iter().map(|p| input_delta(p)));
        steps.push(chunk(json!({"type": "content_block_stop", "index": index})));
        steps.extend(end("tool_use"));
        Self::Stream(steps)
    }

    /// Text pieces in an open block, after which the stream just ends: no
    /// stop reason and no `message_stop`.
    pub fn truncated_text(pieces: &[&str]) -> Self {
        let mut steps = vec![
            chunk(json!({"type": "message_start", "message": {"id": "msg_scripted"}})),
            chunk(json!({"type": "content_block_start", "index": 0,
                "content_block": {"type": "text", "text": ""}})),
        ];
        steps.extend(pieces.iter().map(|p| text_delta(p)));
        Self::Stream(steps)
    }

    /// Text pieces followed by a mid-stream failure.
    pub fn text_then_fail(pieces: &[&str], message: &str) -> Self {
        let mut steps: Vec<ScriptStep> = pieces.iter().map(|p| text_delta(p)).collect();
        steps.push(ScriptStep::Fail(ProviderError::StreamInterrupted(
            message.to_string(),
        )));
        Self::Stream(steps)
    }
}

fn chunk(value: RawChunk) -> ScriptStep {
    ScriptStep::Chunk(value)
}

fn text_delta(text: &str) -> ScriptStep {
    chunk(json!({"type": "content_block_delta", "index": 0,
        "delta": {"type": "text_delta", "text": text}}))
}

fn input_delta(partial: &str) -> ScriptStep {
    chunk(json!({"type": "content_block_delta", "index": 1,
        "delta": {"type": "input_json_delta", "partial_json": partial}}))
}

fn end(stop_reason: &str) -> [ScriptStep; 2] {
    [
        chunk(json!({"type": "message_delta", "delta": {"stop_reason": stop_reason},
            "usage": {"output_tokens": 12}})),
        chunk(json!({"type": "message_stop"})),
    ]
}

/// A Messages-style single-shot body holding one text block.
pub fn completion_body(text: &str) -> serde_json::Value {
    json!({
        "id": "msg_scripted",
        "type": "message",
        "role": "assistant",
        "content": [{"type": "text", "text": text}],
        "stop_reason": "end_turn"
    })
}

/// Replays queued scripts in order and records every request it receives.
pub struct ScriptedProvider {
    streams: Mutex<VecDeque<Script>>,
    completions: Mutex<VecDeque<Result<serde_json::Value, ProviderError>>>,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl ScriptedProvider {
    pub fn new(streams: Vec<Script>) -> Self {
        Self {
            streams: Mutex::new(streams.into()),
            completions: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Queue a single-shot reply.
    pub fn with_completion(self, reply: Result<serde_json::Value, ProviderError>) -> Self {
        lock(&self.completions).push_back(reply);
        self
    }

    /// Every request seen so far, streaming and single-shot.
    pub fn requests(&self) -> Vec<ProviderRequest> {
        lock(&self.requests).clone()
    }

    pub fn call_count(&self) -> usize {
        lock(&self.requests).len()
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn stream(&self, request: ProviderRequest) -> Result<ChunkReceiver, ProviderError> {
        lock(&self.requests).push(request);
        let script = lock(&self.streams)
            .pop_front()
            .ok_or_else(|| ProviderError::NotConfigured("no scripted stream left".into()))?;

        let steps = match script {
            Script::Reject(err) => return Err(err),
            Script::Stream(steps) => steps,
        };

        let (tx, rx) = tokio::sync::mpsc::channel(steps.len().max(1));
        tokio::spawn(async move {
            for step in steps {
                let item = match step {
                    ScriptStep::Chunk(value) => Ok(value),
                    ScriptStep::Fail(err) => Err(err),
                };
                let failed = item.is_err();
                if tx.send(item).await.is_err() || failed {
                    return;
                }
            }
        });
        Ok(rx)
    }

    async fn complete(&self, request: ProviderRequest) -> Result<serde_json::Value, ProviderError> {
        lock(&self.requests).push(request);
        lock(&self.completions)
            .pop_front()
            .unwrap_or_else(|| Ok(completion_body("Scripted Conversation")))
    }
}
