//! Model Adapter.
//!
//! Turns stored history into provider turns, declares the tool catalog on
//! every streaming call and wraps the single-shot call used for auxiliary
//! generation.

use kbchat_core::error::ProviderError;
use kbchat_core::message::{HistoryPair, Turn};
use kbchat_core::provider::{ChunkReceiver, Provider, ProviderRequest, ToolDefinition};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::anthropic::response_text;

/// Returned by [`ModelAdapter::complete_once`] when the reply carries no text.
pub const COMPLETION_FALLBACK: &str =
    "I'm sorry, I encountered an issue processing your request. Please try again.";

const DEFAULT_TEMPERATURE: f32 = 0.01;
const DEFAULT_MAX_TOKENS: u32 = 2048;

pub struct ModelAdapter {
    provider: Arc<dyn Provider>,
    model: String,
    fast_model: String,
    temperature: f32,
    max_tokens: u32,
    tools: Vec<ToolDefinition>,
}

impl ModelAdapter {
    pub fn new(provider: Arc<dyn Provider>, model: impl Into<String>) -> Self {
        let model = model.into();
        Self {
            provider,
            fast_model: model.clone(),
            model,
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
            tools: Vec::new(),
        }
    }

    /// Model used by [`complete_once`](Self::complete_once).
    pub fn with_fast_model(mut self, model: impl Into<String>) -> Self {
        self.fast_model = model.into();
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// The tool catalog declared on every streaming call.
    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = tools;
        self
    }

    pub fn tools(&self) -> &[ToolDefinition] {
        &self.tools
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    /// Flatten stored pairs into alternating user/assistant turns and append
    /// the new user message. `N` pairs yield `2N + 1` turns.
    pub fn build_history(history: &[HistoryPair], user_message: &str) -> Vec<Turn> {
        let mut turns = Vec::with_capacity(history.len() * 2 + 1);
        for pair in history {
            turns.push(Turn::user(pair.user.clone()));
            turns.push(Turn::assistant(pair.assistant.clone()));
        }
        turns.push(Turn::user(user_message));
        turns
    }

    /// Start one streaming model call with the full tool catalog.
    pub async fn stream_completion(
        &self,
        system: &str,
        turns: &[Turn],
    ) -> Result<ChunkReceiver, ProviderError> {
        let request = ProviderRequest {
            model: self.model.clone(),
            system: system.to_string(),
            turns: turns.to_vec(),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            tools: self.tools.clone(),
        };
        self.provider.stream(request).await
    }

    /// Single-shot call without tools.
    ///
    /// Provider failures are returned; a reply that decodes to no text
    /// yields [`COMPLETION_FALLBACK`].
    pub async fn complete_once(
        &self,
        system: &str,
        turns: &[Turn],
        max_tokens: u32,
    ) -> Result<String, ProviderError> {
        let request = ProviderRequest {
            model: self.fast_model.clone(),
            system: system.to_string(),
            turns: turns.to_vec(),
            temperature: 0.0,
            max_tokens,
            tools: Vec::new(),
        };
        let body = self.provider.complete(request).await?;
        match response_text(&body) {
            Some(text) => {
                debug!(model = %self.fast_model, chars = text.len(), "Single-shot completion");
                Ok(text)
            }
            None => {
                warn!(model = %self.fast_model, "Single-shot reply had no text, using fallback");
                Ok(COMPLETION_FALLBACK.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scripted::{Script, ScriptedProvider, completion_body};
    use kbchat_core::message::{Role, tool_pairing_holds};

    fn adapter(provider: Arc<ScriptedProvider>) -> ModelAdapter {
        ModelAdapter::new(provider, "main-model")
            .with_fast_model("fast-model")
            .with_tools(vec![ToolDefinition {
                name: "query_db".into(),
                description: "Query".into(),
                input_schema: serde_json::json!({"type": "object"}),
            }])
    }

    #[test]
    fn history_alternates_and_ends_with_user() {
        for n in 0..4 {
            let pairs: Vec<HistoryPair> = (0..n)
                .map(|i| HistoryPair::new(format!("q{i}"), format!("a{i}")))
                .collect();
            let turns = ModelAdapter::build_history(&pairs, "new question");
            assert_eq!(turns.len(), 2 * n + 1);
            for (i, turn) in turns.iter().enumerate() {
                let expected = if i % 2 == 0 { Role::User } else { Role::Assistant };
                assert_eq!(turn.role, expected);
            }
            assert_eq!(turns.last(), Some(&Turn::user("new question")));
            assert!(tool_pairing_holds(&turns));
        }
    }

    #[tokio::test]
    async fn streaming_call_declares_tools() {
        let provider = Arc::new(ScriptedProvider::new(vec![Script::text(&["hi"])]));
        let adapter = adapter(provider.clone());
        let turns = ModelAdapter::build_history(&[], "hello");
        let mut rx = adapter.stream_completion("system", &turns).await.unwrap();
        while rx.recv().await.is_some() {}

        let requests = provider.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].model, "main-model");
        assert_eq!(requests[0].tools.len(), 1);
        assert_eq!(requests[0].temperature, 0.01);
        assert_eq!(requests[0].max_tokens, 2048);
    }

    #[tokio::test]
    async fn complete_once_uses_fast_model_without_tools() {
        let provider = Arc::new(
            ScriptedProvider::new(vec![]).with_completion(Ok(completion_body("HVAC Contracts"))),
        );
        let adapter = adapter(provider.clone());
        let text = adapter
            .complete_once("title", &[Turn::user("User: hvac")], 15)
            .await
            .unwrap();
        assert_eq!(text, "HVAC Contracts");

        let request = &provider.requests()[0];
        assert_eq!(request.model, "fast-model");
        assert_eq!(request.max_tokens, 15);
        assert_eq!(request.temperature, 0.0);
        assert!(request.tools.is_empty());
    }

    #[tokio::test]
    async fn undecodable_reply_falls_back() {
        let provider = Arc::new(
            ScriptedProvider::new(vec![])
                .with_completion(Ok(serde_json::json!({"content": [{"type": "tool_use"}]}))),
        );
        let text = adapter(provider)
            .complete_once("", &[Turn::user("x")], 15)
            .await
            .unwrap();
        assert_eq!(text, COMPLETION_FALLBACK);
    }

    #[tokio::test]
    async fn provider_failure_is_surfaced() {
        let provider = Arc::new(
            ScriptedProvider::new(vec![Script::Reject(ProviderError::Network("down".into()))])
                .with_completion(Err(ProviderError::Network("down".into()))),
        );
        let adapter = adapter(provider);
        assert!(adapter.stream_completion("", &[Turn::user("x")]).await.is_err());
        assert!(adapter.complete_once("", &[Turn::user("x")], 15).await.is_err());
    }
}
