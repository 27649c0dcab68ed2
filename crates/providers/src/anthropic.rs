//! Anthropic native provider implementation.
//!
//! Uses Anthropic's Messages API directly.
//!
//! Features:
//! - `x-api-key` header authentication (not Bearer)
//! - `anthropic-version` header
//! - System prompt as top-level field
//! - Native tool use with `tool_use` / `tool_result` content blocks
//! - Streaming via SSE; every `data:` payload is forwarded undecoded

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use kbchat_core::error::ProviderError;
use kbchat_core::message::Turn;
use kbchat_core::provider::*;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const DEFAULT_TIMEOUT_SECS: u64 = 300;

/// Anthropic native Messages API provider.
pub struct AnthropicProvider {
    name: String,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl AnthropicProvider {
    /// Create a new Anthropic provider.
    pub fn new(api_key: impl Into<String>) -> Result<Self, ProviderError> {
        Self::with_timeout(api_key, DEFAULT_TIMEOUT_SECS)
    }

    /// Create a provider whose HTTP requests give up after `timeout_secs`.
    pub fn with_timeout(api_key: impl Into<String>, timeout_secs: u64) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        Ok(Self {
            name: "anthropic".into(),
            base_url: DEFAULT_BASE_URL.into(),
            api_key: api_key.into(),
            client,
        })
    }

    /// Create with a custom base URL (e.g., for testing or proxies).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn request_body(request: &ProviderRequest, stream: bool) -> serde_json::Value {
        let body = MessagesRequest {
            model: &request.model,
            system: (!request.system.is_empty()).then_some(request.system.as_str()),
            messages: &request.turns,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            tools: &request.tools,
            // One tool call per turn-stop
            tool_choice: (!request.tools.is_empty()).then(|| ToolChoice {
                kind: "auto",
                disable_parallel_tool_use: true,
            }),
            stream,
        };
        serde_json::to_value(body).unwrap_or_default()
    }

    async fn send(
        &self,
        body: &serde_json::Value,
        stream: bool,
    ) -> Result<reqwest::Response, ProviderError> {
        let url = format!("{}/v1/messages", self.base_url);
        let mut builder = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("Content-Type", "application/json");
        if stream {
            builder = builder.header("Accept", "text/event-stream");
        }

        let response = builder.json(body).send().await.map_err(|e| {
            if e.is_timeout() {
                ProviderError::Timeout(e.to_string())
            } else {
                ProviderError::Network(e.to_string())
            }
        })?;

        let status = response.status().as_u16();
        if status == 429 {
            let retry_after_secs = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok())
                .unwrap_or(5);
            return Err(ProviderError::RateLimited { retry_after_secs });
        }
        if status == 401 || status == 403 {
            return Err(ProviderError::AuthenticationFailed(
                "Invalid Anthropic API key".into(),
            ));
        }
        if status != 200 {
            let error_body = response.text().await.unwrap_or_default();
            warn!(status, body = %error_body, "Anthropic API error");
            return Err(ProviderError::ApiError {
                status_code: status,
                message: error_body,
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl kbchat_core::Provider for AnthropicProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<serde_json::Value, ProviderError> {
        let body = Self::request_body(&request, false);
        debug!(provider = "anthropic", model = %request.model, "Sending completion request");

        let response = self.send(&body, false).await?;
        response
            .json()
            .await
            .map_err(|e| ProviderError::ApiError {
                status_code: 200,
                message: format!("Failed to read Anthropic response: {e}"),
            })
    }

    async fn stream(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ChunkReceiver, ProviderError> {
        let body = Self::request_body(&request, true);
        debug!(
            provider = "anthropic",
            model = %request.model,
            turns = request.turns.len(),
            tools = request.tools.len(),
            "Sending streaming request"
        );

        let response = self.send(&body, true).await?;
        let (tx, rx) = mpsc::channel(64);

        tokio::spawn(forward_sse(response.bytes_stream(), tx));

        Ok(rx)
    }
}

/// Forward every SSE `data:` payload of `bytes` to `tx` until `message_stop`.
///
/// A body that ends before `message_stop` is reported as an interruption.
async fn forward_sse<S, B, E>(mut bytes: S, tx: mpsc::Sender<Result<RawChunk, ProviderError>>)
where
    S: Stream<Item = Result<B, E>> + Unpin,
    B: AsRef<[u8]>,
    E: std::fmt::Display,
{
    // Bytes, not text: a UTF-8 sequence may straddle two network chunks
    let mut buffer: Vec<u8> = Vec::new();

    while let Some(chunk_result) = bytes.next().await {
        let chunk = match chunk_result {
            Ok(b) => b,
            Err(e) => {
                let _ = tx
                    .send(Err(ProviderError::StreamInterrupted(e.to_string())))
                    .await;
                return;
            }
        };

        buffer.extend_from_slice(chunk.as_ref());

        while let Some(line_end) = buffer.iter().position(|&b| b == b'\n') {
            let raw_line: Vec<u8> = buffer.drain(..=line_end).collect();
            let line = String::from_utf8_lossy(&raw_line);
            let line = line.trim_end_matches(['\r', '\n']);

            // Event names are repeated in the payload's `type` field
            if line.is_empty() || line.starts_with(':') || line.starts_with("event:") {
                continue;
            }

            let Some(data) = line.strip_prefix("data:") else {
                continue;
            };
            let data = data.trim();
            if data.is_empty() {
                continue;
            }

            let event: serde_json::Value = match serde_json::from_str(data) {
                Ok(v) => v,
                Err(e) => {
                    trace!(error = %e, data = %data, "Ignoring unparseable Anthropic SSE");
                    continue;
                }
            };
            trace!(chunk = %event, "Anthropic SSE chunk");

            match event["type"].as_str() {
                Some("error") => {
                    let message = event["error"]["message"]
                        .as_str()
                        .unwrap_or("provider reported an error")
                        .to_string();
                    let _ = tx.send(Err(ProviderError::StreamInterrupted(message))).await;
                    return;
                }
                Some("message_stop") => {
                    let _ = tx.send(Ok(event)).await;
                    return;
                }
                _ => {
                    if tx.send(Ok(event)).await.is_err() {
                        // Receiver dropped: the exchange was abandoned
                        return;
                    }
                }
            }
        }
    }

    warn!("Anthropic stream closed before message_stop");
    let _ = tx
        .send(Err(ProviderError::StreamInterrupted(
            "stream closed before message_stop".into(),
        )))
        .await;
}

// --- Anthropic API types ---

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    messages: &'a [Turn],
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "<[_]>::is_empty")]
    tools: &'a [ToolDefinition],
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<ToolChoice>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

#[derive(Serialize)]
struct ToolChoice {
    #[serde(rename = "type")]
    kind: &'static str,
    disable_parallel_tool_use: bool,
}

/// Concatenated text blocks of a single-shot Messages response.
pub fn response_text(body: &serde_json::Value) -> Option<String> {
    let blocks = body["content"].as_array()?;
    let text: String = blocks
        .iter()
        .filter(|b| b["type"].as_str() == Some("text"))
        .filter_map(|b| b["text"].as_str())
        .collect();
    (!text.is_empty()).then_some(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use kbchat_core::Provider;
    use kbchat_core::message::ContentBlock;

    fn request() -> ProviderRequest {
        ProviderRequest {
            model: "claude-sonnet-4-20250514".into(),
            system: "You are helpful".into(),
            turns: vec![Turn::user("Hello")],
            temperature: 0.01,
            max_tokens: 2048,
            tools: vec![],
        }
    }

    #[test]
    fn constructor() {
        let provider = AnthropicProvider::new("sk-ant-test").unwrap();
        assert_eq!(provider.name(), "anthropic");
        assert_eq!(provider.base_url, DEFAULT_BASE_URL);
    }

    #[test]
    fn constructor_with_base_url() {
        let provider = AnthropicProvider::new("sk-ant-test")
            .unwrap()
            .with_base_url("https://custom.proxy.com/");
        assert_eq!(provider.base_url, "https://custom.proxy.com");
    }

    #[test]
    fn streaming_body_shape() {
        let body = AnthropicProvider::request_body(&request(), true);
        assert_eq!(body["system"], "You are helpful");
        assert_eq!(body["stream"], true);
        assert_eq!(body["max_tokens"], 2048);
        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(body["messages"][0]["content"][0]["type"], "text");
        assert!(body.get("tools").is_none());
        assert!(body.get("tool_choice").is_none());
    }

    #[test]
    fn single_shot_body_omits_stream_flag() {
        let mut req = request();
        req.system.clear();
        let body = AnthropicProvider::request_body(&req, false);
        assert!(body.get("stream").is_none());
        assert!(body.get("system").is_none());
    }

    #[test]
    fn tool_blocks_use_native_shape() {
        let mut req = request();
        req.turns.push(Turn {
            role: kbchat_core::Role::Assistant,
            content: vec![ContentBlock::ToolUse {
                id: "toolu_1".into(),
                name: "query_db".into(),
                input: serde_json::json!({"query": "hvac"}),
            }],
        });
        req.turns.push(Turn::tool_result("toolu_1", "passages"));
        req.tools.push(ToolDefinition {
            name: "query_db".into(),
            description: "Query".into(),
            input_schema: serde_json::json!({"type": "object"}),
        });

        let body = AnthropicProvider::request_body(&req, true);
        let tool_use = &body["messages"][1]["content"][0];
        assert_eq!(tool_use["type"], "tool_use");
        assert_eq!(tool_use["input"]["query"], "hvac");
        let result = &body["messages"][2]["content"][0];
        assert_eq!(result["type"], "tool_result");
        assert_eq!(result["tool_use_id"], "toolu_1");
        assert_eq!(result["content"], "passages");
        assert_eq!(body["tools"][0]["input_schema"]["type"], "object");
        assert_eq!(body["tool_choice"]["disable_parallel_tool_use"], true);
    }

    #[test]
    fn response_text_joins_text_blocks() {
        let body = serde_json::json!({
            "id": "msg_01",
            "content": [
                {"type": "text", "text": "HVAC "},
                {"type": "tool_use", "id": "t", "name": "x", "input": {}},
                {"type": "text", "text": "Contracts"}
            ]
        });
        assert_eq!(response_text(&body).as_deref(), Some("HVAC Contracts"));
        assert_eq!(response_text(&serde_json::json!({"content": []})), None);
        assert_eq!(response_text(&serde_json::json!({"error": "x"})), None);
    }

    async fn forwarded(body: &[&str]) -> Vec<Result<RawChunk, ProviderError>> {
        let pieces: Vec<Result<Vec<u8>, std::io::Error>> =
            body.iter().map(|p| Ok(p.as_bytes().to_vec())).collect();
        let (tx, mut rx) = mpsc::channel(64);
        forward_sse(futures::stream::iter(pieces), tx).await;
        let mut items = Vec::new();
        while let Some(item) = rx.recv().await {
            items.push(item);
        }
        items
    }

    #[tokio::test]
    async fn sse_payloads_are_forwarded_until_message_stop() {
        let items = forwarded(&[
            ": ping\n\nevent: content_block_delta\n",
            "data: {\"type\":\"content_block_delta\",\"delta\":{\"type\":\"text_delta\",\"text\":\"Ac",
            "me\"}}\n\ndata: not json\n\n",
            "data: {\"type\":\"message_stop\"}\n\ndata: {\"type\":\"ignored\"}\n",
        ])
        .await;
        assert_eq!(items.len(), 2);
        let first = items[0].as_ref().unwrap();
        assert_eq!(first["delta"]["text"], "Acme");
        assert_eq!(items[1].as_ref().unwrap()["type"], "message_stop");
    }

    #[tokio::test]
    async fn body_ending_before_message_stop_is_interrupted() {
        let items = forwarded(&[
            "data: {\"type\":\"content_block_delta\",\"delta\":{\"type\":\"text_delta\",\"text\":\"The vendor is Ac\"}}\n\n",
        ])
        .await;
        assert_eq!(items.len(), 2);
        assert!(items[0].is_ok());
        assert!(matches!(items[1], Err(ProviderError::StreamInterrupted(_))));
    }

    #[tokio::test]
    async fn error_event_is_interrupted() {
        let items = forwarded(&[
            "data: {\"type\":\"error\",\"error\":{\"type\":\"overloaded_error\",\"message\":\"Overloaded\"}}\n\n",
        ])
        .await;
        assert_eq!(items.len(), 1);
        assert!(matches!(&items[0], Err(ProviderError::StreamInterrupted(m)) if m == "Overloaded"));
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_network_error() {
        let provider = AnthropicProvider::new("sk-ant-test")
            .unwrap()
            .with_base_url("http://127.0.0.1:1");
        let err = provider.stream(request()).await.unwrap_err();
        assert!(matches!(
            err,
            ProviderError::Network(_) | ProviderError::Timeout(_)
        ));
    }
}
