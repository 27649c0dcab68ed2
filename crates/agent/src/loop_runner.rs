//! The agent loop: one exchange from user message to final answer.
//!
//! Each iteration makes one streaming model call and drains it completely.
//! Text is forwarded as it arrives; a tool request is assembled from the
//! stream, executed once the turn stops, and its result is fed back into the
//! next call. The exchange ends on the first turn that stops for any reason
//! other than a tool request.

use kbchat_core::error::ProviderError;
use kbchat_core::knowledge::{Source, dedup_sources};
use kbchat_core::message::{ContentBlock, HistoryPair, Role, Turn, conversation_window};
use kbchat_core::stream::{StopReason, StreamEvent};
use kbchat_core::tool::ToolCall;
use kbchat_providers::{ModelAdapter, normalize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};

use crate::config::AgentConfig;
use crate::stream_event::AgentStreamEvent;

/// Tool result sent back when the model's tool input is not a JSON object.
pub const MALFORMED_TOOL_INPUT: &str =
    "Error: could not process the tool input. Please respond to the user without using tools.";

/// Tool result sent back when the model names a tool that is not registered.
pub const UNKNOWN_TOOL: &str = "Unknown tool requested.";

/// Status sent after every tool result.
pub const READING_RESULTS: &str = "Reading through the results...";

/// Appended to the answer when the iteration limit stops the loop.
pub const MAX_ITERATIONS_NOTICE: &str = "I've reached the maximum number of research steps for this question. Please try asking in a more specific way.";

/// User-facing message for a failed model call.
pub const PROVIDER_FAILURE_MESSAGE: &str = "I'm sorry, something went wrong processing your request. Please try again or rephrase your question.";

/// User-facing message for an exchange that ran out of time.
pub const TIMEOUT_MESSAGE: &str =
    "I'm sorry, your request took too long to process. Please try again or rephrase your question.";

/// Orchestrator states. `Done` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    StreamingText,
    AssemblingToolInput,
    ExecutingTool,
    Done,
    Failed,
}

/// Why an exchange ended in `Failed`.
#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("model call failed: {0}")]
    Provider(#[from] ProviderError),

    #[error("exchange exceeded its {0:?} budget")]
    TimedOut(Duration),

    #[error("event receiver went away")]
    Disconnected,
}

impl ExchangeError {
    /// The plain-language message shown to the user.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::TimedOut(_) => TIMEOUT_MESSAGE,
            Self::Provider(_) | Self::Disconnected => PROVIDER_FAILURE_MESSAGE,
        }
    }
}

/// Result of an exchange that reached `Done`.
#[derive(Debug, Clone)]
pub struct ExchangeOutcome {
    /// Every content fragment, concatenated
    pub answer: String,
    /// Cited sources, unique by source identity
    pub sources: Vec<Source>,
    /// Model calls made
    pub iterations: u32,
    /// Tool requests serviced, malformed ones included
    pub tool_calls: u32,
    /// The conversation as the model last saw it, plus the final answer turn
    pub turns: Vec<Turn>,
    /// Whether the iteration guard ended the loop
    pub hit_iteration_limit: bool,
}

/// Drives exchanges against one shared [`AgentConfig`].
#[derive(Clone)]
pub struct AgentLoop {
    config: Arc<AgentConfig>,
}

impl AgentLoop {
    pub fn new(config: Arc<AgentConfig>) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Run one exchange, streaming events into `events`.
    ///
    /// The whole exchange is bounded by `exchange_timeout`. A dropped
    /// receiver ends the exchange with [`ExchangeError::Disconnected`].
    pub async fn process(
        &self,
        history: &[HistoryPair],
        user_message: &str,
        events: mpsc::Sender<AgentStreamEvent>,
    ) -> Result<ExchangeOutcome, ExchangeError> {
        let budget = self.config.exchange_timeout;
        let result = match tokio::time::timeout(budget, self.run(history, user_message, &events)).await
        {
            Ok(result) => result,
            Err(_) => Err(ExchangeError::TimedOut(budget)),
        };

        match &result {
            Ok(outcome) => info!(
                iterations = outcome.iterations,
                tool_calls = outcome.tool_calls,
                sources = outcome.sources.len(),
                answer_chars = outcome.answer.len(),
                "Exchange complete"
            ),
            Err(ExchangeError::Disconnected) => debug!("Exchange abandoned by receiver"),
            Err(e) => error!(state = ?LoopState::Failed, error = %e, "Exchange failed"),
        }
        result
    }

    async fn run(
        &self,
        history: &[HistoryPair],
        user_message: &str,
        events: &mpsc::Sender<AgentStreamEvent>,
    ) -> Result<ExchangeOutcome, ExchangeError> {
        let config = &self.config;
        let window = conversation_window(history, config.history_window);
        let mut turns = ModelAdapter::build_history(window, user_message);
        let mut answer = String::new();
        let mut sources = Vec::new();
        let mut iterations = 0u32;
        let mut tool_calls = 0u32;
        let mut hit_iteration_limit = false;

        info!(
            history_pairs = window.len(),
            tools = config.tools.len(),
            "Exchange started"
        );

        loop {
            if iterations >= config.max_iterations {
                warn!(max_iterations = config.max_iterations, "Iteration limit reached");
                let notice = if answer.is_empty() {
                    MAX_ITERATIONS_NOTICE.to_string()
                } else {
                    format!("\n\n{MAX_ITERATIONS_NOTICE}")
                };
                emit(events, AgentStreamEvent::chunk(notice.clone())).await?;
                answer.push_str(&notice);
                hit_iteration_limit = true;
                break;
            }
            iterations += 1;
            debug!(iteration = iterations, turns = turns.len(), "Calling model");

            let mut stream = config
                .adapter
                .stream_completion(&config.system_prompt, &turns)
                .await?;

            let mut iteration = Iteration::new();
            while let Some(item) = stream.recv().await {
                let chunk = item?;
                trace!(iteration = iterations, chunk = %chunk, "Raw chunk");
                if let Some(text) = iteration.apply(normalize(&chunk)) {
                    answer.push_str(&text);
                    emit(events, AgentStreamEvent::chunk(text)).await?;
                }
            }

            match iteration.finish()? {
                Finished::Answer { text } => {
                    debug!(state = ?LoopState::Done, iteration = iterations, "Model finished");
                    if !text.is_empty() {
                        turns.push(Turn::assistant(text));
                    }
                    break;
                }
                Finished::ToolRequest {
                    text,
                    id,
                    name,
                    input,
                } => {
                    debug!(state = ?LoopState::ExecutingTool, tool = %name, "Tool requested");
                    tool_calls += 1;
                    let mut content = Vec::with_capacity(2);
                    if !text.is_empty() {
                        content.push(ContentBlock::Text { text });
                    }

                    let result = match parse_tool_input(&input) {
                        Some(input) => {
                            let result = self
                                .execute_tool(&id, &name, &input, events, &mut sources)
                                .await?;
                            content.push(ContentBlock::ToolUse {
                                id: id.clone(),
                                name,
                                input,
                            });
                            Some(result)
                        }
                        None => {
                            warn!(tool = %name, raw_input = %input, "Tool input is not a JSON object");
                            content.push(ContentBlock::ToolUse {
                                id: id.clone(),
                                name,
                                input: Value::Object(Default::default()),
                            });
                            None
                        }
                    };

                    turns.push(Turn {
                        role: Role::Assistant,
                        content,
                    });
                    match result {
                        Some(result) => {
                            turns.push(Turn::tool_result(id, result));
                            emit(events, AgentStreamEvent::status(READING_RESULTS)).await?;
                        }
                        None => turns.push(Turn::tool_result(id, MALFORMED_TOOL_INPUT)),
                    }
                }
            }
        }

        Ok(ExchangeOutcome {
            answer,
            sources: dedup_sources(sources),
            iterations,
            tool_calls,
            turns,
            hit_iteration_limit,
        })
    }

    /// Run one tool and return the string handed back to the model.
    async fn execute_tool(
        &self,
        id: &str,
        name: &str,
        input: &Value,
        events: &mpsc::Sender<AgentStreamEvent>,
        sources: &mut Vec<Source>,
    ) -> Result<String, ExchangeError> {
        let Some(tool) = self.config.tools.get(name) else {
            warn!(tool = %name, "Model requested an unknown tool");
            return Ok(UNKNOWN_TOOL.to_string());
        };

        if let Some(status) = tool.status_message() {
            emit(events, AgentStreamEvent::status(status)).await?;
        }
        emit(
            events,
            AgentStreamEvent::ToolCall {
                id: id.to_string(),
                name: name.to_string(),
                input: input.clone(),
            },
        )
        .await?;

        let call = ToolCall {
            id: id.to_string(),
            name: name.to_string(),
            input: input.clone(),
        };
        let (content, success) = match self.config.tools.execute(&call).await {
            Ok(output) => {
                debug!(
                    tool = %name,
                    chars = output.content.len(),
                    sources = output.sources.len(),
                    "Tool executed"
                );
                sources.extend(output.sources);
                (output.content, true)
            }
            Err(e) => {
                warn!(tool = %name, error = %e, "Tool execution failed");
                (format!("Error: {e}"), false)
            }
        };

        emit(
            events,
            AgentStreamEvent::ToolResult {
                id: id.to_string(),
                name: name.to_string(),
                success,
            },
        )
        .await?;
        Ok(content)
    }
}

async fn emit(
    events: &mpsc::Sender<AgentStreamEvent>,
    event: AgentStreamEvent,
) -> Result<(), ExchangeError> {
    events
        .send(event)
        .await
        .map_err(|_| ExchangeError::Disconnected)
}

/// Tool input must decode to a JSON object. An empty buffer means the
/// model sent no arguments.
fn parse_tool_input(raw: &str) -> Option<Value> {
    if raw.trim().is_empty() {
        return Some(Value::Object(Default::default()));
    }
    serde_json::from_str::<Value>(raw)
        .ok()
        .filter(Value::is_object)
}

struct PendingTool {
    id: String,
    name: String,
    input: String,
    closed: bool,
}

/// What one drained model call asked for.
#[derive(Debug, PartialEq)]
enum Finished {
    Answer {
        text: String,
    },
    ToolRequest {
        text: String,
        id: String,
        name: String,
        input: String,
    },
}

/// State of a single model call.
struct Iteration {
    state: LoopState,
    text: String,
    tool: Option<PendingTool>,
    stop: Option<StopReason>,
}

impl Iteration {
    fn new() -> Self {
        Self {
            state: LoopState::StreamingText,
            text: String::new(),
            tool: None,
            stop: None,
        }
    }

    /// Feed one event. Returns text to forward to the client.
    fn apply(&mut self, event: StreamEvent) -> Option<String> {
        if self.stop.is_some() {
            return None;
        }
        match (self.state, event) {
            (_, StreamEvent::TurnStopped { reason }) => {
                self.stop = Some(reason);
                None
            }
            (LoopState::StreamingText, StreamEvent::TextFragment { text }) => {
                if text.is_empty() {
                    return None;
                }
                self.text.push_str(&text);
                Some(text)
            }
            (LoopState::StreamingText, StreamEvent::ToolCallStarted { id, name }) => {
                debug!(tool = %name, "Assembling tool input");
                self.tool = Some(PendingTool {
                    id,
                    name,
                    input: String::new(),
                    closed: false,
                });
                self.state = LoopState::AssemblingToolInput;
                None
            }
            (LoopState::AssemblingToolInput, StreamEvent::TextFragment { text }) => {
                if let Some(tool) = self.tool.as_mut().filter(|tool| !tool.closed) {
                    tool.input.push_str(&text);
                }
                None
            }
            (LoopState::AssemblingToolInput, StreamEvent::ToolCallStopped) => {
                if let Some(tool) = self.tool.as_mut() {
                    tool.closed = true;
                }
                None
            }
            (LoopState::AssemblingToolInput, StreamEvent::ToolCallStarted { name, .. }) => {
                warn!(tool = %name, "Ignoring a second tool call in the same turn");
                None
            }
            // Text block closes and unrecognised chunks
            _ => None,
        }
    }

    /// Decide the outcome of a drained call. A call that never reported a
    /// stop reason was cut off.
    fn finish(self) -> Result<Finished, ProviderError> {
        let Some(stop) = &self.stop else {
            warn!(streamed_chars = self.text.len(), "Model stream ended without a stop reason");
            return Err(ProviderError::StreamInterrupted(
                "model stream ended without a stop reason".into(),
            ));
        };
        let tool_stop = stop.is_tool_use();
        Ok(match self.tool {
            Some(tool) if tool_stop => Finished::ToolRequest {
                text: self.text,
                id: tool.id,
                name: tool.name,
                input: tool.input,
            },
            tool => {
                if tool_stop {
                    warn!("Turn stopped for a tool call but no tool block arrived");
                } else if let Some(tool) = tool {
                    warn!(tool = %tool.name, stop = ?self.stop, "Tool call cut off by a non-tool stop");
                }
                Finished::Answer { text: self.text }
            }
        })
    }
}
