//! Transport Encoder.
//!
//! Runs one exchange and writes its frames in wire order:
//!
//! ```text
//! (Content | Status)* EndOfStream Sources      on success
//! Error                                        on failure
//! ```
//!
//! Persistence is not part of this stage; the caller runs it once the
//! sources frame is out.

use async_trait::async_trait;
use kbchat_agent::{AgentLoop, AgentStreamEvent, ExchangeError, ExchangeOutcome};
use kbchat_core::error::ProtocolError;
use kbchat_core::protocol::{ChatRequest, ProtocolFrame, content_frames};
use tokio::sync::mpsc;
use tracing::{debug, warn};

const EVENT_BUFFER: usize = 64;

/// Destination of encoded frames.
#[async_trait]
pub trait FrameSink: Send {
    async fn send_frame(&mut self, frame: ProtocolFrame) -> Result<(), ProtocolError>;
}

/// Collects frames in memory.
#[async_trait]
impl FrameSink for Vec<ProtocolFrame> {
    async fn send_frame(&mut self, frame: ProtocolFrame) -> Result<(), ProtocolError> {
        self.push(frame);
        Ok(())
    }
}

/// How the streaming stage ended.
#[derive(Debug)]
pub enum StreamResult {
    /// EOF and sources were sent
    Completed(ExchangeOutcome),
    /// One error frame was sent
    Failed(ExchangeError),
    /// The sink stopped accepting frames; the exchange was dropped
    Disconnected,
}

/// Run the exchange for `request`, writing frames to `sink`.
///
/// If the sink fails mid-exchange the in-flight exchange is dropped, which
/// closes the provider stream.
pub async fn stream_exchange<S: FrameSink>(
    agent: &AgentLoop,
    request: &ChatRequest,
    sink: &mut S,
) -> StreamResult {
    let (tx, mut rx) = mpsc::channel(EVENT_BUFFER);

    let result = {
        let exchange = agent.process(&request.chat_history, &request.user_message, tx);
        tokio::pin!(exchange);
        loop {
            tokio::select! {
                biased;
                Some(event) = rx.recv() => {
                    if forward(sink, event).await.is_err() {
                        return StreamResult::Disconnected;
                    }
                }
                result = &mut exchange => break result,
            }
        }
    };
    while let Ok(event) = rx.try_recv() {
        if forward(sink, event).await.is_err() {
            return StreamResult::Disconnected;
        }
    }

    match result {
        Ok(outcome) => {
            let sent = async {
                sink.send_frame(ProtocolFrame::EndOfStream).await?;
                sink.send_frame(ProtocolFrame::Sources(outcome.sources.clone())).await
            };
            match sent.await {
                Ok(()) => StreamResult::Completed(outcome),
                Err(e) => {
                    warn!(error = %e, "Could not deliver end of stream");
                    StreamResult::Disconnected
                }
            }
        }
        Err(ExchangeError::Disconnected) => StreamResult::Disconnected,
        Err(e) => {
            if let Err(send_err) = sink
                .send_frame(ProtocolFrame::Error(e.user_message().to_string()))
                .await
            {
                debug!(error = %send_err, "Could not deliver error frame");
            }
            StreamResult::Failed(e)
        }
    }
}

async fn forward<S: FrameSink>(sink: &mut S, event: AgentStreamEvent) -> Result<(), ProtocolError> {
    match event {
        AgentStreamEvent::Chunk { content } => {
            for frame in content_frames(&content) {
                sink.send_frame(frame).await?;
            }
            Ok(())
        }
        AgentStreamEvent::Status { message } => sink.send_frame(ProtocolFrame::Status(message)).await,
        AgentStreamEvent::ToolCall { id, name, input } => {
            debug!(tool_call_id = %id, tool = %name, input = %input, "Tool call");
            Ok(())
        }
        AgentStreamEvent::ToolResult { id, name, success } => {
            debug!(tool_call_id = %id, tool = %name, success, "Tool result");
            Ok(())
        }
    }
}
