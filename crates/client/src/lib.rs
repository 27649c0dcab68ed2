//! WebSocket client for kbchat.
//!
//! [`ChatClient::send`] opens a connection, sends one request and returns a
//! [`ChatStream`]. Pull events from it with [`ChatStream::next`] until it
//! returns `None`; the last event is always `Complete` or `Error`.

pub mod decoder;

pub use decoder::{ClientEvent, FrameDecoder};

use futures::{SinkExt, StreamExt};
use kbchat_config::ClientConfig;
use kbchat_core::error::ProtocolError;
use kbchat_core::protocol::{ChatRequest, is_gateway_timeout_notice};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderValue, StatusCode, header};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

/// Reported when no frame arrives in time.
pub const IDLE_TIMEOUT_MESSAGE: &str = "The request timed out. Please try again.";

const LOST_CONNECTION_MESSAGE: &str = "The connection was lost. Please try again.";
const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(90);

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Clone)]
pub struct ChatClient {
    url: String,
    token: Option<String>,
    idle_timeout: Duration,
}

impl ChatClient {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            token: None,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        }
    }

    pub fn from_config(config: &ClientConfig) -> Self {
        let client = Self::new(&config.url).with_idle_timeout(Duration::from_secs(config.idle_timeout_secs));
        match &config.token {
            Some(token) => client.with_token(token),
            None => client,
        }
    }

    /// Bearer token sent in the `Authorization` header.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Open a connection and send `request`.
    pub async fn send(&self, request: &ChatRequest) -> Result<ChatStream, ProtocolError> {
        let mut handshake = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| ProtocolError::Transport(format!("invalid url {}: {e}", self.url)))?;
        if let Some(token) = &self.token {
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|_| ProtocolError::Transport("token is not a valid header value".into()))?;
            handshake.headers_mut().insert(header::AUTHORIZATION, value);
        }

        let (mut socket, _) = tokio_tungstenite::connect_async(handshake)
            .await
            .map_err(|e| match e {
                tungstenite::Error::Http(response)
                    if response.status() == StatusCode::UNAUTHORIZED =>
                {
                    ProtocolError::Unauthorized
                }
                other => ProtocolError::Transport(other.to_string()),
            })?;

        let body = serde_json::to_string(request)
            .map_err(|e| ProtocolError::MalformedRequest(e.to_string()))?;
        socket
            .send(Message::Text(body))
            .await
            .map_err(|e| ProtocolError::ConnectionClosed(e.to_string()))?;
        info!(url = %self.url, session_id = %request.session_id, "Request sent");

        Ok(ChatStream {
            socket,
            decoder: FrameDecoder::new(request.chat_history.is_empty()),
            pending: VecDeque::new(),
            idle_timeout: self.idle_timeout,
            deadline: Instant::now() + self.idle_timeout,
            done: false,
        })
    }
}

/// The events of one exchange, in order. Finite and not restartable.
pub struct ChatStream {
    socket: Socket,
    decoder: FrameDecoder,
    pending: VecDeque<ClientEvent>,
    idle_timeout: Duration,
    /// Moved forward by every frame except upstream gateway timeout notices
    deadline: Instant,
    done: bool,
}

impl ChatStream {
    /// The next event, or `None` after the terminal event.
    ///
    /// Until the first content arrives, each frame must follow the previous
    /// one (or the open) within the idle timeout. Gateway timeout notices do
    /// not count as activity.
    pub async fn next(&mut self) -> Option<ClientEvent> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                if event.is_terminal() {
                    self.done = true;
                    self.pending.clear();
                }
                return Some(event);
            }
            if self.done {
                return None;
            }

            let frame = if self.decoder.has_content() {
                self.socket.next().await
            } else {
                match tokio::time::timeout_at(self.deadline, self.socket.next()).await {
                    Ok(frame) => frame,
                    Err(_) => {
                        warn!(timeout = ?self.idle_timeout, "No frame from server, giving up");
                        self.done = true;
                        let _ = self.socket.close(None).await;
                        return Some(ClientEvent::Error(IDLE_TIMEOUT_MESSAGE.into()));
                    }
                }
            };

            match frame {
                Some(Ok(Message::Text(text))) => {
                    if !is_gateway_timeout_notice(&text) {
                        self.deadline = Instant::now() + self.idle_timeout;
                    }
                    self.pending.extend(self.decoder.decode(&text));
                }
                Some(Ok(Message::Close(_))) | None => {
                    debug!("Server closed the connection");
                    self.pending.extend(self.decoder.close());
                    if self.pending.is_empty() {
                        self.done = true;
                    }
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(error = %e, "Connection error");
                    self.done = true;
                    return Some(ClientEvent::Error(LOST_CONNECTION_MESSAGE.into()));
                }
            }
        }
    }

    /// Answer text received so far.
    pub fn answer(&self) -> &str {
        self.decoder.answer()
    }

    /// Drain the stream, returning every event.
    pub async fn collect(mut self) -> Vec<ClientEvent> {
        let mut events = Vec::new();
        while let Some(event) = self.next().await {
            events.push(event);
        }
        events
    }
}
