//! `GET /ws`: one chat exchange per connection.
//!
//! The client sends a single request frame right after the upgrade. The
//! server streams the answer, persists the exchange once the sources frame
//! is out, then closes the connection.

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use kbchat_core::error::ProtocolError;
use kbchat_core::protocol::{ProtocolFrame, parse_request};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::SharedState;
use crate::encoder::{FrameSink, StreamResult, stream_exchange};
use crate::persist::persist_exchange;

/// Sent when the first frame is not a usable request.
pub const MALFORMED_REQUEST_MESSAGE: &str =
    "I'm sorry, your request could not be understood. Please try again.";

const REQUEST_WAIT: Duration = Duration::from_secs(30);

#[derive(Debug, Default, Deserialize)]
pub struct ConnectParams {
    #[serde(default)]
    pub token: Option<String>,
}

/// Token from `Authorization: Bearer ...`, falling back to `?token=`.
pub fn connection_token<'a>(headers: &'a HeaderMap, params: &'a ConnectParams) -> Option<&'a str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .or(params.token.as_deref())
}

pub async fn ws_handler(
    State(state): State<SharedState>,
    Query(params): Query<ConnectParams>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    if !state.verifier.verify(connection_token(&headers, &params)) {
        warn!("Rejected connection with missing or invalid token");
        return StatusCode::UNAUTHORIZED.into_response();
    }
    ws.on_upgrade(move |socket| handle_connection(socket, state))
}

#[async_trait]
impl FrameSink for SplitSink<WebSocket, Message> {
    async fn send_frame(&mut self, frame: ProtocolFrame) -> Result<(), ProtocolError> {
        self.send(Message::Text(frame.encode().into()))
            .await
            .map_err(|e| ProtocolError::ConnectionClosed(e.to_string()))
    }
}

async fn handle_connection(socket: WebSocket, state: SharedState) {
    let (mut sender, mut receiver) = socket.split();

    let raw = match tokio::time::timeout(REQUEST_WAIT, next_text(&mut receiver)).await {
        Ok(Some(raw)) => raw,
        Ok(None) => {
            debug!("Connection closed before a request arrived");
            return;
        }
        Err(_) => {
            warn!("No request within {REQUEST_WAIT:?}, closing");
            let _ = sender.close().await;
            return;
        }
    };

    let request = match parse_request(&raw) {
        Ok(request) => request,
        Err(e) => {
            warn!(error = %e, "Malformed request");
            let _ = sender
                .send_frame(ProtocolFrame::Error(MALFORMED_REQUEST_MESSAGE.into()))
                .await;
            let _ = sender.close().await;
            return;
        }
    };
    info!(
        user_id = %request.user_id,
        session_id = %request.session_id,
        history_pairs = request.chat_history.len(),
        "Chat request received"
    );

    let streamed = tokio::select! {
        biased;
        result = stream_exchange(&state.agent, &request, &mut sender) => result,
        _ = wait_for_close(&mut receiver) => StreamResult::Disconnected,
    };

    match streamed {
        StreamResult::Completed(outcome) => {
            if let Some(store) = &state.sessions {
                if let Err(e) =
                    persist_exchange(store.as_ref(), state.agent.config(), &request, &outcome).await
                {
                    error!(
                        session_id = %request.session_id,
                        error = %e,
                        "Session persistence failed"
                    );
                }
            }
        }
        StreamResult::Failed(_) => {}
        StreamResult::Disconnected => {
            info!(session_id = %request.session_id, "Client went away, exchange abandoned");
            return;
        }
    }

    let _ = sender.close().await;
    debug!(session_id = %request.session_id, "Connection closed by server");
}

/// The next text frame, or `None` once the peer is gone.
async fn next_text(receiver: &mut SplitStream<WebSocket>) -> Option<String> {
    while let Some(message) = receiver.next().await {
        match message {
            Ok(Message::Text(text)) => return Some(text.as_str().to_owned()),
            Ok(Message::Close(_)) | Err(_) => return None,
            Ok(_) => continue,
        }
    }
    None
}

/// Resolves when the peer closes or the socket fails.
async fn wait_for_close(receiver: &mut SplitStream<WebSocket>) {
    while let Some(message) = receiver.next().await {
        match message {
            Ok(Message::Close(_)) | Err(_) => return,
            Ok(_) => {}
        }
    }
}
