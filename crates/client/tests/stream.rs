//! Client against a scripted local WebSocket server.

use futures::{SinkExt, StreamExt};
use kbchat_client::{ChatClient, ClientEvent, IDLE_TIMEOUT_MESSAGE};
use kbchat_core::error::ProtocolError;
use kbchat_core::protocol::{ChatRequest, EOF_MARKER};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;

fn request(history: bool) -> ChatRequest {
    let chat_history = if history {
        vec![kbchat_core::message::HistoryPair {
            user: "earlier".into(),
            assistant: "reply".into(),
            metadata: None,
        }]
    } else {
        vec![]
    };
    ChatRequest {
        user_message: "Who are the HVAC vendors?".into(),
        user_id: "u1".into(),
        session_id: "s1".into(),
        chat_history,
        retrieval_source: None,
    }
}

/// Accept one connection, hand back the request and auth header, then send
/// `frames` and close.
async fn scripted_server(
    frames: Vec<String>,
    linger: Duration,
) -> (String, oneshot::Receiver<(String, Option<String>)>) {
    paced_server(frames, Duration::ZERO, linger).await
}

/// Like `scripted_server`, waiting `gap` before each frame.
async fn paced_server(
    frames: Vec<String>,
    gap: Duration,
    linger: Duration,
) -> (String, oneshot::Receiver<(String, Option<String>)>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}/ws", listener.local_addr().unwrap());
    let (tx, rx) = oneshot::channel();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut auth = None;
        let mut ws = tokio_tungstenite::accept_hdr_async(stream, |req: &Request, resp: Response| {
            auth = req
                .headers()
                .get("authorization")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            Ok::<_, ErrorResponse>(resp)
        })
        .await
        .unwrap();

        let raw = match ws.next().await {
            Some(Ok(Message::Text(text))) => text,
            other => panic!("expected request frame, got {other:?}"),
        };
        let _ = tx.send((raw, auth));

        for frame in frames {
            tokio::time::sleep(gap).await;
            if ws.send(Message::Text(frame)).await.is_err() {
                return;
            }
        }
        tokio::time::sleep(linger).await;
        let _ = ws.close(None).await;
    });

    (url, rx)
}

#[tokio::test]
async fn streams_a_full_answer() {
    let frames = vec![
        "!<|STATUS|>!Looking through procurement documents...".to_string(),
        r#"{"message": "Endpoint request timed out", "connectionId": "c1", "requestId": "r1"}"#
            .to_string(),
        "Acme ".to_string(),
        "handles HVAC.".to_string(),
        EOF_MARKER.to_string(),
        r#"[{"title":"","uri":"https://docs/contracts/hvac.pdf?signature=abc"}]"#.to_string(),
    ];
    let (url, received) = scripted_server(frames, Duration::ZERO).await;

    let client = ChatClient::new(url).with_token("secret");
    let stream = client.send(&request(false)).await.unwrap();
    let events = stream.collect().await;

    let (raw, auth) = received.await.unwrap();
    let sent: ChatRequest = serde_json::from_str(&raw).unwrap();
    assert_eq!(sent, request(false));
    assert_eq!(auth.as_deref(), Some("Bearer secret"));

    let chunks: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            ClientEvent::Chunk { answer, .. } => Some(answer.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(chunks, ["Acme ", "Acme handles HVAC."]);

    let sources = events.iter().find_map(|e| match e {
        ClientEvent::Sources(sources) => Some(sources.clone()),
        _ => None,
    });
    let sources = sources.expect("sources event");
    assert_eq!(sources.len(), 1);
    assert_eq!(sources[0].title, "hvac.pdf");

    assert_eq!(
        events.last(),
        Some(&ClientEvent::Complete {
            first_message: true
        })
    );
}

#[tokio::test]
async fn error_frame_ends_the_stream() {
    let frames = vec![
        "partial".to_string(),
        "<!ERROR!>: I'm sorry, something went wrong.".to_string(),
    ];
    let (url, _received) = scripted_server(frames, Duration::ZERO).await;

    let mut stream = ChatClient::new(url).send(&request(true)).await.unwrap();
    assert!(matches!(stream.next().await, Some(ClientEvent::Chunk { .. })));
    assert_eq!(
        stream.next().await,
        Some(ClientEvent::Error("I'm sorry, something went wrong.".into()))
    );
    assert_eq!(stream.next().await, None);
    assert_eq!(stream.answer(), "partial");
}

#[tokio::test]
async fn close_after_eof_completes_without_sources() {
    let frames = vec!["done".to_string(), EOF_MARKER.to_string()];
    let (url, _received) = scripted_server(frames, Duration::ZERO).await;

    let events = ChatClient::new(url)
        .send(&request(true))
        .await
        .unwrap()
        .collect()
        .await;
    assert_eq!(
        &events[1..],
        &[
            ClientEvent::Sources(vec![]),
            ClientEvent::Complete {
                first_message: false
            }
        ]
    );
}

#[tokio::test]
async fn silent_server_times_out() {
    let (url, _received) = scripted_server(vec![], Duration::from_secs(5)).await;

    let events = ChatClient::new(url)
        .with_idle_timeout(Duration::from_millis(200))
        .send(&request(false))
        .await
        .unwrap()
        .collect()
        .await;
    assert_eq!(events, vec![ClientEvent::Error(IDLE_TIMEOUT_MESSAGE.into())]);
}

#[tokio::test]
async fn gateway_timeout_notices_do_not_keep_the_request_alive() {
    let notice =
        r#"{"message": "Endpoint request timed out", "connectionId": "c1", "requestId": "r1"}"#;
    let (url, _received) = paced_server(
        vec![notice.to_string(); 20],
        Duration::from_millis(100),
        Duration::from_secs(5),
    )
    .await;

    let started = std::time::Instant::now();
    let events = ChatClient::new(url)
        .with_idle_timeout(Duration::from_millis(350))
        .send(&request(false))
        .await
        .unwrap()
        .collect()
        .await;
    assert_eq!(events, vec![ClientEvent::Error(IDLE_TIMEOUT_MESSAGE.into())]);
    assert!(started.elapsed() < Duration::from_millis(1500));
}

#[tokio::test]
async fn status_frames_keep_the_request_alive() {
    let mut frames = vec!["!<|STATUS|>!Looking through procurement documents...".to_string(); 5];
    frames.push("Acme handles HVAC.".to_string());
    frames.push(EOF_MARKER.to_string());
    frames.push("[]".to_string());
    let (url, _received) =
        paced_server(frames, Duration::from_millis(100), Duration::ZERO).await;

    let events = ChatClient::new(url)
        .with_idle_timeout(Duration::from_millis(350))
        .send(&request(false))
        .await
        .unwrap()
        .collect()
        .await;
    assert!(!events.contains(&ClientEvent::Error(IDLE_TIMEOUT_MESSAGE.into())));
    assert!(events.iter().any(|e| matches!(e, ClientEvent::Chunk { answer, .. } if answer == "Acme handles HVAC.")));
}

#[tokio::test]
async fn rejected_handshake_is_unauthorized() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}/ws", listener.local_addr().unwrap());
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let _ = tokio_tungstenite::accept_hdr_async(stream, |_: &Request, _: Response| {
            let mut reject = ErrorResponse::new(None);
            *reject.status_mut() = StatusCode::UNAUTHORIZED;
            Err(reject)
        })
        .await;
    });

    let result = ChatClient::new(url).send(&request(false)).await;
    assert!(matches!(result, Err(ProtocolError::Unauthorized)));
}
