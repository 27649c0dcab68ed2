//! End-to-end: a real gateway on a local port driven by the kbchat client.

use async_trait::async_trait;
use kbchat_agent::loop_runner::PROVIDER_FAILURE_MESSAGE;
use kbchat_agent::{AgentConfig, AgentLoop};
use kbchat_client::{ChatClient, ClientEvent};
use kbchat_core::error::{KnowledgeError, ProtocolError};
use kbchat_core::knowledge::{KnowledgeBase, RetrievedPassage, Source};
use kbchat_core::protocol::ChatRequest;
use kbchat_core::services::StaticTokenVerifier;
use kbchat_core::session::SessionStore;
use kbchat_core::tool::ToolRegistry;
use kbchat_gateway::{GatewayState, serve};
use kbchat_memory::InMemorySessionStore;
use kbchat_providers::scripted::completion_body;
use kbchat_providers::{ModelAdapter, Script, ScriptedProvider};
use kbchat_tools::knowledge_base_query::NO_KNOWLEDGE_PLACEHOLDER;
use kbchat_tools::{HmacLinkSigner, KnowledgeBaseQueryTool};
use std::sync::Arc;
use std::time::Duration;

const TOKEN: &str = "test-token";

struct FixedKnowledgeBase(Vec<RetrievedPassage>);

#[async_trait]
impl KnowledgeBase for FixedKnowledgeBase {
    async fn retrieve(&self, _: &str, _: &str) -> Result<Vec<RetrievedPassage>, KnowledgeError> {
        Ok(self.0.clone())
    }
}

fn passage(content: &str, score: f64, location: &str) -> RetrievedPassage {
    RetrievedPassage {
        content: content.into(),
        score,
        location: location.into(),
    }
}

struct Harness {
    client: ChatClient,
    url: String,
    provider: Arc<ScriptedProvider>,
    store: Arc<InMemorySessionStore>,
}

async fn start(scripts: Vec<Script>, passages: Vec<RetrievedPassage>) -> Harness {
    let provider = Arc::new(
        ScriptedProvider::new(scripts).with_completion(Ok(completion_body("HVAC Vendor Lookup"))),
    );
    let mut registry = ToolRegistry::new();
    registry.register(Box::new(KnowledgeBaseQueryTool::new(
        Arc::new(FixedKnowledgeBase(passages)),
        Arc::new(HmacLinkSigner::new("https://docs.example", "secret", 60)),
        "KB1",
    )));
    let adapter = ModelAdapter::new(provider.clone(), "main").with_fast_model("fast");
    let config = AgentConfig::new("You answer procurement questions.", adapter, Arc::new(registry));

    let store = Arc::new(InMemorySessionStore::new());
    let state = Arc::new(GatewayState {
        agent: AgentLoop::new(Arc::new(config)),
        sessions: Some(store.clone()),
        verifier: Arc::new(StaticTokenVerifier::new(vec![TOKEN.into()])),
    });

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}/ws", listener.local_addr().unwrap());
    tokio::spawn(serve(listener, state));

    Harness {
        client: ChatClient::new(url.clone())
            .with_token(TOKEN)
            .with_idle_timeout(Duration::from_secs(5)),
        url,
        provider,
        store,
    }
}

fn request(message: &str) -> ChatRequest {
    ChatRequest {
        user_message: message.into(),
        user_id: "u1".into(),
        session_id: "s1".into(),
        chat_history: vec![],
        retrieval_source: None,
    }
}

fn answer_of(events: &[ClientEvent]) -> String {
    events
        .iter()
        .rev()
        .find_map(|e| match e {
            ClientEvent::Chunk { answer, .. } => Some(answer.clone()),
            _ => None,
        })
        .unwrap_or_default()
}

fn sources_of(events: &[ClientEvent]) -> Option<Vec<Source>> {
    events.iter().find_map(|e| match e {
        ClientEvent::Sources(sources) => Some(sources.clone()),
        _ => None,
    })
}

/// Persistence runs after the sources frame, so wait for it.
async fn wait_for_session(store: &InMemorySessionStore) {
    for _ in 0..100 {
        if !store.is_empty().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("session was never persisted");
}

#[tokio::test]
async fn empty_knowledge_base_answers_with_no_sources() {
    let harness = start(
        vec![
            Script::tool_call("", "toolu_1", "query_db", &["{\"query\": ", "\"mars rovers\"}"]),
            Script::text(&["That is outside ", "what I know."]),
        ],
        vec![],
    )
    .await;

    let events = harness
        .client
        .send(&request("Tell me about mars rovers"))
        .await
        .unwrap()
        .collect()
        .await;

    assert_eq!(answer_of(&events), "That is outside what I know.");
    assert_eq!(sources_of(&events), Some(vec![]));
    assert_eq!(
        events.last(),
        Some(&ClientEvent::Complete {
            first_message: true
        })
    );
    assert!(events.iter().any(|e| matches!(
        e,
        ClientEvent::Status { text, active: true } if text == "Looking through procurement documents..."
    )));

    // The second model call saw the placeholder as the tool result
    let second = &harness.provider.requests()[1];
    let serialized = serde_json::to_string(&second.turns).unwrap();
    assert!(serialized.contains(NO_KNOWLEDGE_PLACEHOLDER));

    wait_for_session(&harness.store).await;
    let session = harness.store.get("u1", "s1").await.unwrap().unwrap();
    assert_eq!(session.title, "HVAC Vendor Lookup");
    assert_eq!(session.turns[0].assistant, "That is outside what I know.");
    assert_eq!(session.turns[0].metadata.as_deref(), Some("[]"));
}

#[tokio::test]
async fn passages_from_one_document_yield_one_source() {
    let harness = start(
        vec![
            Script::tool_call(
                "Let me check. ",
                "toolu_1",
                "query_db",
                &["{\"query\": \"hvac vendors\"}"],
            ),
            Script::text(&["Acme handles HVAC."]),
        ],
        vec![
            passage("Acme is the HVAC vendor.", 0.9, "s3://kb/contracts/hvac.pdf"),
            passage("Acme contract runs to 2027.", 0.8, "s3://kb/contracts/hvac.pdf"),
            passage("Unrelated text.", 0.2, "s3://kb/other.pdf"),
        ],
    )
    .await;

    let events = harness
        .client
        .send(&request("Who are the HVAC vendors?"))
        .await
        .unwrap()
        .collect()
        .await;

    assert_eq!(answer_of(&events), "Let me check. Acme handles HVAC.");
    let sources = sources_of(&events).expect("sources event");
    assert_eq!(sources.len(), 1);
    assert_eq!(sources[0].title, "contracts/hvac.pdf (Knowledge Base)");
    assert!(sources[0].uri.starts_with("https://docs.example/"));
}

#[tokio::test]
async fn mid_stream_failure_sends_one_error_and_skips_persistence() {
    let harness = start(vec![Script::text_then_fail(&["Partial "], "overloaded")], vec![]).await;

    let events = harness
        .client
        .send(&request("Who are the HVAC vendors?"))
        .await
        .unwrap()
        .collect()
        .await;

    assert_eq!(answer_of(&events), "Partial ");
    assert_eq!(
        events.last(),
        Some(&ClientEvent::Error(PROVIDER_FAILURE_MESSAGE.into()))
    );
    let errors = events
        .iter()
        .filter(|e| matches!(e, ClientEvent::Error(_)))
        .count();
    assert_eq!(errors, 1);
    assert!(sources_of(&events).is_none());

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(harness.store.is_empty().await);
}

#[tokio::test]
async fn follow_up_exchange_appends_to_the_session() {
    let harness = start(
        vec![Script::text(&["First answer."]), Script::text(&["Second answer."])],
        vec![],
    )
    .await;

    harness
        .client
        .send(&request("first question"))
        .await
        .unwrap()
        .collect()
        .await;
    wait_for_session(&harness.store).await;

    let mut follow_up = request("second question");
    follow_up.chat_history = vec![kbchat_core::message::HistoryPair::new(
        "first question",
        "First answer.",
    )];
    let events = harness.client.send(&follow_up).await.unwrap().collect().await;
    assert_eq!(
        events.last(),
        Some(&ClientEvent::Complete {
            first_message: false
        })
    );

    for _ in 0..100 {
        let session = harness.store.get("u1", "s1").await.unwrap().unwrap();
        if session.turns.len() == 2 {
            assert_eq!(session.turns[1].assistant, "Second answer.");
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("second exchange was never appended");
}

#[tokio::test]
async fn wrong_token_is_rejected() {
    let harness = start(vec![], vec![]).await;
    let result = ChatClient::new(harness.url.clone())
        .with_token("wrong")
        .send(&request("hello"))
        .await;
    assert!(matches!(result, Err(ProtocolError::Unauthorized)));

    let result = ChatClient::new(harness.url).send(&request("hello")).await;
    assert!(matches!(result, Err(ProtocolError::Unauthorized)));
}
