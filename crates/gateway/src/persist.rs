//! Post-exchange session persistence.

use kbchat_agent::{AgentConfig, ExchangeOutcome, generate_title};
use kbchat_core::error::SessionError;
use kbchat_core::message::HistoryPair;
use kbchat_core::protocol::ChatRequest;
use kbchat_core::session::{SessionRecord, SessionStore};
use tracing::{debug, info};

/// What persistence did with the exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Persisted {
    /// A new session was created with this title
    Created { title: String },
    Appended,
}

/// Read-modify-write the exchange into the session store. A missing
/// session is created with a generated title.
pub async fn persist_exchange(
    store: &dyn SessionStore,
    config: &AgentConfig,
    request: &ChatRequest,
    outcome: &ExchangeOutcome,
) -> Result<Persisted, SessionError> {
    let metadata = serde_json::to_string(&outcome.sources)
        .map_err(|e| SessionError::Storage(format!("sources: {e}")))?;
    let entry = HistoryPair {
        user: request.user_message.clone(),
        assistant: outcome.answer.clone(),
        metadata: Some(metadata),
    };

    match store.get(&request.user_id, &request.session_id).await? {
        Some(_) => {
            store
                .append(&request.user_id, &request.session_id, entry)
                .await?;
            debug!(
                user_id = %request.user_id,
                session_id = %request.session_id,
                "Exchange appended to session"
            );
            Ok(Persisted::Appended)
        }
        None => {
            let title =
                generate_title(&config.adapter, &request.user_message, config.title_max_tokens)
                    .await;
            store
                .create(SessionRecord::new(
                    &request.user_id,
                    &request.session_id,
                    &title,
                    entry,
                ))
                .await?;
            info!(
                user_id = %request.user_id,
                session_id = %request.session_id,
                title = %title,
                "Session created"
            );
            Ok(Persisted::Created { title })
        }
    }
}
