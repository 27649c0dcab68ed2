//! In-memory session store: useful for testing and single-process runs.

use async_trait::async_trait;
use chrono::Utc;
use kbchat_core::error::SessionError;
use kbchat_core::message::HistoryPair;
use kbchat_core::session::{SessionRecord, SessionStore};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Stores sessions in a Vec behind an async lock.
#[derive(Clone)]
pub struct InMemorySessionStore {
    sessions: Arc<RwLock<Vec<SessionRecord>>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self {
            sessions: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Number of stored sessions across all users.
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

impl Default for InMemorySessionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn get(&self, user_id: &str, session_id: &str) -> Result<Option<SessionRecord>, SessionError> {
        let sessions = self.sessions.read().await;
        Ok(sessions
            .iter()
            .find(|s| s.user_id == user_id && s.session_id == session_id)
            .cloned())
    }

    async fn create(&self, record: SessionRecord) -> Result<(), SessionError> {
        let mut sessions = self.sessions.write().await;
        sessions.retain(|s| !(s.user_id == record.user_id && s.session_id == record.session_id));
        sessions.push(record);
        Ok(())
    }

    async fn append(&self, user_id: &str, session_id: &str, entry: HistoryPair) -> Result<(), SessionError> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .iter_mut()
            .find(|s| s.user_id == user_id && s.session_id == session_id)
            .ok_or_else(|| SessionError::NotFound {
                user_id: user_id.to_string(),
                session_id: session_id.to_string(),
            })?;
        session.turns.push(entry);
        session.updated_at = Utc::now();
        Ok(())
    }

    async fn list(&self, user_id: &str) -> Result<Vec<SessionRecord>, SessionError> {
        let sessions = self.sessions.read().await;
        let mut mine: Vec<SessionRecord> = sessions
            .iter()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect();
        mine.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(mine)
    }
}
