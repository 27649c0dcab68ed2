//! Session store collaborator.
//!
//! Sessions are owned by an external store; this crate only reads them and
//! appends finished exchanges.

use crate::error::SessionError;
use crate::message::HistoryPair;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A persisted chat session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub user_id: String,
    pub session_id: String,
    pub title: String,
    pub turns: Vec<HistoryPair>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SessionRecord {
    /// A new session holding its first exchange.
    pub fn new(
        user_id: impl Into<String>,
        session_id: impl Into<String>,
        title: impl Into<String>,
        first: HistoryPair,
    ) -> Self {
        let now = Utc::now();
        Self {
            user_id: user_id.into(),
            session_id: session_id.into(),
            title: title.into(),
            turns: vec![first],
            created_at: now,
            updated_at: now,
        }
    }
}

/// Read/append access to persisted sessions.
#[async_trait]
pub trait SessionStore: Send + Sync {
    fn name(&self) -> &str;

    /// Fetch a session, `None` when it does not exist yet.
    async fn get(
        &self,
        user_id: &str,
        session_id: &str,
    ) -> std::result::Result<Option<SessionRecord>, SessionError>;

    /// Create a session. Replaces an existing record with the same key.
    async fn create(&self, record: SessionRecord) -> std::result::Result<(), SessionError>;

    /// Append one exchange to an existing session.
    async fn append(
        &self,
        user_id: &str,
        session_id: &str,
        entry: HistoryPair,
    ) -> std::result::Result<(), SessionError>;

    /// List a user's sessions, most recently updated first.
    async fn list(&self, user_id: &str) -> std::result::Result<Vec<SessionRecord>, SessionError>;
}
