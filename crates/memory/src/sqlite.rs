//! SQLite session store.
//!
//! One `sessions` table keyed by `(user_id, session_id)`. Turns are kept as
//! a JSON array in the same row so an append is a single read-modify-write
//! inside one transaction.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use kbchat_core::error::SessionError;
use kbchat_core::message::HistoryPair;
use kbchat_core::session::{SessionRecord, SessionStore};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::{debug, info};

pub struct SqliteSessionStore {
    pool: SqlitePool,
}

impl SqliteSessionStore {
    /// Open (creating if missing) the database at `url`.
    ///
    /// Pass `"sqlite::memory:"` for an ephemeral database (useful for tests).
    pub async fn new(url: &str) -> Result<Self, SessionError> {
        let in_memory = url.contains(":memory:");
        let mut options = SqliteConnectOptions::from_str(url)
            .map_err(|e| SessionError::Storage(format!("Invalid SQLite URL: {e}")))?
            .create_if_missing(true)
            .synchronous(SqliteSynchronous::Normal);
        if !in_memory {
            options = options.journal_mode(SqliteJournalMode::Wal);
        }

        // Every connection to `:memory:` is its own database
        let max_connections = if in_memory { 1 } else { 4 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .map_err(|e| SessionError::Storage(format!("Failed to open SQLite: {e}")))?;

        let store = Self { pool };
        store.run_migrations().await?;
        info!("SQLite session store initialized at {url}");
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<(), SessionError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sessions (
                user_id     TEXT NOT NULL,
                session_id  TEXT NOT NULL,
                title       TEXT NOT NULL,
                turns       TEXT NOT NULL DEFAULT '[]',
                created_at  TEXT NOT NULL,
                updated_at  TEXT NOT NULL,
                PRIMARY KEY (user_id, session_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| SessionError::MigrationFailed(format!("sessions table: {e}")))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_sessions_user_updated ON sessions(user_id, updated_at DESC)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| SessionError::MigrationFailed(format!("updated_at index: {e}")))?;

        debug!("SQLite migrations complete");
        Ok(())
    }

    fn row_to_record(row: &sqlx::sqlite::SqliteRow) -> Result<SessionRecord, SessionError> {
        let column = |name: &str, e: sqlx::Error| SessionError::Storage(format!("{name} column: {e}"));
        let user_id: String = row.try_get("user_id").map_err(|e| column("user_id", e))?;
        let session_id: String = row.try_get("session_id").map_err(|e| column("session_id", e))?;
        let title: String = row.try_get("title").map_err(|e| column("title", e))?;
        let turns_json: String = row.try_get("turns").map_err(|e| column("turns", e))?;
        let created_at: String = row.try_get("created_at").map_err(|e| column("created_at", e))?;
        let updated_at: String = row.try_get("updated_at").map_err(|e| column("updated_at", e))?;

        let turns: Vec<HistoryPair> = serde_json::from_str(&turns_json)
            .map_err(|e| SessionError::Storage(format!("turns for {session_id}: {e}")))?;

        Ok(SessionRecord {
            user_id,
            session_id,
            title,
            turns,
            created_at: parse_time(&created_at),
            updated_at: parse_time(&updated_at),
        })
    }
}

fn parse_time(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn storage(e: impl std::fmt::Display) -> SessionError {
    SessionError::Storage(e.to_string())
}

#[async_trait]
impl SessionStore for SqliteSessionStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn get(&self, user_id: &str, session_id: &str) -> Result<Option<SessionRecord>, SessionError> {
        let row = sqlx::query("SELECT * FROM sessions WHERE user_id = ?1 AND session_id = ?2")
            .bind(user_id)
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage)?;
        row.as_ref().map(Self::row_to_record).transpose()
    }

    async fn create(&self, record: SessionRecord) -> Result<(), SessionError> {
        let turns = serde_json::to_string(&record.turns).map_err(storage)?;
        sqlx::query(
            r#"
            INSERT INTO sessions (user_id, session_id, title, turns, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(user_id, session_id) DO UPDATE SET
                title = excluded.title,
                turns = excluded.turns,
                created_at = excluded.created_at,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&record.user_id)
        .bind(&record.session_id)
        .bind(&record.title)
        .bind(turns)
        .bind(record.created_at.to_rfc3339())
        .bind(record.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(storage)?;
        debug!(user_id = %record.user_id, session_id = %record.session_id, "Session created");
        Ok(())
    }

    async fn append(&self, user_id: &str, session_id: &str, entry: HistoryPair) -> Result<(), SessionError> {
        let mut tx = self.pool.begin().await.map_err(storage)?;

        let row = sqlx::query("SELECT turns FROM sessions WHERE user_id = ?1 AND session_id = ?2")
            .bind(user_id)
            .bind(session_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(storage)?
            .ok_or_else(|| SessionError::NotFound {
                user_id: user_id.to_string(),
                session_id: session_id.to_string(),
            })?;

        let turns_json: String = row.try_get("turns").map_err(storage)?;
        let mut turns: Vec<HistoryPair> = serde_json::from_str(&turns_json).map_err(storage)?;
        turns.push(entry);

        sqlx::query("UPDATE sessions SET turns = ?1, updated_at = ?2 WHERE user_id = ?3 AND session_id = ?4")
            .bind(serde_json::to_string(&turns).map_err(storage)?)
            .bind(Utc::now().to_rfc3339())
            .bind(user_id)
            .bind(session_id)
            .execute(&mut *tx)
            .await
            .map_err(storage)?;

        tx.commit().await.map_err(storage)?;
        debug!(user_id, session_id, turns = turns.len(), "Session appended");
        Ok(())
    }

    async fn list(&self, user_id: &str) -> Result<Vec<SessionRecord>, SessionError> {
        let rows = sqlx::query("SELECT * FROM sessions WHERE user_id = ?1 ORDER BY updated_at DESC")
            .bind(user_id)
            .fetch_all(&self.pool)
            .await
            .map_err(storage)?;
        rows.iter().map(Self::row_to_record).collect()
    }
}
