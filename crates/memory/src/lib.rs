//! Session store implementations for kbchat.

pub mod in_memory;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use in_memory::InMemorySessionStore;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteSessionStore;

use kbchat_config::SessionConfig;
use kbchat_core::error::SessionError;
use kbchat_core::session::SessionStore;
use std::sync::Arc;

/// Open the configured session store.
pub async fn open_store(config: &SessionConfig) -> Result<Arc<dyn SessionStore>, SessionError> {
    match config.backend.as_str() {
        "memory" => Ok(Arc::new(InMemorySessionStore::new())),
        #[cfg(feature = "sqlite")]
        "sqlite" => {
            let url = config
                .database_url
                .as_deref()
                .ok_or_else(|| SessionError::Storage("sessions.database_url is not set".into()))?;
            Ok(Arc::new(SqliteSessionStore::new(url).await?))
        }
        other => Err(SessionError::Storage(format!(
            "unsupported session backend '{other}'"
        ))),
    }
}
