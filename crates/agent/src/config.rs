//! Per-process agent configuration.
//!
//! [`AgentConfig`] is built once at start-up and shared by reference with
//! every connection: the assembled system prompt, the model adapter (which
//! carries the tool catalog declared to the model) and the registry that
//! executes those tools.

use chrono::NaiveDate;
use kbchat_config::AgentSettings;
use kbchat_core::services::MetadataSource;
use kbchat_core::tool::ToolRegistry;
use kbchat_providers::ModelAdapter;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

const DEFAULT_HISTORY_WINDOW: usize = 2;
const DEFAULT_MAX_ITERATIONS: u32 = 8;
const DEFAULT_EXCHANGE_TIMEOUT: Duration = Duration::from_secs(300);
const DEFAULT_TITLE_MAX_TOKENS: u32 = 15;

pub struct AgentConfig {
    /// Fully assembled system prompt
    pub system_prompt: String,

    /// Model calls, with the tool catalog already declared
    pub adapter: ModelAdapter,

    /// Executes the tools the model asks for
    pub tools: Arc<ToolRegistry>,

    /// Stored exchanges sent back to the model
    pub history_window: usize,

    /// Model calls allowed per exchange
    pub max_iterations: u32,

    /// Wall-clock budget for one exchange
    pub exchange_timeout: Duration,

    /// Token cap for the session title call
    pub title_max_tokens: u32,
}

impl AgentConfig {
    /// Create a config with default limits. The adapter should already
    /// declare `tools.definitions()`.
    pub fn new(
        system_prompt: impl Into<String>,
        adapter: ModelAdapter,
        tools: Arc<ToolRegistry>,
    ) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            adapter,
            tools,
            history_window: DEFAULT_HISTORY_WINDOW,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            exchange_timeout: DEFAULT_EXCHANGE_TIMEOUT,
            title_max_tokens: DEFAULT_TITLE_MAX_TOKENS,
        }
    }

    /// Apply the limits from the `[agent]` section.
    pub fn with_settings(mut self, settings: &AgentSettings) -> Self {
        self.history_window = settings.history_window;
        self.max_iterations = settings.max_iterations.max(1);
        self.exchange_timeout = Duration::from_secs(settings.exchange_timeout_secs);
        self.title_max_tokens = settings.title_max_tokens;
        self
    }

    pub fn with_history_window(mut self, window: usize) -> Self {
        self.history_window = window;
        self
    }

    pub fn with_max_iterations(mut self, max: u32) -> Self {
        self.max_iterations = max.max(1);
        self
    }

    pub fn with_exchange_timeout(mut self, timeout: Duration) -> Self {
        self.exchange_timeout = timeout;
        self
    }
}

/// Append the current date and, when present, the metadata blob to the
/// base prompt.
pub fn assemble_system_prompt(
    base: &str,
    today: NaiveDate,
    metadata: Option<&serde_json::Value>,
) -> String {
    let mut prompt = format!(
        "{base}\n\n### Current Date\nToday is {}. Use this to evaluate the recency and relevance of information in the retrieved documents.",
        today.format("%A, %B %-d, %Y")
    );
    if let Some(metadata) = metadata {
        let pretty =
            serde_json::to_string_pretty(metadata).unwrap_or_else(|_| metadata.to_string());
        prompt.push_str("\n\n### Metadata information:\n");
        prompt.push_str(&pretty);
    }
    prompt
}

/// Build the system prompt for today, fetching metadata when a source is
/// configured. A metadata failure drops the section.
pub async fn build_system_prompt(base: &str, metadata: Option<&dyn MetadataSource>) -> String {
    let blob = match metadata {
        Some(source) => match source.fetch().await {
            Ok(blob) => {
                debug!("Metadata merged into system prompt");
                Some(blob)
            }
            Err(e) => {
                warn!(error = %e, "Metadata fetch failed, prompt built without it");
                None
            }
        },
        None => None,
    };
    assemble_system_prompt(base, chrono::Local::now().date_naive(), blob.as_ref())
}
