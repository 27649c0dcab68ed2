//! Auxiliary collaborators: the metadata source, structured index
//! endpoints and the bearer-token check.

use crate::error::{KnowledgeError, ToolError};
use async_trait::async_trait;

/// No-argument fetch of the opaque metadata blob merged into the system
/// prompt and served by the `fetch_metadata` tool.
#[async_trait]
pub trait MetadataSource: Send + Sync {
    async fn fetch(&self) -> std::result::Result<serde_json::Value, KnowledgeError>;
}

/// A structured tabular index (contract index, trade index, ...).
///
/// Implementations return the raw reply body as a string; the tool decides
/// how to present failures to the model.
#[async_trait]
pub trait IndexQueryService: Send + Sync {
    async fn query(&self, payload: serde_json::Value) -> std::result::Result<IndexReply, ToolError>;
}

/// Reply of an index endpoint in `{statusCode, body}` form.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexReply {
    pub status_code: u16,
    pub body: String,
}

/// Validates the bearer token attached to a connection.
pub trait TokenVerifier: Send + Sync {
    fn verify(&self, token: Option<&str>) -> bool;
}

/// Accepts a fixed list of tokens. An empty list accepts every connection.
pub struct StaticTokenVerifier {
    tokens: Vec<String>,
}

impl StaticTokenVerifier {
    pub fn new(tokens: Vec<String>) -> Self {
        Self { tokens }
    }
}

impl TokenVerifier for StaticTokenVerifier {
    fn verify(&self, token: Option<&str>) -> bool {
        if self.tokens.is_empty() {
            return true;
        }
        token.is_some_and(|t| self.tokens.iter().any(|known| known == t))
    }
}
