//! Knowledge base and link-signing collaborators.
//!
//! The vector knowledge base answers a free-text query with scored passages,
//! each carrying a stable source identity (its storage location). The link
//! signer turns that identity into a short-lived, user-fetchable link.

use crate::error::KnowledgeError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// One scored passage returned by a similarity search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedPassage {
    /// Passage text
    pub content: String,

    /// Similarity score (higher is more relevant)
    pub score: f64,

    /// Stable location of the backing document, e.g. `s3://bucket/docs/a.pdf`
    pub location: String,
}

/// A cited source as delivered to the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub title: String,
    pub uri: String,

    /// Stable identity of the backing document. Never sent on the wire;
    /// generated links are not comparable, so deduplication uses this.
    #[serde(skip)]
    pub key: String,
}

/// Vector knowledge base.
#[async_trait]
pub trait KnowledgeBase: Send + Sync {
    /// Run a similarity search against one knowledge base.
    async fn retrieve(
        &self,
        knowledge_base_id: &str,
        query: &str,
    ) -> std::result::Result<Vec<RetrievedPassage>, KnowledgeError>;
}

/// Generates user-fetchable links for document locations.
pub trait LinkSigner: Send + Sync {
    /// Produce a titled, fetchable source for a document location.
    fn sign(&self, location: &str) -> std::result::Result<Source, KnowledgeError>;
}

/// Keep the first source for every identity, preserving order.
pub fn dedup_sources(sources: impl IntoIterator<Item = Source>) -> Vec<Source> {
    let mut seen = HashSet::new();
    sources
        .into_iter()
        .filter(|s| seen.insert(s.key.clone()))
        .collect()
}
