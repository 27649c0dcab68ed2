//! Tool implementations for kbchat.
//!
//! Tools give the agent access to the knowledge base (`query_db`), the
//! document metadata (`fetch_metadata`) and the structured contract and
//! trade indexes. Each tool talks to its collaborator through a trait from
//! `kbchat-core`; the HTTP implementations live in [`http`].

pub mod fetch_metadata;
pub mod http;
pub mod index_query;
pub mod knowledge_base_query;
pub mod signed_link;

pub use fetch_metadata::FetchMetadataTool;
pub use index_query::IndexQueryTool;
pub use knowledge_base_query::{KnowledgeBaseQueryTool, retrieve_knowledge};
pub use signed_link::HmacLinkSigner;

use kbchat_config::AppConfig;
use kbchat_core::error::Error;
use kbchat_core::knowledge::{KnowledgeBase, LinkSigner};
use kbchat_core::services::{IndexQueryService, MetadataSource};
use kbchat_core::tool::ToolRegistry;
use std::sync::Arc;
use tracing::warn;

/// Everything the tools need from the outside world.
#[derive(Clone)]
pub struct Collaborators {
    pub knowledge_base: Arc<dyn KnowledgeBase>,
    pub knowledge_base_id: String,
    pub signer: Arc<dyn LinkSigner>,
    pub metadata: Option<Arc<dyn MetadataSource>>,
    pub contract_index: Option<Arc<dyn IndexQueryService>>,
    pub trade_index: Option<Arc<dyn IndexQueryService>>,
}

impl Collaborators {
    /// Build HTTP-backed collaborators from configuration.
    pub fn from_config(config: &AppConfig) -> Result<Self, Error> {
        let endpoint = config.knowledge_base.endpoint.clone().ok_or_else(|| Error::Config {
            message: "knowledge_base.endpoint is not configured".into(),
        })?;
        if config.knowledge_base.knowledge_base_id.is_empty() {
            return Err(Error::Config {
                message: "knowledge_base.knowledge_base_id is not configured".into(),
            });
        }
        let knowledge_base =
            http::HttpKnowledgeBase::new(endpoint, config.knowledge_base.api_key.clone())?;

        let secret = match &config.links.signing_secret {
            Some(secret) => secret.clone(),
            None => {
                warn!("links.signing_secret is not set; source links will not survive a restart");
                uuid::Uuid::new_v4().to_string()
            }
        };
        let signer = HmacLinkSigner::new(&config.links.base_url, secret, config.links.expires_secs);

        let metadata = match &config.metadata.url {
            Some(url) => Some(Arc::new(http::HttpMetadataSource::new(url)?) as Arc<dyn MetadataSource>),
            None => None,
        };
        let contract_index = match &config.indexes.contract_url {
            Some(url) => Some(Arc::new(http::HttpIndexService::new("query_contract_index", url)?)
                as Arc<dyn IndexQueryService>),
            None => None,
        };
        let trade_index = match &config.indexes.trade_url {
            Some(url) => Some(Arc::new(http::HttpIndexService::new("query_trade_index", url)?)
                as Arc<dyn IndexQueryService>),
            None => None,
        };

        Ok(Self {
            knowledge_base: Arc::new(knowledge_base),
            knowledge_base_id: config.knowledge_base.knowledge_base_id.clone(),
            signer: Arc::new(signer),
            metadata,
            contract_index,
            trade_index,
        })
    }
}

/// Create the tool registry. `query_db` is always present; the other tools
/// are declared only when their collaborator is available.
pub fn build_registry(collaborators: &Collaborators) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(Box::new(KnowledgeBaseQueryTool::new(
        collaborators.knowledge_base.clone(),
        collaborators.signer.clone(),
        collaborators.knowledge_base_id.clone(),
    )));
    if let Some(metadata) = &collaborators.metadata {
        registry.register(Box::new(FetchMetadataTool::new(metadata.clone())));
    }
    if let Some(index) = &collaborators.contract_index {
        registry.register(Box::new(IndexQueryTool::contract(index.clone())));
    }
    if let Some(index) = &collaborators.trade_index {
        registry.register(Box::new(IndexQueryTool::trade(index.clone())));
    }
    registry
}
