//! Knowledge base query tool (`query_db`).
//!
//! Runs the retrieval subroutine: similarity search, confidence filter,
//! deduplication by source identity, link signing, content join. Empty and
//! failed searches produce placeholder text for the model instead of errors.

use async_trait::async_trait;
use kbchat_core::error::ToolError;
use kbchat_core::knowledge::{KnowledgeBase, LinkSigner, RetrievedPassage, Source};
use kbchat_core::tool::{Tool, ToolOutput};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Passages must score strictly above this to be used.
pub const CONFIDENCE_THRESHOLD: f64 = 0.5;

pub const NO_KNOWLEDGE_PLACEHOLDER: &str = "No knowledge available! This query is likely outside the scope of your knowledge. Please provide a general answer but do not attempt to provide specific details.";

pub const SEARCH_FAILED_PLACEHOLDER: &str = "No knowledge available! There is something wrong with the search tool. Please tell the user to submit feedback. Please provide a general answer but do not attempt to provide specific details.";

/// Query one knowledge base and shape the result for the model.
pub async fn retrieve_knowledge(
    knowledge_base: &dyn KnowledgeBase,
    signer: &dyn LinkSigner,
    knowledge_base_id: &str,
    query: &str,
) -> ToolOutput {
    let passages = match knowledge_base.retrieve(knowledge_base_id, query).await {
        Ok(passages) => passages,
        Err(e) => {
            error!(error = %e, knowledge_base_id, "Knowledge base search failed");
            return ToolOutput::text(SEARCH_FAILED_PLACEHOLDER);
        }
    };
    let total = passages.len();

    let confident: Vec<RetrievedPassage> = passages
        .into_iter()
        .filter(|p| p.score > CONFIDENCE_THRESHOLD)
        .collect();

    // Identity first: signed links differ on every call
    let mut seen = HashSet::new();
    let sources: Vec<Source> = confident
        .iter()
        .filter(|p| seen.insert(p.location.as_str()))
        .filter_map(|p| match signer.sign(&p.location) {
            Ok(source) => Some(source),
            Err(e) => {
                warn!(error = %e, location = %p.location, "Dropping source that could not be signed");
                None
            }
        })
        .collect();

    let content = confident
        .iter()
        .map(|p| p.content.as_str())
        .collect::<Vec<_>>()
        .join("\n");

    debug!(total, kept = confident.len(), sources = sources.len(), "Retrieval filtered");

    if content.is_empty() {
        info!(query, "No relevant sources found");
        return ToolOutput {
            content: NO_KNOWLEDGE_PLACEHOLDER.to_string(),
            sources,
        };
    }

    ToolOutput { content, sources }
}

pub struct KnowledgeBaseQueryTool {
    knowledge_base: Arc<dyn KnowledgeBase>,
    signer: Arc<dyn LinkSigner>,
    knowledge_base_id: String,
}

impl KnowledgeBaseQueryTool {
    pub fn new(
        knowledge_base: Arc<dyn KnowledgeBase>,
        signer: Arc<dyn LinkSigner>,
        knowledge_base_id: impl Into<String>,
    ) -> Self {
        Self {
            knowledge_base,
            signer,
            knowledge_base_id: knowledge_base_id.into(),
        }
    }
}

#[async_trait]
impl Tool for KnowledgeBaseQueryTool {
    fn name(&self) -> &str {
        "query_db"
    }

    fn description(&self) -> &str {
        "Query a vector database for any information in your knowledge base. Try to use specific key words when possible."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "The query you want to make to the vector database."
                }
            },
            "required": ["query"]
        })
    }

    fn status_message(&self) -> Option<&str> {
        Some("Looking through procurement documents...")
    }

    async fn execute(&self, input: serde_json::Value) -> Result<ToolOutput, ToolError> {
        let query = input["query"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'query' argument".into()))?;

        Ok(retrieve_knowledge(
            self.knowledge_base.as_ref(),
            self.signer.as_ref(),
            &self.knowledge_base_id,
            query,
        )
        .await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kbchat_core::error::KnowledgeError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedKnowledgeBase(Result<Vec<RetrievedPassage>, ()>);

    #[async_trait]
    impl KnowledgeBase for FixedKnowledgeBase {
        async fn retrieve(&self, _id: &str, _q: &str) -> Result<Vec<RetrievedPassage>, KnowledgeError> {
            self.0
                .clone()
                .map_err(|_| KnowledgeError::Request("connection refused".into()))
        }
    }

    /// Every call yields a different link, like a real presigner.
    #[derive(Default)]
    struct CountingSigner(AtomicUsize);

    impl LinkSigner for CountingSigner {
        fn sign(&self, location: &str) -> Result<Source, KnowledgeError> {
            let n = self.0.fetch_add(1, Ordering::SeqCst);
            if location.ends_with("broken.pdf") {
                return Err(KnowledgeError::Signing {
                    key: location.into(),
                    reason: "denied".into(),
                });
            }
            Ok(Source {
                title: location.into(),
                uri: format!("https://links/{location}?n={n}"),
                key: location.into(),
            })
        }
    }

    fn passage(content: &str, score: f64, location: &str) -> RetrievedPassage {
        RetrievedPassage {
            content: content.into(),
            score,
            location: location.into(),
        }
    }

    async fn run(passages: Vec<RetrievedPassage>, signer: &CountingSigner) -> ToolOutput {
        retrieve_knowledge(&FixedKnowledgeBase(Ok(passages)), signer, "KB1", "hvac").await
    }

    #[tokio::test]
    async fn threshold_is_strict() {
        let signer = CountingSigner::default();
        let out = run(
            vec![
                passage("at threshold", 0.5, "s3://b/a.pdf"),
                passage("just above", 0.50001, "s3://b/b.pdf"),
            ],
            &signer,
        )
        .await;
        assert_eq!(out.content, "just above");
        assert_eq!(out.sources.len(), 1);
        assert_eq!(out.sources[0].key, "s3://b/b.pdf");
    }

    #[tokio::test]
    async fn duplicates_collapse_before_signing() {
        let signer = CountingSigner::default();
        let out = run(
            vec![
                passage("one", 0.9, "s3://b/a.pdf"),
                passage("two", 0.8, "s3://b/a.pdf"),
                passage("three", 0.7, "s3://b/c.pdf"),
            ],
            &signer,
        )
        .await;
        assert_eq!(out.content, "one\ntwo\nthree");
        let keys: Vec<_> = out.sources.iter().map(|s| s.key.as_str()).collect();
        assert_eq!(keys, ["s3://b/a.pdf", "s3://b/c.pdf"]);
        assert_eq!(signer.0.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn dedup_is_idempotent_despite_random_links() {
        let signer = CountingSigner::default();
        let raw = vec![
            passage("one", 0.9, "s3://b/a.pdf"),
            passage("low", 0.2, "s3://b/z.pdf"),
            passage("two", 0.8, "s3://b/a.pdf"),
            passage("three", 0.7, "s3://b/c.pdf"),
        ];
        let first = run(raw.clone(), &signer).await;
        let second = run(raw, &signer).await;

        let keys = |o: &ToolOutput| o.sources.iter().map(|s| s.key.clone()).collect::<Vec<_>>();
        assert_eq!(keys(&first), keys(&second));
        assert_ne!(first.sources[0].uri, second.sources[0].uri);
        assert_eq!(first.content, second.content);
    }

    #[tokio::test]
    async fn empty_result_is_placeholder() {
        let signer = CountingSigner::default();
        let out = run(vec![passage("weak", 0.3, "s3://b/a.pdf")], &signer).await;
        assert_eq!(out.content, NO_KNOWLEDGE_PLACEHOLDER);
        assert!(out.sources.is_empty());

        let out = run(vec![], &signer).await;
        assert_eq!(out.content, NO_KNOWLEDGE_PLACEHOLDER);
    }

    #[tokio::test]
    async fn search_failure_is_placeholder() {
        let out = retrieve_knowledge(
            &FixedKnowledgeBase(Err(())),
            &CountingSigner::default(),
            "KB1",
            "hvac",
        )
        .await;
        assert_eq!(out.content, SEARCH_FAILED_PLACEHOLDER);
        assert!(out.sources.is_empty());
    }

    #[tokio::test]
    async fn unsignable_source_is_dropped_but_content_kept() {
        let signer = CountingSigner::default();
        let out = run(
            vec![
                passage("good", 0.9, "s3://b/a.pdf"),
                passage("still text", 0.9, "s3://b/broken.pdf"),
            ],
            &signer,
        )
        .await;
        assert_eq!(out.content, "good\nstill text");
        assert_eq!(out.sources.len(), 1);
    }

    #[tokio::test]
    async fn tool_requires_query() {
        let tool = KnowledgeBaseQueryTool::new(
            Arc::new(FixedKnowledgeBase(Ok(vec![]))),
            Arc::new(CountingSigner::default()),
            "KB1",
        );
        assert_eq!(tool.name(), "query_db");
        assert!(tool.execute(serde_json::json!({})).await.is_err());
        let out = tool.execute(serde_json::json!({"query": "hvac"})).await.unwrap();
        assert_eq!(out.content, NO_KNOWLEDGE_PLACEHOLDER);
    }
}
