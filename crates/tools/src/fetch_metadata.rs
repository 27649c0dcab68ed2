//! Metadata fetch tool (`fetch_metadata`).

use async_trait::async_trait;
use kbchat_core::error::ToolError;
use kbchat_core::services::MetadataSource;
use kbchat_core::tool::{Tool, ToolOutput};
use std::sync::Arc;
use tracing::warn;

pub const NO_METADATA: &str = "No metadata available.";

pub struct FetchMetadataTool {
    source: Arc<dyn MetadataSource>,
}

impl FetchMetadataTool {
    pub fn new(source: Arc<dyn MetadataSource>) -> Self {
        Self { source }
    }
}

#[async_trait]
impl Tool for FetchMetadataTool {
    fn name(&self) -> &str {
        "fetch_metadata"
    }

    fn description(&self) -> &str {
        "Retrieve metadata information about the documents in the knowledge base."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "filter_key": {
                    "type": "string",
                    "description": "Filter metadata by a specific key."
                }
            },
            "required": ["filter_key"]
        })
    }

    fn status_message(&self) -> Option<&str> {
        Some("Researching contract details...")
    }

    async fn execute(&self, input: serde_json::Value) -> Result<ToolOutput, ToolError> {
        let metadata = match self.source.fetch().await {
            Ok(metadata) if !metadata.is_null() => metadata,
            Ok(_) => return Ok(ToolOutput::text(NO_METADATA)),
            Err(e) => {
                warn!(error = %e, "Metadata fetch failed");
                return Ok(ToolOutput::text(NO_METADATA));
            }
        };

        // Narrow to the requested key when the blob has it
        let selected = input["filter_key"]
            .as_str()
            .and_then(|key| metadata.get(key))
            .unwrap_or(&metadata);

        Ok(ToolOutput::text(selected.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kbchat_core::error::KnowledgeError;
    use serde_json::json;

    struct FixedMetadata(Option<serde_json::Value>);

    #[async_trait]
    impl MetadataSource for FixedMetadata {
        async fn fetch(&self) -> Result<serde_json::Value, KnowledgeError> {
            self.0
                .clone()
                .ok_or_else(|| KnowledgeError::Unavailable("down".into()))
        }
    }

    fn tool(metadata: Option<serde_json::Value>) -> FetchMetadataTool {
        FetchMetadataTool::new(Arc::new(FixedMetadata(metadata)))
    }

    #[tokio::test]
    async fn filter_key_narrows_when_present() {
        let blob = json!({"contracts/hvac.pdf": {"summary": "HVAC"}, "other.pdf": {}});
        let out = tool(Some(blob.clone()))
            .execute(json!({"filter_key": "contracts/hvac.pdf"}))
            .await
            .unwrap();
        assert_eq!(out.content, r#"{"summary":"HVAC"}"#);

        let out = tool(Some(blob.clone()))
            .execute(json!({"filter_key": "missing"}))
            .await
            .unwrap();
        assert_eq!(out.content, blob.to_string());
    }

    #[tokio::test]
    async fn unavailable_metadata_is_placeholder() {
        let out = tool(None).execute(json!({"filter_key": "x"})).await.unwrap();
        assert_eq!(out.content, NO_METADATA);
        let out = tool(Some(serde_json::Value::Null))
            .execute(json!({}))
            .await
            .unwrap();
        assert_eq!(out.content, NO_METADATA);
    }
}
