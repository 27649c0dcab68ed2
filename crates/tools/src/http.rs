//! HTTP clients for the external collaborators: the vector knowledge base,
//! the metadata source and the structured index endpoints.

use async_trait::async_trait;
use kbchat_core::error::{KnowledgeError, ToolError};
use kbchat_core::knowledge::{KnowledgeBase, RetrievedPassage};
use kbchat_core::services::{IndexQueryService, IndexReply, MetadataSource};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, trace};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

fn client() -> Result<reqwest::Client, String> {
    reqwest::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()
        .map_err(|e| e.to_string())
}

/// Retrieval endpoint speaking the `retrievalQuery` / `retrievalResults`
/// shape: `POST {endpoint}/knowledgebases/{id}/retrieve`.
pub struct HttpKnowledgeBase {
    endpoint: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl HttpKnowledgeBase {
    pub fn new(endpoint: impl Into<String>, api_key: Option<String>) -> Result<Self, KnowledgeError> {
        Ok(Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            api_key,
            client: client().map_err(KnowledgeError::Request)?,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RetrieveResponse {
    #[serde(default)]
    retrieval_results: Vec<RetrievalResult>,
}

#[derive(Debug, Deserialize)]
struct RetrievalResult {
    content: ResultContent,
    #[serde(default)]
    score: f64,
    location: ResultLocation,
}

#[derive(Debug, Deserialize)]
struct ResultContent {
    text: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResultLocation {
    s3_location: S3Location,
}

#[derive(Debug, Deserialize)]
struct S3Location {
    uri: String,
}

/// Decode a retrieval response body into passages.
pub fn parse_retrieval(body: &str) -> Result<Vec<RetrievedPassage>, KnowledgeError> {
    let response: RetrieveResponse =
        serde_json::from_str(body).map_err(|e| KnowledgeError::MalformedResponse(e.to_string()))?;
    Ok(response
        .retrieval_results
        .into_iter()
        .map(|r| RetrievedPassage {
            content: r.content.text,
            score: r.score,
            location: r.location.s3_location.uri,
        })
        .collect())
}

#[async_trait]
impl KnowledgeBase for HttpKnowledgeBase {
    async fn retrieve(
        &self,
        knowledge_base_id: &str,
        query: &str,
    ) -> Result<Vec<RetrievedPassage>, KnowledgeError> {
        let url = format!("{}/knowledgebases/{knowledge_base_id}/retrieve", self.endpoint);
        let mut request = self
            .client
            .post(&url)
            .json(&serde_json::json!({ "retrievalQuery": { "text": query } }));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| KnowledgeError::Request(e.to_string()))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| KnowledgeError::Request(e.to_string()))?;
        if !status.is_success() {
            return Err(KnowledgeError::Unavailable(format!("{status}: {body}")));
        }
        trace!(body = %body, "Retrieval response");

        let passages = parse_retrieval(&body)?;
        debug!(knowledge_base_id, results = passages.len(), "Knowledge base searched");
        Ok(passages)
    }
}

/// Metadata blob served over plain `GET`.
pub struct HttpMetadataSource {
    url: String,
    client: reqwest::Client,
}

impl HttpMetadataSource {
    pub fn new(url: impl Into<String>) -> Result<Self, KnowledgeError> {
        Ok(Self {
            url: url.into(),
            client: client().map_err(KnowledgeError::Request)?,
        })
    }
}

/// Unwrap a metadata reply: an embedded JSON `body` string is decoded, and
/// a top-level `metadata` field wins over the whole document.
pub fn extract_metadata(reply: Value) -> Value {
    let document = match reply.get("body").and_then(Value::as_str) {
        Some(body) => serde_json::from_str(body).unwrap_or(Value::Null),
        None => reply,
    };
    match document.get("metadata") {
        Some(metadata) => metadata.clone(),
        None => document,
    }
}

#[async_trait]
impl MetadataSource for HttpMetadataSource {
    async fn fetch(&self) -> Result<Value, KnowledgeError> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| KnowledgeError::Request(e.to_string()))?;
        if !response.status().is_success() {
            return Err(KnowledgeError::Unavailable(response.status().to_string()));
        }
        let reply: Value = response
            .json()
            .await
            .map_err(|e| KnowledgeError::MalformedResponse(e.to_string()))?;
        Ok(extract_metadata(reply))
    }
}

/// Index endpoint taking the query payload as a JSON `POST`.
pub struct HttpIndexService {
    name: &'static str,
    url: String,
    client: reqwest::Client,
}

impl HttpIndexService {
    pub fn new(name: &'static str, url: impl Into<String>) -> Result<Self, ToolError> {
        Ok(Self {
            name,
            url: url.into(),
            client: client().map_err(|reason| ToolError::ExecutionFailed {
                tool_name: name.into(),
                reason,
            })?,
        })
    }
}

/// Interpret an index reply. A `{statusCode, body}` envelope wins over the
/// HTTP status; a non-string `body` is re-serialized.
pub fn parse_index_reply(http_status: u16, raw: &str) -> IndexReply {
    match serde_json::from_str::<Value>(raw) {
        Ok(value) if value.get("statusCode").is_some() => {
            let status_code = value["statusCode"]
                .as_u64()
                .and_then(|c| u16::try_from(c).ok())
                .unwrap_or(500);
            let body = match &value["body"] {
                Value::String(s) => s.clone(),
                Value::Null => "{}".to_string(),
                other => other.to_string(),
            };
            IndexReply { status_code, body }
        }
        _ => IndexReply {
            status_code: http_status,
            body: raw.to_string(),
        },
    }
}

#[async_trait]
impl IndexQueryService for HttpIndexService {
    async fn query(&self, payload: Value) -> Result<IndexReply, ToolError> {
        let failed = |reason: String| ToolError::ExecutionFailed {
            tool_name: self.name.into(),
            reason,
        };
        let response = self
            .client
            .post(&self.url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| failed(e.to_string()))?;
        let status = response.status().as_u16();
        let raw = response.text().await.map_err(|e| failed(e.to_string()))?;
        Ok(parse_index_reply(status, &raw))
    }
}
