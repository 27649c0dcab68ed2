//! Structured index tools (`query_contract_index`, `query_trade_index`).
//!
//! Both forward a normalized `{"action": "query", ...}` payload to an
//! index endpoint and hand its body back to the model unchanged. Index
//! failures are reported to the model as text.

use async_trait::async_trait;
use kbchat_core::error::ToolError;
use kbchat_core::services::{IndexQueryService, IndexReply};
use kbchat_core::tool::{Tool, ToolOutput};
use serde_json::{Map, Value, json};
use std::sync::Arc;
use tracing::{debug, warn};

const DEFAULT_LIMIT: u64 = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexKind {
    Contract,
    Trade,
}

impl IndexKind {
    fn label(self) -> &'static str {
        match self {
            Self::Contract => "contract",
            Self::Trade => "trade",
        }
    }

    fn string_fields(self) -> &'static [&'static str] {
        match self {
            Self::Contract => &[
                "free_text",
                "vendor_name",
                "agency",
                "contract_id",
                "blanket_number",
                "date_from",
                "date_to",
            ],
            Self::Trade => &["free_text", "vendor_name", "contract_id"],
        }
    }
}

pub struct IndexQueryTool {
    kind: IndexKind,
    service: Arc<dyn IndexQueryService>,
}

impl IndexQueryTool {
    pub fn contract(service: Arc<dyn IndexQueryService>) -> Self {
        Self {
            kind: IndexKind::Contract,
            service,
        }
    }

    pub fn trade(service: Arc<dyn IndexQueryService>) -> Self {
        Self {
            kind: IndexKind::Trade,
            service,
        }
    }

    /// The payload sent to the index: every known field present, absent or
    /// mistyped ones as `null`, `count_only` as a strict boolean.
    pub fn payload(&self, input: &Value) -> Value {
        let mut payload = Map::new();
        payload.insert("action".into(), json!("query"));
        for field in self.kind.string_fields() {
            let value = input[*field].as_str().map_or(Value::Null, |s| json!(s));
            payload.insert((*field).into(), value);
        }
        if self.kind == IndexKind::Contract {
            payload.insert(
                "punchout_enabled".into(),
                input["punchout_enabled"].as_bool().map_or(Value::Null, Value::Bool),
            );
            payload.insert(
                "certification".into(),
                input["certification"].as_str().map_or(Value::Null, |s| json!(s)),
            );
        }
        payload.insert(
            "count_only".into(),
            json!(input["count_only"].as_bool() == Some(true)),
        );
        payload.insert(
            "limit".into(),
            json!(input["limit"].as_u64().unwrap_or(DEFAULT_LIMIT)),
        );
        Value::Object(payload)
    }

    /// Text handed to the model for an index reply.
    pub fn reply_text(&self, reply: &IndexReply) -> String {
        if reply.status_code == 200 {
            return reply.body.clone();
        }
        serde_json::from_str::<Value>(&reply.body)
            .ok()
            .and_then(|v| v["error"].as_str().map(str::to_string))
            .unwrap_or_else(|| match self.kind {
                IndexKind::Contract => "Contract index query failed.".into(),
                IndexKind::Trade => "Trade index query failed.".into(),
            })
    }
}

#[async_trait]
impl Tool for IndexQueryTool {
    fn name(&self) -> &str {
        match self.kind {
            IndexKind::Contract => "query_contract_index",
            IndexKind::Trade => "query_trade_index",
        }
    }

    fn description(&self) -> &str {
        match self.kind {
            IndexKind::Contract => {
                "Query the Statewide Contract Index uploaded by admins. Use for contract lookups, vendor or buyer info, agency, blanket number, punchout availability, certifications and date ranges. Returns matching contract rows."
            }
            IndexKind::Trade => {
                "Query the Trade Index uploaded by admins. Use for trade vendor lookups by vendor name or contract ID. Returns matching vendor rows."
            }
        }
    }

    fn input_schema(&self) -> Value {
        let mut properties = json!({
            "free_text": { "type": "string", "description": "Search across key columns (e.g. description, vendor name, agency)." },
            "vendor_name": { "type": "string", "description": "Filter by vendor name (partial match)." },
            "contract_id": { "type": "string", "description": "Filter by contract ID (partial match)." },
            "count_only": { "type": "boolean", "description": "Return only the number of matching rows." },
            "limit": { "type": "integer", "description": "Max rows to return (default 500).", "default": DEFAULT_LIMIT }
        });
        if self.kind == IndexKind::Contract {
            let extra = json!({
                "agency": { "type": "string", "description": "Filter by agency (partial match)." },
                "blanket_number": { "type": "string", "description": "Filter by blanket number (partial match)." },
                "punchout_enabled": { "type": "boolean", "description": "Only contracts with (true) or without (false) punchout." },
                "certification": { "type": "string", "description": "Filter by vendor certification (e.g. SDO, MBE, WBE)." },
                "date_from": { "type": "string", "description": "Contracts beginning on or after this date (YYYY-MM-DD)." },
                "date_to": { "type": "string", "description": "Contracts ending on or before this date (YYYY-MM-DD)." }
            });
            if let (Some(base), Some(extra)) = (properties.as_object_mut(), extra.as_object()) {
                base.extend(extra.clone());
            }
        }
        json!({
            "type": "object",
            "properties": properties,
            "required": []
        })
    }

    fn status_message(&self) -> Option<&str> {
        match self.kind {
            IndexKind::Contract => Some("Searching contract index..."),
            IndexKind::Trade => Some("Searching trade index..."),
        }
    }

    async fn execute(&self, input: Value) -> Result<ToolOutput, ToolError> {
        let payload = self.payload(&input);
        debug!(index = self.kind.label(), %payload, "Querying index");

        match self.service.query(payload).await {
            Ok(reply) => Ok(ToolOutput::text(self.reply_text(&reply))),
            Err(e) => {
                warn!(index = self.kind.label(), error = %e, "Index query failed");
                Ok(ToolOutput::text(format!(
                    "Could not query the {} index. Please try again or rephrase.",
                    self.kind.label()
                )))
            }
        }
    }
}
