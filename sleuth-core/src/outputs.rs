//! Typed replies for each structured step of a session.

use crate::structured::{ResponseSchema, StructuredOutput};
use serde::{Deserialize, Serialize};
use serde_json::json;

/// Most key excerpts kept per summarized document.
pub const MAX_KEY_EXCERPTS: usize = 5;

/// Whether the request needs a follow-up question before research starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClarifyDecision {
    pub need_clarification: bool,
    /// Question to ask when clarification is needed.
    #[serde(default)]
    pub question: String,
    /// Acknowledgement to show once the request is clear.
    #[serde(default)]
    pub verification: String,
}

impl StructuredOutput for ClarifyDecision {
    fn schema() -> ResponseSchema {
        ResponseSchema::new(
            "clarify_decision",
            json!({
                "type": "object",
                "properties": {
                    "need_clarification": {"type": "boolean"},
                    "question": {"type": "string"},
                    "verification": {"type": "string"}
                },
                "required": ["need_clarification", "question", "verification"],
                "additionalProperties": false
            }),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResearchBrief {
    pub research_brief: String,
}

impl StructuredOutput for ResearchBrief {
    fn schema() -> ResponseSchema {
        ResponseSchema::new(
            "research_brief",
            json!({
                "type": "object",
                "properties": {
                    "research_brief": {"type": "string"}
                },
                "required": ["research_brief"],
                "additionalProperties": false
            }),
        )
    }
}

/// Condensed form of one search result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentSummary {
    pub summary: String,
    #[serde(default)]
    pub key_excerpts: Vec<String>,
}

impl DocumentSummary {
    /// Render as the tagged block stored in the research notes, keeping at
    /// most `max_excerpts` excerpts.
    pub fn render(&self, max_excerpts: usize) -> String {
        let excerpts = self
            .key_excerpts
            .iter()
            .map(|e| e.trim())
            .filter(|e| !e.is_empty())
            .take(max_excerpts)
            .map(|e| format!("- {e}"))
            .collect::<Vec<_>>()
            .join("\n");
        format!(
            "<summary>\n{}\n</summary>\n<key_excerpts>\n{}\n</key_excerpts>",
            self.summary.trim(),
            excerpts
        )
    }
}

impl StructuredOutput for DocumentSummary {
    fn schema() -> ResponseSchema {
        ResponseSchema::new(
            "document_summary",
            json!({
                "type": "object",
                "properties": {
                    "summary": {"type": "string"},
                    "key_excerpts": {
                        "type": "array",
                        "items": {"type": "string"},
                        "maxItems": MAX_KEY_EXCERPTS
                    }
                },
                "required": ["summary", "key_excerpts"],
                "additionalProperties": false
            }),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResearchReport {
    pub report: String,
}

impl StructuredOutput for ResearchReport {
    fn schema() -> ResponseSchema {
        ResponseSchema::new(
            "research_report",
            json!({
                "type": "object",
                "properties": {
                    "report": {"type": "string"}
                },
                "required": ["report"],
                "additionalProperties": false
            }),
        )
    }
}
