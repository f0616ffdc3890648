//! The research tool set.
//!
//! The model may call two tools during research: `search_tool` and
//! `reflection_tool`. Calls are decoded into [`ResearchTool`] before anything
//! runs, so an unknown name or malformed arguments fail up front.

use crate::error::ToolError;
use crate::types::{ToolCallRef, ToolDefinition};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

pub const SEARCH_TOOL: &str = "search_tool";
pub const REFLECTION_TOOL: &str = "reflection_tool";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchArgs {
    pub query: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReflectArgs {
    pub reflection: String,
}

/// A decoded research tool call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResearchTool {
    Search(SearchArgs),
    Reflect(ReflectArgs),
}

impl ResearchTool {
    pub fn name(&self) -> &'static str {
        match self {
            ResearchTool::Search(_) => SEARCH_TOOL,
            ResearchTool::Reflect(_) => REFLECTION_TOOL,
        }
    }
}

/// A tool call ready to run: the provider's call id plus decoded arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolInvocation {
    pub id: String,
    pub tool: ResearchTool,
}

impl ToolInvocation {
    pub fn decode(id: &str, name: &str, arguments: &Value) -> Result<Self, ToolError> {
        let tool = match name {
            SEARCH_TOOL => {
                let args: SearchArgs = parse_args(name, arguments)?;
                if args.query.trim().is_empty() {
                    return Err(ToolError::InvalidArguments {
                        name: name.to_string(),
                        reason: "query must not be empty".to_string(),
                    });
                }
                ResearchTool::Search(args)
            }
            REFLECTION_TOOL => ResearchTool::Reflect(parse_args(name, arguments)?),
            other => {
                return Err(ToolError::UnknownTool {
                    name: other.to_string(),
                });
            }
        };
        Ok(Self {
            id: id.to_string(),
            tool,
        })
    }

    pub fn from_call(call: &ToolCallRef<'_>) -> Result<Self, ToolError> {
        Self::decode(call.id, call.name, call.arguments)
    }
}

/// Providers sometimes send arguments as a JSON-encoded string.
fn parse_args<T: serde::de::DeserializeOwned>(
    name: &str,
    arguments: &Value,
) -> Result<T, ToolError> {
    let result = match arguments {
        Value::String(raw) => serde_json::from_str(raw),
        other => serde_json::from_value(other.clone()),
    };
    result.map_err(|e| ToolError::InvalidArguments {
        name: name.to_string(),
        reason: e.to_string(),
    })
}

/// Text returned to the model after a reflection.
pub fn reflection_ack(reflection: &str) -> String {
    format!("Reflection recorded: {reflection}")
}

/// Definitions of the two research tools, in a stable order.
pub fn research_tool_definitions() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition {
            name: SEARCH_TOOL.to_string(),
            description: "Search the web for sources relevant to the research brief. \
                          Returns a summary of each result."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "A single focused search query"
                    }
                },
                "required": ["query"]
            }),
        },
        ToolDefinition {
            name: REFLECTION_TOOL.to_string(),
            description: "Record a reflection on the results so far: what was found, \
                          what is missing and whether to search again."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "reflection": {
                        "type": "string",
                        "description": "Your reflection on progress and next steps"
                    }
                },
                "required": ["reflection"]
            }),
        },
    ]
}
