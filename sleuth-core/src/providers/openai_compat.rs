//! OpenAI-compatible chat completions provider.
//!
//! Works against OpenAI and any endpoint that follows the chat completions
//! format (Azure OpenAI, vLLM, LM Studio, Ollama).

use crate::brain::LlmProvider;
use crate::cancel::run_cancellable;
use crate::config::LlmConfig;
use crate::error::LlmError;
use crate::types::{
    CompletionRequest, CompletionResponse, Content, Message, Role, TokenUsage, ToolDefinition,
};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// OpenAI-compatible completion provider.
pub struct OpenAiCompatibleProvider {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    temperature: Option<f32>,
    timeout_secs: u64,
}

impl OpenAiCompatibleProvider {
    /// Create a provider for `config.model` authenticated with `api_key`.
    pub fn new(config: &LlmConfig, api_key: String) -> Result<Self, LlmError> {
        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
            .trim_end_matches('/')
            .to_string();

        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| LlmError::Connection {
                message: format!("Failed to build HTTP client: {e}"),
            })?;

        Ok(Self {
            client,
            base_url,
            api_key,
            model: config.model.clone(),
            temperature: config.temperature,
            timeout_secs: config.request_timeout_secs,
        })
    }

    /// Convert ledger messages to OpenAI JSON format.
    fn messages_to_json(messages: &[Message]) -> Vec<Value> {
        messages
            .iter()
            .map(|msg| {
                let role = match msg.role {
                    Role::User => "user",
                    Role::Assistant => "assistant",
                    Role::System => "system",
                    Role::Tool => "tool",
                };
                match &msg.content {
                    Content::Text { text } => json!({
                        "role": role,
                        "content": text,
                    }),
                    Content::ToolCall {
                        id,
                        name,
                        arguments,
                    } => json!({
                        "role": "assistant",
                        "content": null,
                        "tool_calls": [Self::tool_call_json(id, name, arguments)],
                    }),
                    Content::ToolResult {
                        call_id,
                        name,
                        output,
                        ..
                    } => json!({
                        "role": "tool",
                        "tool_call_id": call_id,
                        "name": name,
                        "content": output,
                    }),
                    Content::MultiPart { parts } => {
                        let mut text_parts = Vec::new();
                        let mut tool_calls = Vec::new();
                        for part in parts {
                            match part {
                                Content::Text { text } => text_parts.push(text.clone()),
                                Content::ToolCall {
                                    id,
                                    name,
                                    arguments,
                                } => tool_calls.push(Self::tool_call_json(id, name, arguments)),
                                _ => {}
                            }
                        }
                        if !tool_calls.is_empty() {
                            let content = if text_parts.is_empty() {
                                Value::Null
                            } else {
                                Value::String(text_parts.join("\n"))
                            };
                            json!({
                                "role": "assistant",
                                "content": content,
                                "tool_calls": tool_calls,
                            })
                        } else {
                            json!({
                                "role": role,
                                "content": text_parts.join("\n"),
                            })
                        }
                    }
                }
            })
            .collect()
    }

    fn tool_call_json(id: &str, name: &str, arguments: &Value) -> Value {
        json!({
            "id": id,
            "type": "function",
            "function": {
                "name": name,
                "arguments": arguments.to_string(),
            }
        })
    }

    /// Convert tool definitions to OpenAI format.
    fn tools_to_json(tools: &[ToolDefinition]) -> Vec<Value> {
        tools
            .iter()
            .map(|t| {
                json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters,
                    }
                })
            })
            .collect()
    }

    /// Build the JSON request body.
    fn request_body(&self, request: &CompletionRequest) -> Value {
        let mut body = json!({
            "model": request.model.as_deref().unwrap_or(&self.model),
            "messages": Self::messages_to_json(&request.messages),
        });

        if let Some(temperature) = request.temperature.or(self.temperature) {
            body["temperature"] = json!(temperature);
        }
        if let Some(max_tokens) = request.max_tokens {
            body["max_completion_tokens"] = json!(max_tokens);
        }
        if let Some(tools) = &request.tools
            && !tools.is_empty()
        {
            body["tools"] = json!(Self::tools_to_json(tools));
            body["parallel_tool_calls"] = json!(request.parallel_tool_calls);
        }
        if let Some(format) = &request.response_format {
            body["response_format"] = json!({
                "type": "json_schema",
                "json_schema": {
                    "name": format.name,
                    "schema": format.schema,
                }
            });
        }
        body
    }

    /// Parse an OpenAI-format response body into a CompletionResponse.
    fn parse_response(body: &Value, model: &str) -> Result<CompletionResponse, LlmError> {
        let choice =
            body.get("choices")
                .and_then(|c| c.get(0))
                .ok_or_else(|| LlmError::ResponseParse {
                    message: "No choices in response".to_string(),
                })?;

        let message = choice
            .get("message")
            .ok_or_else(|| LlmError::ResponseParse {
                message: "No message in choice".to_string(),
            })?;

        let finish_reason = choice
            .get("finish_reason")
            .and_then(|f| f.as_str())
            .map(|s| s.to_string());

        let text = message
            .get("content")
            .and_then(|c| c.as_str())
            .unwrap_or("");

        let mut calls = Vec::new();
        if let Some(tool_calls) = message.get("tool_calls").and_then(|t| t.as_array()) {
            for tc in tool_calls {
                calls.push(Self::parse_tool_call(tc)?);
            }
        }

        let content = match calls.len() {
            0 => Content::text(text),
            1 if text.is_empty() => calls.remove(0),
            _ => {
                let mut parts = Vec::with_capacity(calls.len() + 1);
                if !text.is_empty() {
                    parts.push(Content::text(text));
                }
                parts.extend(calls);
                Content::MultiPart { parts }
            }
        };

        let usage_obj = body.get("usage");
        let usage = TokenUsage {
            input_tokens: usage_obj
                .and_then(|u| u.get("prompt_tokens"))
                .and_then(|t| t.as_u64())
                .unwrap_or(0) as usize,
            output_tokens: usage_obj
                .and_then(|u| u.get("completion_tokens"))
                .and_then(|t| t.as_u64())
                .unwrap_or(0) as usize,
        };

        let resp_model = body
            .get("model")
            .and_then(|m| m.as_str())
            .unwrap_or(model)
            .to_string();

        Ok(CompletionResponse {
            message: Message::new(Role::Assistant, content),
            usage,
            model: resp_model,
            finish_reason,
        })
    }

    /// A tool call whose arguments are not valid JSON is kept as a raw
    /// string so decoding can report it against the right tool.
    fn parse_tool_call(tc: &Value) -> Result<Content, LlmError> {
        let missing = |field: &str| LlmError::ResponseParse {
            message: format!("Tool call without {field}"),
        };
        let id = tc.get("id").and_then(|v| v.as_str()).ok_or_else(|| missing("id"))?;
        let func = tc.get("function").ok_or_else(|| missing("function"))?;
        let name = func
            .get("name")
            .and_then(|v| v.as_str())
            .ok_or_else(|| missing("function name"))?;
        let args_str = func
            .get("arguments")
            .and_then(|v| v.as_str())
            .unwrap_or("{}");
        let arguments = serde_json::from_str(args_str)
            .unwrap_or_else(|_| Value::String(args_str.to_string()));
        Ok(Content::tool_call(id, name, arguments))
    }

    /// Map an HTTP status code to the appropriate LlmError.
    fn map_http_error(status: reqwest::StatusCode, body: &str) -> LlmError {
        match status.as_u16() {
            401 | 403 => {
                debug!(body = %body, "Authentication failed ({})", status.as_u16());
                LlmError::AuthFailed {
                    provider: "OpenAI-compatible".to_string(),
                }
            }
            429 => {
                let retry_secs = serde_json::from_str::<Value>(body)
                    .ok()
                    .and_then(|v| {
                        v.get("error")?
                            .get("message")?
                            .as_str()
                            .map(|s| s.to_string())
                    })
                    .and_then(|msg| {
                        // "... Please try again in 20s."
                        msg.split("in ")
                            .last()
                            .map(|s| s.trim_end_matches('.').trim_end_matches('s').to_string())
                            .and_then(|s| s.parse::<u64>().ok())
                    })
                    .unwrap_or(5);
                LlmError::RateLimited {
                    retry_after_secs: retry_secs,
                }
            }
            status if status >= 500 => LlmError::ApiRequest {
                message: format!("Server error ({}): {}", status, body),
            },
            _ => LlmError::ApiRequest {
                message: format!("HTTP {}: {}", status, body),
            },
        }
    }

    fn map_transport_error(&self, e: reqwest::Error) -> LlmError {
        if e.is_timeout() {
            LlmError::Timeout {
                timeout_secs: self.timeout_secs,
            }
        } else if e.is_connect() {
            LlmError::Connection {
                message: e.to_string(),
            }
        } else {
            LlmError::ApiRequest {
                message: format!("Request failed: {}", e),
            }
        }
    }

    async fn send(&self, body: Value) -> Result<CompletionResponse, LlmError> {
        let url = format!("{}/chat/completions", self.base_url);
        debug!(url = %url, model = %body["model"], "Sending OpenAI completion request");

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.map_transport_error(e))?;

        let status = response.status();
        let response_body = response
            .text()
            .await
            .map_err(|e| self.map_transport_error(e))?;

        if !status.is_success() {
            return Err(Self::map_http_error(status, &response_body));
        }

        let json: Value =
            serde_json::from_str(&response_body).map_err(|e| LlmError::ResponseParse {
                message: format!("Invalid JSON: {}", e),
            })?;

        Self::parse_response(&json, &self.model)
    }
}

#[async_trait]
impl LlmProvider for OpenAiCompatibleProvider {
    async fn complete(
        &self,
        request: CompletionRequest,
        cancel: &CancellationToken,
    ) -> Result<CompletionResponse, LlmError> {
        let body = self.request_body(&request);
        run_cancellable(cancel, self.send(body), || LlmError::Cancelled).await
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::JsonSchemaFormat;

    fn provider() -> OpenAiCompatibleProvider {
        OpenAiCompatibleProvider::new(&LlmConfig::default(), "sk-test".into()).unwrap()
    }

    #[test]
    fn test_messages_to_json_text() {
        let messages = vec![
            Message::system("You are helpful"),
            Message::user("Hello"),
            Message::assistant("Hi there"),
        ];
        let json = OpenAiCompatibleProvider::messages_to_json(&messages);
        assert_eq!(json.len(), 3);
        assert_eq!(json[0]["role"], "system");
        assert_eq!(json[0]["content"], "You are helpful");
        assert_eq!(json[1]["role"], "user");
        assert_eq!(json[2]["role"], "assistant");
    }

    #[test]
    fn test_messages_to_json_multiple_tool_calls() {
        let msg = Message::new(
            Role::Assistant,
            Content::MultiPart {
                parts: vec![
                    Content::tool_call("call_1", "search_tool", json!({"query": "a"})),
                    Content::tool_call("call_2", "reflection_tool", json!({"reflection": "b"})),
                ],
            },
        );
        let json = OpenAiCompatibleProvider::messages_to_json(&[msg]);
        assert_eq!(json[0]["role"], "assistant");
        assert!(json[0]["content"].is_null());
        assert_eq!(json[0]["tool_calls"][1]["id"], "call_2");
        assert_eq!(
            json[0]["tool_calls"][0]["function"]["arguments"],
            r#"{"query":"a"}"#
        );
    }

    #[test]
    fn test_messages_to_json_tool_result() {
        let msg = Message::tool_result("call_123", "search_tool", "summaries", false);
        let json = OpenAiCompatibleProvider::messages_to_json(&[msg]);
        assert_eq!(json[0]["role"], "tool");
        assert_eq!(json[0]["tool_call_id"], "call_123");
        assert_eq!(json[0]["name"], "search_tool");
        assert_eq!(json[0]["content"], "summaries");
    }

    #[test]
    fn test_tools_to_json() {
        let tools = crate::tools::research_tool_definitions();
        let json = OpenAiCompatibleProvider::tools_to_json(&tools);
        assert_eq!(json.len(), 2);
        assert_eq!(json[0]["type"], "function");
        assert_eq!(json[0]["function"]["name"], "search_tool");
    }

    #[test]
    fn test_request_body_disables_parallel_tool_calls() {
        let request = CompletionRequest {
            messages: vec![Message::user("brief")],
            tools: Some(crate::tools::research_tool_definitions()),
            ..Default::default()
        };
        let body = provider().request_body(&request);
        assert_eq!(body["model"], "gpt-5");
        assert_eq!(body["parallel_tool_calls"], false);
        assert!(body.get("response_format").is_none());
        assert!(body.get("temperature").is_none());
    }

    #[test]
    fn test_request_body_structured() {
        let request = CompletionRequest {
            messages: vec![Message::user("summarize")],
            model: Some("gpt-4o".into()),
            response_format: Some(JsonSchemaFormat {
                name: "document_summary".into(),
                schema: json!({"type": "object"}),
            }),
            ..Default::default()
        };
        let body = provider().request_body(&request);
        assert_eq!(body["model"], "gpt-4o");
        assert_eq!(body["response_format"]["type"], "json_schema");
        assert_eq!(
            body["response_format"]["json_schema"]["name"],
            "document_summary"
        );
        assert!(body.get("tools").is_none());
        assert!(body.get("parallel_tool_calls").is_none());
    }

    #[test]
    fn test_parse_text_response() {
        let body = json!({
            "id": "chatcmpl-123",
            "choices": [{
                "index": 0,
                "message": {
                    "role": "assistant",
                    "content": "Research complete."
                },
                "finish_reason": "stop"
            }],
            "usage": {
                "prompt_tokens": 10,
                "completion_tokens": 8,
                "total_tokens": 18
            },
            "model": "gpt-5"
        });
        let resp = OpenAiCompatibleProvider::parse_response(&body, "gpt-5").unwrap();
        assert_eq!(resp.message.content.as_text().unwrap(), "Research complete.");
        assert_eq!(resp.usage.input_tokens, 10);
        assert_eq!(resp.usage.output_tokens, 8);
        assert_eq!(resp.finish_reason.as_deref(), Some("stop"));
        assert!(resp.message.tool_calls().is_empty());
    }

    #[test]
    fn test_parse_tool_call_response() {
        let body = json!({
            "choices": [{
                "index": 0,
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": "call_abc",
                        "type": "function",
                        "function": {
                            "name": "search_tool",
                            "arguments": "{\"query\":\"solid state batteries\"}"
                        }
                    }]
                },
                "finish_reason": "tool_calls"
            }],
            "model": "gpt-5"
        });
        let resp = OpenAiCompatibleProvider::parse_response(&body, "gpt-5").unwrap();
        let calls = resp.message.tool_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].id, "call_abc");
        assert_eq!(calls[0].name, "search_tool");
        assert_eq!(calls[0].arguments["query"], "solid state batteries");
    }

    #[test]
    fn test_parse_multiple_tool_calls_keep_order() {
        let body = json!({
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": "Searching.",
                    "tool_calls": [
                        {
                            "id": "a",
                            "type": "function",
                            "function": {"name": "search_tool", "arguments": "{\"query\":\"x\"}"}
                        },
                        {
                            "id": "b",
                            "type": "function",
                            "function": {"name": "reflection_tool", "arguments": "not json"}
                        }
                    ]
                }
            }]
        });
        let resp = OpenAiCompatibleProvider::parse_response(&body, "gpt-5").unwrap();
        let calls = resp.message.tool_calls();
        assert_eq!(calls.iter().map(|c| c.id).collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(calls[1].arguments, &Value::String("not json".into()));
        assert_eq!(resp.message.text(), "Searching.");
    }

    #[test]
    fn test_parse_response_no_choices() {
        let body = json!({"choices": []});
        let result = OpenAiCompatibleProvider::parse_response(&body, "gpt-5");
        assert!(result.is_err());
    }

    #[test]
    fn test_http_error_mapping_401() {
        let err = OpenAiCompatibleProvider::map_http_error(
            reqwest::StatusCode::UNAUTHORIZED,
            "Unauthorized",
        );
        assert!(matches!(err, LlmError::AuthFailed { .. }));
    }

    #[test]
    fn test_http_error_mapping_429() {
        let err = OpenAiCompatibleProvider::map_http_error(
            reqwest::StatusCode::TOO_MANY_REQUESTS,
            r#"{"error":{"message":"Rate limit reached. Please try again in 20s."}}"#,
        );
        assert!(matches!(
            err,
            LlmError::RateLimited {
                retry_after_secs: 20
            }
        ));
    }

    #[test]
    fn test_http_error_mapping_500() {
        let err = OpenAiCompatibleProvider::map_http_error(
            reqwest::StatusCode::INTERNAL_SERVER_ERROR,
            "Internal server error",
        );
        match err {
            LlmError::ApiRequest { message } => assert!(message.contains("500")),
            other => panic!("Expected ApiRequest, got {:?}", other),
        }
    }

    #[test]
    fn test_custom_base_url() {
        let config = LlmConfig {
            base_url: Some("http://localhost:11434/v1/".into()),
            ..LlmConfig::default()
        };
        let provider = OpenAiCompatibleProvider::new(&config, "k".into()).unwrap();
        assert_eq!(provider.base_url, "http://localhost:11434/v1");
    }

    #[tokio::test]
    async fn test_complete_returns_cancelled_without_sending() {
        let config = LlmConfig {
            // unroutable; the token fires before any connection attempt
            base_url: Some("http://127.0.0.1:9/v1".into()),
            ..LlmConfig::default()
        };
        let provider = OpenAiCompatibleProvider::new(&config, "k".into()).unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = provider
            .complete(CompletionRequest::default(), &cancel)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
    }
}
