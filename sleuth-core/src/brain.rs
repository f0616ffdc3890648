//! Brain module: completion provider abstraction.
//!
//! Defines the `LlmProvider` trait for model-agnostic chat completions with
//! tool calling, the `Brain` wrapper that prepends the system prompt and
//! tracks usage, and a queue-driven `MockLlmProvider` for tests.

use crate::cancel::run_cancellable;
use crate::error::LlmError;
use crate::types::{
    CompletionRequest, CompletionResponse, Content, Message, Role, TokenUsage, ToolDefinition,
};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Trait for completion providers.
///
/// Implementations must observe `cancel` and return [`LlmError::Cancelled`]
/// promptly once it fires.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Perform a full completion and return the assistant turn.
    async fn complete(
        &self,
        request: CompletionRequest,
        cancel: &CancellationToken,
    ) -> Result<CompletionResponse, LlmError>;

    /// Return the model name.
    fn model_name(&self) -> &str;
}

/// The Brain wraps a completion provider and adds prompt assembly and
/// usage accounting for the research loop.
pub struct Brain {
    provider: Arc<dyn LlmProvider>,
    total_usage: TokenUsage,
    calls: usize,
}

impl Brain {
    pub fn new(provider: Arc<dyn LlmProvider>) -> Self {
        Self {
            provider,
            total_usage: TokenUsage::default(),
            calls: 0,
        }
    }

    /// Construct the messages for the provider: system prompt first, then the
    /// conversation. The system prompt is never written back to the ledger.
    pub fn build_messages(system_prompt: &str, conversation: &[Message]) -> Vec<Message> {
        let mut messages = Vec::with_capacity(conversation.len() + 1);
        if !system_prompt.is_empty() {
            messages.push(Message::system(system_prompt));
        }
        messages.extend_from_slice(conversation);
        messages
    }

    /// Send one completion request with the given tools. Tool calls from the
    /// answer are always meant to run one after another, so parallel tool
    /// calls are disabled.
    pub async fn think(
        &mut self,
        system_prompt: &str,
        conversation: &[Message],
        tools: Vec<ToolDefinition>,
        cancel: &CancellationToken,
    ) -> Result<CompletionResponse, LlmError> {
        let request = CompletionRequest {
            messages: Self::build_messages(system_prompt, conversation),
            tools: Some(tools),
            parallel_tool_calls: false,
            ..Default::default()
        };

        debug!(
            model = self.provider.model_name(),
            messages = request.messages.len(),
            "Sending completion request"
        );

        let response = run_cancellable(
            cancel,
            self.provider.complete(request, cancel),
            || LlmError::Cancelled,
        )
        .await?;

        self.calls += 1;
        self.total_usage.accumulate(&response.usage);
        info!(
            input_tokens = response.usage.input_tokens,
            output_tokens = response.usage.output_tokens,
            tool_calls = response.message.tool_calls().len(),
            "Completion received"
        );

        Ok(response)
    }

    pub fn total_usage(&self) -> &TokenUsage {
        &self.total_usage
    }

    pub fn calls(&self) -> usize {
        self.calls
    }

    pub fn model_name(&self) -> &str {
        self.provider.model_name()
    }
}

/// A mock provider that replays queued responses, for tests.
///
/// Every request is recorded so tests can assert on what was sent.
pub struct MockLlmProvider {
    model: String,
    responses: Mutex<VecDeque<Result<CompletionResponse, LlmError>>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl MockLlmProvider {
    pub fn new() -> Self {
        Self {
            model: "mock-model".to_string(),
            responses: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Queue a response to be returned by the next `complete` call.
    pub fn queue_response(&self, response: CompletionResponse) {
        lock(&self.responses).push_back(Ok(response));
    }

    /// Queue an error to be returned by the next `complete` call.
    pub fn queue_error(&self, error: LlmError) {
        lock(&self.responses).push_back(Err(error));
    }

    /// Requests received so far, oldest first.
    pub fn requests(&self) -> Vec<CompletionRequest> {
        lock(&self.requests).clone()
    }

    /// Create a simple text response for testing.
    pub fn text_response(text: &str) -> CompletionResponse {
        Self::response(Message::assistant(text), "stop")
    }

    /// Create a single tool call response for testing.
    pub fn tool_call_response(tool_name: &str, arguments: serde_json::Value) -> CompletionResponse {
        Self::tool_calls_response(vec![(tool_name, arguments)])
    }

    /// Create a response carrying several tool calls, in order.
    pub fn tool_calls_response(calls: Vec<(&str, serde_json::Value)>) -> CompletionResponse {
        let parts: Vec<Content> = calls
            .into_iter()
            .map(|(name, arguments)| {
                Content::tool_call(format!("call_{}", uuid::Uuid::new_v4()), name, arguments)
            })
            .collect();
        let content = if parts.len() == 1 {
            parts.into_iter().next().unwrap_or(Content::MultiPart { parts: Vec::new() })
        } else {
            Content::MultiPart { parts }
        };
        Self::response(Message::new(Role::Assistant, content), "tool_calls")
    }

    fn response(message: Message, finish_reason: &str) -> CompletionResponse {
        CompletionResponse {
            message,
            usage: TokenUsage {
                input_tokens: 100,
                output_tokens: 30,
            },
            model: "mock-model".to_string(),
            finish_reason: Some(finish_reason.to_string()),
        }
    }
}

impl Default for MockLlmProvider {
    fn default() -> Self {
        Self::new()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl LlmProvider for MockLlmProvider {
    async fn complete(
        &self,
        request: CompletionRequest,
        cancel: &CancellationToken,
    ) -> Result<CompletionResponse, LlmError> {
        if cancel.is_cancelled() {
            return Err(LlmError::Cancelled);
        }
        lock(&self.requests).push(request);
        lock(&self.responses)
            .pop_front()
            .unwrap_or_else(|| Ok(Self::text_response("No queued responses available.")))
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
