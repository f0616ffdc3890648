//! Structured completion: prompts whose answer must be a JSON value matching
//! a schema.
//!
//! [`InstructorClient`] layers schema validation and re-asking on top of any
//! [`LlmProvider`]. [`MockStructuredLlm`] stands in for it in tests and can
//! simulate per-prompt latency while tracking how many calls are in flight.

use crate::brain::LlmProvider;
use crate::cancel::run_cancellable;
use crate::error::LlmError;
use crate::types::{CompletionRequest, JsonSchemaFormat, Message};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Default number of re-asks after a reply fails schema validation.
pub const DEFAULT_STRUCTURED_RETRIES: usize = 3;

/// A named JSON schema describing the expected reply.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseSchema {
    pub name: String,
    pub schema: Value,
}

impl ResponseSchema {
    pub fn new(name: impl Into<String>, schema: Value) -> Self {
        Self {
            name: name.into(),
            schema,
        }
    }

    /// Check `value` against the schema's top-level object shape.
    ///
    /// Covers what the research prompts need: the value is an object, every
    /// required property is present, and present properties have the declared
    /// primitive type (array items included).
    pub fn validate(&self, value: &Value) -> Result<(), String> {
        let object = value
            .as_object()
            .ok_or_else(|| format!("expected a JSON object, got {}", type_name(value)))?;

        if let Some(required) = self.schema.get("required").and_then(Value::as_array) {
            for key in required.iter().filter_map(Value::as_str) {
                if !object.contains_key(key) {
                    return Err(format!("missing required field '{key}'"));
                }
            }
        }

        let Some(properties) = self.schema.get("properties").and_then(Value::as_object) else {
            return Ok(());
        };
        for (key, spec) in properties {
            let Some(field) = object.get(key) else {
                continue;
            };
            check_type(key, spec, field)?;
            if let (Some(items), Some(elements)) = (spec.get("items"), field.as_array()) {
                for (i, element) in elements.iter().enumerate() {
                    check_type(&format!("{key}[{i}]"), items, element)?;
                }
            }
        }
        Ok(())
    }

    fn format(&self) -> JsonSchemaFormat {
        JsonSchemaFormat {
            name: self.name.clone(),
            schema: self.schema.clone(),
        }
    }
}

fn check_type(key: &str, spec: &Value, field: &Value) -> Result<(), String> {
    let Some(expected) = spec.get("type").and_then(Value::as_str) else {
        return Ok(());
    };
    let ok = match expected {
        "string" => field.is_string(),
        "boolean" => field.is_boolean(),
        "integer" => field.is_i64() || field.is_u64(),
        "number" => field.is_number(),
        "array" => field.is_array(),
        "object" => field.is_object(),
        "null" => field.is_null(),
        _ => true,
    };
    if ok {
        Ok(())
    } else {
        Err(format!(
            "field '{key}' should be {expected}, got {}",
            type_name(field)
        ))
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// A completion service that answers a prompt with a schema-conforming value.
#[async_trait]
pub trait StructuredLlm: Send + Sync {
    /// Complete `prompt` and return a value that passed `schema` validation.
    async fn complete_structured(
        &self,
        prompt: &str,
        schema: &ResponseSchema,
        cancel: &CancellationToken,
    ) -> Result<Value, LlmError>;

    fn model_name(&self) -> &str;
}

/// A typed reply that knows its own schema.
pub trait StructuredOutput: DeserializeOwned {
    fn schema() -> ResponseSchema;
}

/// Complete `prompt` and decode the reply into `T`.
pub async fn extract<T: StructuredOutput>(
    llm: &dyn StructuredLlm,
    prompt: &str,
    cancel: &CancellationToken,
) -> Result<T, LlmError> {
    let schema = T::schema();
    let value = llm.complete_structured(prompt, &schema, cancel).await?;
    serde_json::from_value(value).map_err(|e| LlmError::ResponseParse {
        message: format!("{} reply did not decode: {e}", schema.name),
    })
}

/// Structured client over a chat-completion provider.
///
/// Each attempt asks for a `json_schema` response. A reply that is not JSON or
/// fails validation is answered with a correction turn and asked again, up to
/// `max_retries` times. Provider errors are returned as-is.
pub struct InstructorClient {
    provider: Arc<dyn LlmProvider>,
    model: Option<String>,
    max_retries: usize,
    temperature: Option<f32>,
}

impl InstructorClient {
    pub fn new(provider: Arc<dyn LlmProvider>) -> Self {
        Self {
            provider,
            model: None,
            max_retries: DEFAULT_STRUCTURED_RETRIES,
            temperature: None,
        }
    }

    /// Use `model` instead of the provider's default.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    fn parse_reply(text: &str, schema: &ResponseSchema) -> Result<Value, String> {
        let body = strip_code_fence(text);
        let value: Value =
            serde_json::from_str(body).map_err(|e| format!("reply is not valid JSON: {e}"))?;
        schema.validate(&value)?;
        Ok(value)
    }
}

/// Strip a surrounding markdown code fence (with or without a language tag).
fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_suffix("```").unwrap_or(rest);
    match rest.find('\n') {
        Some(newline) if !rest[..newline].trim_start().starts_with('{') => {
            rest[newline + 1..].trim()
        }
        _ => rest.trim(),
    }
}

#[async_trait]
impl StructuredLlm for InstructorClient {
    async fn complete_structured(
        &self,
        prompt: &str,
        schema: &ResponseSchema,
        cancel: &CancellationToken,
    ) -> Result<Value, LlmError> {
        let mut messages = vec![Message::user(prompt)];
        let attempts = self.max_retries + 1;
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            let request = CompletionRequest {
                messages: messages.clone(),
                temperature: self.temperature,
                model: self.model.clone(),
                response_format: Some(schema.format()),
                ..Default::default()
            };
            let response = run_cancellable(
                cancel,
                self.provider.complete(request, cancel),
                || LlmError::Cancelled,
            )
            .await?;

            let text = response.message.text();
            match Self::parse_reply(&text, schema) {
                Ok(value) => {
                    debug!(schema = %schema.name, attempt, "Structured reply accepted");
                    return Ok(value);
                }
                Err(reason) => {
                    warn!(schema = %schema.name, attempt, %reason, "Structured reply rejected");
                    messages.push(Message::assistant(text));
                    messages.push(Message::user(format!(
                        "Your previous reply was rejected: {reason}. Answer again with a single \
                         JSON object that matches the '{}' schema and nothing else.",
                        schema.name
                    )));
                    last_error = reason;
                }
            }
        }

        Err(LlmError::SchemaValidation {
            attempts,
            message: last_error,
        })
    }

    fn model_name(&self) -> &str {
        self.model
            .as_deref()
            .unwrap_or_else(|| self.provider.model_name())
    }
}

type Responder = Box<dyn Fn(&str) -> Result<Value, LlmError> + Send + Sync>;
type LatencyFn = Box<dyn Fn(&str) -> Duration + Send + Sync>;

/// A structured completion stub for tests.
///
/// Replies come from the queue first, then from the responder closure. An
/// optional latency function delays each call (honouring cancellation), and
/// the mock records the highest number of calls it saw in flight at once.
pub struct MockStructuredLlm {
    queue: Mutex<VecDeque<Result<Value, LlmError>>>,
    responder: Option<Responder>,
    latency: Option<LatencyFn>,
    prompts: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl MockStructuredLlm {
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            responder: None,
            latency: None,
            prompts: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
        }
    }

    /// Answer every call not served by the queue with `responder(prompt)`.
    pub fn with_responder(
        mut self,
        responder: impl Fn(&str) -> Result<Value, LlmError> + Send + Sync + 'static,
    ) -> Self {
        self.responder = Some(Box::new(responder));
        self
    }

    /// Delay each call by `latency(prompt)`.
    pub fn with_latency(
        mut self,
        latency: impl Fn(&str) -> Duration + Send + Sync + 'static,
    ) -> Self {
        self.latency = Some(Box::new(latency));
        self
    }

    pub fn queue_value(&self, value: Value) {
        lock(&self.queue).push_back(Ok(value));
    }

    pub fn queue_error(&self, error: LlmError) {
        lock(&self.queue).push_back(Err(error));
    }

    /// Prompts received so far, in call order.
    pub fn prompts(&self) -> Vec<String> {
        lock(&self.prompts).clone()
    }

    pub fn call_count(&self) -> usize {
        lock(&self.prompts).len()
    }

    /// Highest number of concurrent calls observed.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    fn next_reply(&self, prompt: &str) -> Result<Value, LlmError> {
        if let Some(reply) = lock(&self.queue).pop_front() {
            return reply;
        }
        match &self.responder {
            Some(responder) => responder(prompt),
            None => Err(LlmError::ApiRequest {
                message: "no structured reply queued".to_string(),
            }),
        }
    }
}

impl Default for MockStructuredLlm {
    fn default() -> Self {
        Self::new()
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl StructuredLlm for MockStructuredLlm {
    async fn complete_structured(
        &self,
        prompt: &str,
        _schema: &ResponseSchema,
        cancel: &CancellationToken,
    ) -> Result<Value, LlmError> {
        if cancel.is_cancelled() {
            return Err(LlmError::Cancelled);
        }
        lock(&self.prompts).push(prompt.to_string());

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        let _guard = InFlight(&self.in_flight);
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);

        if let Some(latency) = &self.latency {
            let delay = latency(prompt);
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(LlmError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
        self.next_reply(prompt)
    }

    fn model_name(&self) -> &str {
        "mock-structured"
    }
}
