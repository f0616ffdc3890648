//! Error types for the Sleuth research engine.
//!
//! Uses `thiserror` for public API error types with structured variants
//! covering the completion, structured-output, search, tool, summarization,
//! configuration and session domains.

use std::path::PathBuf;

/// Top-level error type for the Sleuth core library.
#[derive(Debug, thiserror::Error)]
pub enum SleuthError {
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Search error: {0}")]
    Search(#[from] SearchError),

    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    #[error("Summarization error: {0}")]
    Summarize(#[from] SummarizeError),

    #[error("Prompt error: {0}")]
    Prompt(#[from] PromptError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),
}

impl SleuthError {
    /// Whether this error was caused by the session's cancellation signal,
    /// however deeply it was wrapped on the way up.
    pub fn is_cancelled(&self) -> bool {
        match self {
            SleuthError::Llm(e) => e.is_cancelled(),
            SleuthError::Search(e) => matches!(e, SearchError::Cancelled),
            SleuthError::Tool(e) => e.is_cancelled(),
            SleuthError::Summarize(e) => e.is_cancelled(),
            SleuthError::Session(e) => matches!(e, SessionError::Cancelled),
            _ => false,
        }
    }
}

/// Errors from completion and structured-completion providers.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("API request failed: {message}")]
    ApiRequest { message: String },

    #[error("API response parse error: {message}")]
    ResponseParse { message: String },

    #[error("Structured output failed validation after {attempts} attempt(s): {message}")]
    SchemaValidation { attempts: usize, message: String },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("Provider connection failed: {message}")]
    Connection { message: String },

    #[error("Request was cancelled")]
    Cancelled,
}

impl LlmError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, LlmError::Cancelled)
    }
}

/// Errors from search backends.
#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error("Search request failed: {message}")]
    Request { message: String },

    #[error("Search provider returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Search response parse error: {message}")]
    ResponseParse { message: String },

    #[error("Search was cancelled")]
    Cancelled,
}

/// Errors from decoding and executing research tool calls.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("Unknown tool: {name}")]
    UnknownTool { name: String },

    #[error("Invalid arguments for tool '{name}': {reason}")]
    InvalidArguments { name: String, reason: String },

    #[error("Tool '{name}' search failed: {source}")]
    Search {
        name: String,
        #[source]
        source: SearchError,
    },

    #[error("Tool '{name}' summarization failed: {source}")]
    Summarization {
        name: String,
        #[source]
        source: SummarizeError,
    },
}

impl ToolError {
    pub fn is_cancelled(&self) -> bool {
        match self {
            ToolError::Search { source, .. } => matches!(source, SearchError::Cancelled),
            ToolError::Summarization { source, .. } => source.is_cancelled(),
            _ => false,
        }
    }
}

/// Errors from a concurrent summarization batch.
#[derive(Debug, thiserror::Error)]
pub enum SummarizeError {
    #[error("No documents to summarize")]
    EmptyBatch,

    #[error("Summarizing document {index} failed: {source}")]
    Job {
        index: usize,
        #[source]
        source: LlmError,
    },

    #[error("Could not build summarization prompt: {0}")]
    Prompt(#[from] PromptError),

    #[error("Summary worker panicked: {message}")]
    WorkerPanicked { message: String },

    #[error("Batch ended with {received} of {expected} results")]
    Incomplete { expected: usize, received: usize },

    #[error("Summarization was cancelled")]
    Cancelled,
}

impl SummarizeError {
    pub fn is_cancelled(&self) -> bool {
        match self {
            SummarizeError::Cancelled => true,
            SummarizeError::Job { source, .. } => source.is_cancelled(),
            _ => false,
        }
    }
}

/// Errors from prompt template registration and rendering.
#[derive(Debug, thiserror::Error)]
pub enum PromptError {
    #[error("Template '{name}' failed to register: {message}")]
    Register { name: String, message: String },

    #[error("Template '{name}' failed to render: {message}")]
    Render { name: String, message: String },
}

/// Errors from the configuration system.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Environment variable not set: {var}")]
    EnvVarMissing { var: String },

    #[error("Configuration parse error: {message}")]
    ParseError { message: String },
}

/// Errors from the session state machine.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Invalid state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("User message cannot be empty")]
    EmptyUserMessage,

    #[error("Session was cancelled")]
    Cancelled,
}

/// A type alias for results using the top-level `SleuthError`.
pub type Result<T> = std::result::Result<T, SleuthError>;
