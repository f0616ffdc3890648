//! # Sleuth Core
//!
//! Core library for the Sleuth research agent.
//! Provides the session state machine, the research tool-call loop, the
//! concurrent summarizer, capability traits for completion, structured
//! completion and search, configuration, prompts and fundamental types.

pub mod brain;
pub mod cancel;
pub mod config;
pub mod error;
pub mod ledger;
pub mod outputs;
pub mod prompts;
pub mod providers;
pub mod research;
pub mod search;
pub mod structured;
pub mod tools;
pub mod types;

// Re-export commonly used types at the crate root.
pub use brain::{Brain, LlmProvider, MockLlmProvider};
pub use config::{SleuthConfig, load_config};
pub use error::{Result, SleuthError};
pub use ledger::{Ledger, LedgerScope};
pub use prompts::PromptLibrary;
pub use research::{
    Capabilities, ClarifyOutcome, ResearchSession, SessionCallback, SessionOutcome, SessionPhase,
    SessionSettings, UserInput,
};
pub use search::{MockSearch, SearchService};
pub use structured::{InstructorClient, MockStructuredLlm, StructuredLlm};
pub use types::{CompletionRequest, CompletionResponse, Content, Message, Role, ToolDefinition};
