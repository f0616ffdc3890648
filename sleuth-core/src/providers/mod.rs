//! Completion provider implementations.
//!
//! Use [`create_provider`] to build the provider named in the configuration.

pub mod openai_compat;

use crate::brain::LlmProvider;
use crate::config::LlmConfig;
use crate::error::LlmError;
use std::sync::Arc;

pub use openai_compat::OpenAiCompatibleProvider;

/// Create the provider selected by `config.provider`.
pub fn create_provider(
    config: &LlmConfig,
    api_key: String,
) -> Result<Arc<dyn LlmProvider>, LlmError> {
    match config.provider.as_str() {
        "openai" => Ok(Arc::new(OpenAiCompatibleProvider::new(config, api_key)?)),
        other => Err(LlmError::ApiRequest {
            message: format!("Unsupported provider: {other}"),
        }),
    }
}
