//! Configuration system for Sleuth.
//!
//! Uses `figment` for layered configuration: defaults -> user config file ->
//! workspace config file -> environment variables -> explicit overrides.

use crate::error::ConfigError;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Hard ceiling on search calls per research phase.
pub const SEARCH_CALL_BUDGET: usize = 5;
/// Hard ceiling on concurrent summary workers per batch.
pub const MAX_SUMMARY_WORKERS: usize = 5;
/// Default ceiling on model turns in the research loop.
pub const DEFAULT_MAX_ITERATIONS: usize = 30;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SleuthConfig {
    pub llm: LlmConfig,
    pub search: SearchConfig,
    pub research: ResearchConfig,
}

/// Completion provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Provider name. Only "openai" (and OpenAI-compatible endpoints) is supported.
    pub provider: String,
    /// Model for clarify, brief, research and report calls.
    pub model: String,
    /// Model for per-document summaries.
    pub summary_model: String,
    /// Environment variable name containing the API key.
    pub api_key_env: String,
    /// Optional base URL override for the API endpoint.
    pub base_url: Option<String>,
    pub temperature: Option<f32>,
    /// Re-asks after a structured reply fails validation.
    pub structured_max_retries: usize,
    pub request_timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "gpt-5".to_string(),
            summary_model: "gpt-4o".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            base_url: None,
            temperature: None,
            structured_max_retries: 3,
            request_timeout_secs: 300,
        }
    }
}

/// Search backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Backend name: "exa".
    pub provider: String,
    pub endpoint: String,
    /// Environment variable name containing the API key.
    pub api_key_env: String,
    /// Results requested per search call.
    pub num_results: usize,
    pub timeout_secs: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            provider: "exa".to_string(),
            endpoint: "https://api.exa.ai/search".to_string(),
            api_key_env: "EXA_API_KEY".to_string(),
            num_results: 10,
            timeout_secs: 30,
        }
    }
}

/// Limits applied during the research phase.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResearchConfig {
    /// Search calls allowed per research phase; at most [`SEARCH_CALL_BUDGET`].
    pub search_budget: usize,
    /// Concurrent summary workers; at most [`MAX_SUMMARY_WORKERS`].
    pub max_summary_workers: usize,
    /// Key excerpts kept per summarized document.
    pub max_key_excerpts: usize,
    /// Ceiling on model turns in the research loop.
    pub max_iterations: usize,
}

impl Default for ResearchConfig {
    fn default() -> Self {
        Self {
            search_budget: SEARCH_CALL_BUDGET,
            max_summary_workers: MAX_SUMMARY_WORKERS,
            max_key_excerpts: crate::outputs::MAX_KEY_EXCERPTS,
            max_iterations: DEFAULT_MAX_ITERATIONS,
        }
    }
}

impl SleuthConfig {
    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.llm.provider != "openai" {
            return Err(invalid(format!(
                "unsupported llm provider '{}'",
                self.llm.provider
            )));
        }
        if self.llm.model.trim().is_empty() {
            return Err(ConfigError::MissingField {
                field: "llm.model".into(),
            });
        }
        if self.llm.summary_model.trim().is_empty() {
            return Err(ConfigError::MissingField {
                field: "llm.summary_model".into(),
            });
        }
        if let Some(t) = self.llm.temperature
            && !(0.0..=2.0).contains(&t)
        {
            return Err(invalid(format!("llm.temperature {t} is outside 0.0..=2.0")));
        }
        if self.search.provider != "exa" {
            return Err(invalid(format!(
                "unsupported search provider '{}'",
                self.search.provider
            )));
        }
        if self.search.num_results == 0 {
            return Err(invalid("search.num_results must be at least 1"));
        }
        url::Url::parse(&self.search.endpoint)
            .map_err(|e| invalid(format!("search.endpoint is not a valid URL: {e}")))?;
        if let Some(base) = &self.llm.base_url {
            url::Url::parse(base)
                .map_err(|e| invalid(format!("llm.base_url is not a valid URL: {e}")))?;
        }
        check_range("research.search_budget", self.research.search_budget, SEARCH_CALL_BUDGET)?;
        check_range(
            "research.max_summary_workers",
            self.research.max_summary_workers,
            MAX_SUMMARY_WORKERS,
        )?;
        check_range(
            "research.max_key_excerpts",
            self.research.max_key_excerpts,
            crate::outputs::MAX_KEY_EXCERPTS,
        )?;
        if self.research.max_iterations == 0 {
            return Err(invalid("research.max_iterations must be at least 1"));
        }
        Ok(())
    }
}

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        message: message.into(),
    }
}

fn check_range(field: &str, value: usize, max: usize) -> Result<(), ConfigError> {
    if value == 0 || value > max {
        return Err(invalid(format!("{field} must be between 1 and {max}, got {value}")));
    }
    Ok(())
}

/// Read the API key named by `env_var`.
pub fn api_key(env_var: &str) -> Result<String, ConfigError> {
    match std::env::var(env_var) {
        Ok(key) if !key.trim().is_empty() => Ok(key),
        _ => Err(ConfigError::EnvVarMissing {
            var: env_var.to_string(),
        }),
    }
}

/// Load configuration from all layers.
pub fn load_config(
    workspace: Option<&Path>,
    overrides: Option<&SleuthConfig>,
) -> Result<SleuthConfig, ConfigError> {
    let mut figment = Figment::from(Serialized::defaults(SleuthConfig::default()));

    // User-level config
    if let Some(dirs) = directories::ProjectDirs::from("dev", "sleuth", "sleuth") {
        let user_config = dirs.config_dir().join("config.toml");
        if user_config.exists() {
            figment = figment.merge(Toml::file(&user_config));
        }
    }

    // Workspace-level config
    if let Some(ws) = workspace {
        let ws_config = ws.join(".sleuth").join("config.toml");
        if ws_config.exists() {
            figment = figment.merge(Toml::file(&ws_config));
        }
    }

    // Environment variables (SLEUTH_LLM__MODEL, SLEUTH_SEARCH__NUM_RESULTS, etc.)
    figment = figment.merge(Env::prefixed("SLEUTH_").split("__"));

    if let Some(overrides) = overrides {
        figment = figment.merge(Serialized::defaults(overrides));
    }

    figment.extract().map_err(|e| ConfigError::ParseError {
        message: e.to_string(),
    })
}

/// Load an explicit config file on top of the defaults.
pub fn load_config_file(path: &Path) -> Result<SleuthConfig, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::FileNotFound {
            path: path.to_path_buf(),
        });
    }
    Figment::from(Serialized::defaults(SleuthConfig::default()))
        .merge(Toml::file(path))
        .extract()
        .map_err(|e| ConfigError::ParseError {
            message: e.to_string(),
        })
}
