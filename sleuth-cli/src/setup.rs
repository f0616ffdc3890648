//! Capability wiring: API keys, completion provider, structured clients and
//! the search backend.

use sleuth_core::brain::LlmProvider;
use sleuth_core::config::{LlmConfig, api_key};
use sleuth_core::providers::create_provider;
use sleuth_core::research::Capabilities;
use sleuth_core::{InstructorClient, SleuthConfig, SleuthError};
use sleuth_tools::create_search_service;
use std::sync::Arc;
use tracing::info;

/// Build every capability a session needs. A missing API key is fatal.
pub(crate) fn build_capabilities(config: &SleuthConfig) -> Result<Capabilities, SleuthError> {
    let llm_key = api_key(&config.llm.api_key_env)?;
    let search_key = api_key(&config.search.api_key_env)?;

    let completion = create_provider(&config.llm, llm_key)?;
    let structured = structured_client(&completion, &config.llm, None);
    let summary = structured_client(&completion, &config.llm, Some(&config.llm.summary_model));
    let search = create_search_service(&config.search, search_key)?;

    info!(
        model = %config.llm.model,
        summary_model = %config.llm.summary_model,
        search = search.name(),
        "Capabilities ready"
    );
    Ok(Capabilities {
        completion,
        structured: Arc::new(structured),
        summary: Arc::new(summary),
        search,
    })
}

fn structured_client(
    provider: &Arc<dyn LlmProvider>,
    config: &LlmConfig,
    model: Option<&str>,
) -> InstructorClient {
    let mut client =
        InstructorClient::new(Arc::clone(provider)).with_max_retries(config.structured_max_retries);
    if let Some(model) = model {
        client = client.with_model(model);
    }
    if let Some(temperature) = config.temperature {
        client = client.with_temperature(temperature);
    }
    client
}
