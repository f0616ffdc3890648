//! # Sleuth Tools
//!
//! Concrete search backends for the Sleuth research engine.

pub mod web;

use sleuth_core::config::SearchConfig;
use sleuth_core::error::SearchError;
use sleuth_core::search::SearchService;
use std::sync::Arc;

/// Build the search backend named by `config.provider`.
pub fn create_search_service(
    config: &SearchConfig,
    api_key: String,
) -> Result<Arc<dyn SearchService>, SearchError> {
    match config.provider.as_str() {
        "exa" => Ok(Arc::new(web::ExaSearch::new(config, api_key)?)),
        other => Err(SearchError::Request {
            message: format!("Unsupported search provider: {other}"),
        }),
    }
}
