//! Exa neural web search.
//!
//! One POST per query; each result's page text comes back inline, so no
//! second fetch is needed before summarization.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use sleuth_core::cancel::run_cancellable;
use sleuth_core::config::SearchConfig;
use sleuth_core::error::SearchError;
use sleuth_core::search::SearchService;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ExaSearchRequest<'a> {
    query: &'a str,
    #[serde(rename = "type")]
    search_type: &'static str,
    num_results: usize,
    contents: ExaContents,
}

#[derive(Debug, Serialize)]
struct ExaContents {
    text: bool,
}

#[derive(Debug, Deserialize)]
struct ExaSearchResponse {
    #[serde(default)]
    results: Vec<ExaResult>,
}

#[derive(Debug, Deserialize)]
struct ExaResult {
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    text: Option<String>,
}

/// Search backend for the Exa `/search` endpoint.
pub struct ExaSearch {
    client: Client,
    endpoint: String,
    api_key: String,
    timeout_secs: u64,
}

impl ExaSearch {
    pub fn new(config: &SearchConfig, api_key: String) -> Result<Self, SearchError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("sleuth/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| SearchError::Request {
                message: format!("Failed to build HTTP client: {e}"),
            })?;
        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            api_key,
            timeout_secs: config.timeout_secs,
        })
    }

    fn request_body(query: &str, num_results: usize) -> ExaSearchRequest<'_> {
        ExaSearchRequest {
            query,
            search_type: "auto",
            num_results,
            contents: ExaContents { text: true },
        }
    }

    /// Page texts in result order. Results without text are dropped.
    fn parse_response(body: &str) -> Result<Vec<String>, SearchError> {
        let response: ExaSearchResponse =
            serde_json::from_str(body).map_err(|e| SearchError::ResponseParse {
                message: format!("Invalid JSON: {e}"),
            })?;

        let mut texts = Vec::with_capacity(response.results.len());
        for result in response.results {
            match result.text {
                Some(text) if !text.trim().is_empty() => texts.push(text),
                _ => debug!(url = ?result.url, "Dropping search result without text"),
            }
        }
        Ok(texts)
    }

    fn map_transport_error(&self, e: reqwest::Error) -> SearchError {
        if e.is_timeout() {
            SearchError::Request {
                message: format!("timed out after {}s", self.timeout_secs),
            }
        } else {
            SearchError::Request {
                message: e.to_string(),
            }
        }
    }

    async fn send(&self, query: &str, num_results: usize) -> Result<Vec<String>, SearchError> {
        let response = self
            .client
            .post(&self.endpoint)
            .header("x-api-key", &self.api_key)
            .json(&Self::request_body(query, num_results))
            .send()
            .await
            .map_err(|e| self.map_transport_error(e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| self.map_transport_error(e))?;

        if !status.is_success() {
            return Err(SearchError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Self::parse_response(&body)
    }
}

#[async_trait]
impl SearchService for ExaSearch {
    async fn search(
        &self,
        query: &str,
        num_results: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>, SearchError> {
        debug!(query, num_results, "Sending Exa search");
        let texts = run_cancellable(cancel, self.send(query, num_results), || {
            SearchError::Cancelled
        })
        .await?;
        info!(query, results = texts.len(), "Exa search complete");
        Ok(texts)
    }

    fn name(&self) -> &str {
        "exa"
    }
}
