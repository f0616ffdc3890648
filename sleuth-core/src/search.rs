//! Web search capability.
//!
//! A [`SearchService`] turns a query into an ordered list of document texts.
//! Concrete backends live in `sleuth-tools`; [`MockSearch`] replays canned
//! result lists for tests.

use crate::error::SearchError;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// Abstract search backend.
#[async_trait]
pub trait SearchService: Send + Sync {
    /// Run `query` and return up to `num_results` document texts, best first.
    async fn search(
        &self,
        query: &str,
        num_results: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>, SearchError>;

    /// Backend name, for logs.
    fn name(&self) -> &str;
}

/// Canned search backend.
///
/// Each call pops the next queued result list; once the queue is empty every
/// call returns `fallback`.
pub struct MockSearch {
    results: Mutex<VecDeque<Result<Vec<String>, SearchError>>>,
    fallback: Vec<String>,
    queries: Mutex<Vec<(String, usize)>>,
}

impl MockSearch {
    pub fn new() -> Self {
        Self {
            results: Mutex::new(VecDeque::new()),
            fallback: Vec::new(),
            queries: Mutex::new(Vec::new()),
        }
    }

    /// Answer every unqueued call with `documents`.
    pub fn with_fallback(mut self, documents: Vec<String>) -> Self {
        self.fallback = documents;
        self
    }

    pub fn queue_results(&self, documents: Vec<String>) {
        lock(&self.results).push_back(Ok(documents));
    }

    pub fn queue_error(&self, error: SearchError) {
        lock(&self.results).push_back(Err(error));
    }

    /// `(query, num_results)` pairs received so far.
    pub fn queries(&self) -> Vec<(String, usize)> {
        lock(&self.queries).clone()
    }

    pub fn call_count(&self) -> usize {
        lock(&self.queries).len()
    }
}

impl Default for MockSearch {
    fn default() -> Self {
        Self::new()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl SearchService for MockSearch {
    async fn search(
        &self,
        query: &str,
        num_results: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>, SearchError> {
        if cancel.is_cancelled() {
            return Err(SearchError::Cancelled);
        }
        lock(&self.queries).push((query.to_string(), num_results));
        lock(&self.results)
            .pop_front()
            .unwrap_or_else(|| Ok(self.fallback.clone()))
    }

    fn name(&self) -> &str {
        "mock"
    }
}
