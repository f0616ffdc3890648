//! Concurrent summarization of search results.
//!
//! A batch of raw documents is loaded into a shared job queue and drained by
//! a small pool of workers. Each worker emits an index-tagged result; the
//! orchestrator reads exactly one result per job and reorders by index, so
//! the notes come out in the order the documents went in no matter which
//! worker finished first. A batch either lands in the notes whole or not at
//! all.

use super::state::CompressedNotes;
use crate::cancel::run_cancellable;
use crate::config::MAX_SUMMARY_WORKERS;
use crate::error::{LlmError, SummarizeError};
use crate::outputs::{DocumentSummary, MAX_KEY_EXCERPTS};
use crate::prompts::PromptLibrary;
use crate::structured::{StructuredLlm, extract};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug)]
struct SummaryJob {
    index: usize,
    raw: String,
}

#[derive(Debug)]
struct SummaryResult {
    index: usize,
    outcome: Result<String, SummarizeError>,
}

type JobQueue = Arc<Mutex<VecDeque<SummaryJob>>>;

/// Maps raw documents to rendered summaries with a bounded worker pool.
pub struct ResearchSummarizer {
    llm: Arc<dyn StructuredLlm>,
    prompts: Arc<PromptLibrary>,
    max_workers: usize,
    max_excerpts: usize,
}

impl ResearchSummarizer {
    pub fn new(llm: Arc<dyn StructuredLlm>, prompts: Arc<PromptLibrary>) -> Self {
        Self {
            llm,
            prompts,
            max_workers: MAX_SUMMARY_WORKERS,
            max_excerpts: MAX_KEY_EXCERPTS,
        }
    }

    /// Lower the worker ceiling. Values are clamped to `1..=MAX_SUMMARY_WORKERS`.
    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers.clamp(1, MAX_SUMMARY_WORKERS);
        self
    }

    pub fn with_max_excerpts(mut self, max_excerpts: usize) -> Self {
        self.max_excerpts = max_excerpts.min(MAX_KEY_EXCERPTS);
        self
    }

    /// Workers spawned for a batch of `jobs` documents.
    pub fn worker_count(&self, jobs: usize) -> usize {
        jobs.min(self.max_workers)
    }

    /// Summarize `documents` and append the rendered summaries to `notes`.
    ///
    /// Returns the summaries joined with newlines, in document order. On any
    /// failure every job is still drained before the first error (in arrival
    /// order) is returned, and `notes` is left untouched.
    pub async fn summarize(
        &self,
        documents: Vec<String>,
        notes: &mut CompressedNotes,
        cancel: &CancellationToken,
    ) -> Result<String, SummarizeError> {
        let total = documents.len();
        if total == 0 {
            return Err(SummarizeError::EmptyBatch);
        }
        if cancel.is_cancelled() {
            return Err(SummarizeError::Cancelled);
        }

        let workers = self.worker_count(total);
        info!(jobs = total, workers, "Summarizing search results");

        let queue: JobQueue = Arc::new(Mutex::new(
            documents
                .into_iter()
                .enumerate()
                .map(|(index, raw)| SummaryJob { index, raw })
                .collect(),
        ));
        let (tx, mut rx) = mpsc::channel::<SummaryResult>(total);

        let mut pool = JoinSet::new();
        for worker in 0..workers {
            let queue = Arc::clone(&queue);
            let tx = tx.clone();
            let llm = Arc::clone(&self.llm);
            let prompts = Arc::clone(&self.prompts);
            let cancel = cancel.clone();
            let max_excerpts = self.max_excerpts;
            pool.spawn(async move {
                while let Some(job) = next_job(&queue) {
                    debug!(worker, job = job.index, "Summarizing document");
                    let outcome =
                        summarize_one(llm.as_ref(), &prompts, &job, max_excerpts, &cancel).await;
                    let result = SummaryResult {
                        index: job.index,
                        outcome,
                    };
                    if tx.send(result).await.is_err() {
                        break;
                    }
                }
            });
        }
        drop(tx);

        let mut slots: Vec<Option<String>> = vec![None; total];
        let mut first_error: Option<SummarizeError> = None;
        let mut received = 0;
        while received < total {
            let Some(result) = rx.recv().await else {
                break;
            };
            received += 1;
            match result.outcome {
                Ok(summary) => slots[result.index] = Some(summary),
                Err(e) => {
                    warn!(job = result.index, error = %e, "Document summary failed");
                    first_error.get_or_insert(e);
                }
            }
        }

        while let Some(joined) = pool.join_next().await {
            if let Err(e) = joined
                && e.is_panic()
            {
                first_error.get_or_insert(SummarizeError::WorkerPanicked {
                    message: e.to_string(),
                });
            }
        }

        if cancel.is_cancelled() {
            return Err(SummarizeError::Cancelled);
        }
        if let Some(e) = first_error {
            return Err(e);
        }
        let ordered: Vec<String> = slots
            .into_iter()
            .collect::<Option<Vec<_>>>()
            .ok_or(SummarizeError::Incomplete {
                expected: total,
                received,
            })?;

        let joined = ordered.join("\n");
        notes.extend(ordered);
        debug!(notes = notes.len(), "Batch appended to notes");
        Ok(joined)
    }
}

fn next_job(queue: &JobQueue) -> Option<SummaryJob> {
    queue
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .pop_front()
}

async fn summarize_one(
    llm: &dyn StructuredLlm,
    prompts: &PromptLibrary,
    job: &SummaryJob,
    max_excerpts: usize,
    cancel: &CancellationToken,
) -> Result<String, SummarizeError> {
    let prompt = prompts.summarize(&job.raw, max_excerpts)?;
    let summary: DocumentSummary = run_cancellable(
        cancel,
        extract::<DocumentSummary>(llm, &prompt, cancel),
        || LlmError::Cancelled,
    )
    .await
    .map_err(|source| SummarizeError::Job {
        index: job.index,
        source,
    })?;
    Ok(summary.render(max_excerpts))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::structured::MockStructuredLlm;
    use serde_json::json;

    fn summarizer(llm: MockStructuredLlm) -> ResearchSummarizer {
        ResearchSummarizer::new(Arc::new(llm), Arc::new(PromptLibrary::new().unwrap()))
    }

    #[test]
    fn test_worker_count() {
        let s = summarizer(MockStructuredLlm::new());
        assert_eq!(s.worker_count(12), 5);
        assert_eq!(s.worker_count(3), 3);
        assert_eq!(s.worker_count(1), 1);

        let s = summarizer(MockStructuredLlm::new()).with_max_workers(9);
        assert_eq!(s.worker_count(12), 5);
        let s = summarizer(MockStructuredLlm::new()).with_max_workers(2);
        assert_eq!(s.worker_count(12), 2);
    }

    #[tokio::test]
    async fn test_empty_batch_is_an_error() {
        let s = summarizer(MockStructuredLlm::new());
        let mut notes = CompressedNotes::new();
        let err = s
            .summarize(Vec::new(), &mut notes, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SummarizeError::EmptyBatch));
    }

    #[tokio::test]
    async fn test_single_document() {
        let llm = MockStructuredLlm::new();
        llm.queue_value(json!({"summary": "only", "key_excerpts": ["q"]}));
        let s = summarizer(llm);
        let mut notes = CompressedNotes::new();

        let joined = s
            .summarize(vec!["page".into()], &mut notes, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(
            joined,
            "<summary>\nonly\n</summary>\n<key_excerpts>\n- q\n</key_excerpts>"
        );
        assert_eq!(notes.as_slice(), &[joined]);
    }

    #[tokio::test]
    async fn test_invalid_reply_fails_the_batch() {
        let llm = MockStructuredLlm::new();
        llm.queue_value(json!({"wrong": true}));
        let s = summarizer(llm);
        let mut notes = CompressedNotes::new();

        let err = s
            .summarize(vec!["page".into()], &mut notes, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SummarizeError::Job { index: 0, .. }));
        assert!(notes.is_empty());
    }
}
