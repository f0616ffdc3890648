//! The research tool-call loop.
//!
//! One iteration sends the research ledger to the model with the research
//! tools attached, appends the model turn, then runs the requested tools one
//! after another and appends a tool frame for each. Searches are counted
//! against a fixed budget; once it is spent, further searches are refused
//! and the loop stops.

use super::session::SessionCallback;
use super::state::ResearchState;
use super::summarizer::ResearchSummarizer;
use crate::brain::{Brain, LlmProvider};
use crate::config::{DEFAULT_MAX_ITERATIONS, SEARCH_CALL_BUDGET};
use crate::error::{SessionError, SleuthError, ToolError};
use crate::ledger::Ledger;
use crate::prompts::PromptLibrary;
use crate::search::SearchService;
use crate::tools::{
    REFLECTION_TOOL, ResearchTool, SEARCH_TOOL, ToolInvocation, reflection_ack,
    research_tool_definitions,
};
use crate::types::{Message, ToolDefinition};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Why the loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The model answered without requesting a tool.
    ModelFinished,
    /// Every allowed search has been used.
    BudgetExhausted,
    /// The ceiling on model turns was reached.
    IterationLimit,
}

/// What the caller should do after an iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Continuation {
    Continue,
    Stop(StopReason),
}

impl Continuation {
    pub fn should_continue(&self) -> bool {
        matches!(self, Continuation::Continue)
    }
}

/// Tool frame text for a search refused because the budget is spent.
pub fn budget_exhausted_notice(budget: usize) -> String {
    format!(
        "Search budget exhausted: all {budget} searches have been used, so this search was \
         not run. Answer with the evidence already gathered."
    )
}

/// Tool frame text for a search that returned nothing.
pub fn no_results_notice(query: &str) -> String {
    format!("No results found for \"{query}\".")
}

/// Drives the research phase one model turn at a time.
pub struct ToolCallLoop {
    brain: Brain,
    search: Arc<dyn SearchService>,
    summarizer: ResearchSummarizer,
    prompts: Arc<PromptLibrary>,
    tools: Vec<ToolDefinition>,
    budget: usize,
    num_results: usize,
    max_iterations: usize,
    iteration: usize,
}

impl ToolCallLoop {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        search: Arc<dyn SearchService>,
        summarizer: ResearchSummarizer,
        prompts: Arc<PromptLibrary>,
    ) -> Self {
        Self {
            brain: Brain::new(provider),
            search,
            summarizer,
            prompts,
            tools: research_tool_definitions(),
            budget: SEARCH_CALL_BUDGET,
            num_results: 10,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            iteration: 0,
        }
    }

    /// Lower the search budget. Values are clamped to `1..=SEARCH_CALL_BUDGET`.
    pub fn with_budget(mut self, budget: usize) -> Self {
        self.budget = budget.clamp(1, SEARCH_CALL_BUDGET);
        self
    }

    pub fn with_num_results(mut self, num_results: usize) -> Self {
        self.num_results = num_results.max(1);
        self
    }

    /// Stop after this many model turns even if searches remain.
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations.max(1);
        self
    }

    pub fn budget(&self) -> usize {
        self.budget
    }

    pub fn iteration(&self) -> usize {
        self.iteration
    }

    pub fn brain(&self) -> &Brain {
        &self.brain
    }

    /// Run one model turn and the tools it asks for.
    pub async fn run_iteration(
        &mut self,
        state: &mut ResearchState,
        ledger: &mut Ledger,
        callback: &dyn SessionCallback,
        cancel: &CancellationToken,
    ) -> Result<Continuation, SleuthError> {
        if cancel.is_cancelled() {
            return Err(SessionError::Cancelled.into());
        }
        self.iteration += 1;
        debug!(
            iteration = self.iteration,
            search_calls = state.search_calls(),
            "Research iteration"
        );

        let system = self.prompts.research_system(self.budget)?;
        let response = self
            .brain
            .think(&system, ledger.messages(), self.tools.clone(), cancel)
            .await?;

        let message = response.message;
        let decoded: Result<Vec<ToolInvocation>, ToolError> = message
            .tool_calls()
            .iter()
            .map(ToolInvocation::from_call)
            .collect();
        let text = message.text();
        ledger.append(message);
        let invocations = decoded?;

        if invocations.is_empty() {
            info!(
                iteration = self.iteration,
                search_calls = state.search_calls(),
                "Model finished research"
            );
            if !text.is_empty() {
                callback.on_research_note(&text).await;
            }
            return Ok(Continuation::Stop(StopReason::ModelFinished));
        }

        for invocation in invocations {
            match invocation.tool {
                ResearchTool::Search(args) => {
                    let output = self
                        .run_search(&args.query, state, callback, cancel)
                        .await?;
                    let refused = output.is_none();
                    let text = output.unwrap_or_else(|| budget_exhausted_notice(self.budget));
                    ledger.append(Message::tool_result(
                        invocation.id,
                        SEARCH_TOOL,
                        text,
                        refused,
                    ));
                }
                ResearchTool::Reflect(args) => {
                    debug!(tool = REFLECTION_TOOL, "Reflection recorded");
                    callback.on_reflection(&args.reflection).await;
                    ledger.append(Message::tool_result(
                        invocation.id,
                        REFLECTION_TOOL,
                        reflection_ack(&args.reflection),
                        false,
                    ));
                }
            }
        }

        if state.budget_exhausted(self.budget) {
            info!(
                iteration = self.iteration,
                search_calls = state.search_calls(),
                "Search budget exhausted"
            );
            Ok(Continuation::Stop(StopReason::BudgetExhausted))
        } else if self.iteration >= self.max_iterations {
            warn!(
                iteration = self.iteration,
                search_calls = state.search_calls(),
                "Iteration limit reached"
            );
            Ok(Continuation::Stop(StopReason::IterationLimit))
        } else {
            Ok(Continuation::Continue)
        }
    }

    /// Run one search and summarize its results. `None` means the budget
    /// refused it and nothing ran.
    async fn run_search(
        &self,
        query: &str,
        state: &mut ResearchState,
        callback: &dyn SessionCallback,
        cancel: &CancellationToken,
    ) -> Result<Option<String>, ToolError> {
        if !state.record_search_call(self.budget) {
            warn!(
                tool = SEARCH_TOOL,
                query,
                budget = self.budget,
                "Search refused, budget exhausted"
            );
            return Ok(None);
        }
        let call_number = state.search_calls();
        info!(
            tool = SEARCH_TOOL,
            query,
            search_calls = call_number,
            backend = self.search.name(),
            "Searching"
        );
        callback.on_search(query, call_number, self.budget).await;

        let documents = self
            .search
            .search(query, self.num_results, cancel)
            .await
            .map_err(|source| ToolError::Search {
                name: SEARCH_TOOL.to_string(),
                source,
            })?;

        if documents.is_empty() {
            debug!(query, "Search returned no documents");
            return Ok(Some(no_results_notice(query)));
        }

        let summaries = self
            .summarizer
            .summarize(documents, state.notes_mut(), cancel)
            .await
            .map_err(|source| ToolError::Summarization {
                name: SEARCH_TOOL.to_string(),
                source,
            })?;
        Ok(Some(summaries))
    }
}
