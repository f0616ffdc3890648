//! Research session: the Clarify -> Brief -> Research -> Report sequence.
//!
//! A session owns both ledgers and the research state. Phases run strictly
//! in order; calling a phase out of order is a [`SessionError`]. Any
//! capability error ends the session.

use super::state::ResearchState;
use super::summarizer::ResearchSummarizer;
use super::tool_loop::{Continuation, StopReason, ToolCallLoop};
use crate::brain::LlmProvider;
use crate::cancel::run_cancellable;
use crate::config::SleuthConfig;
use crate::error::{LlmError, SessionError, SleuthError};
use crate::ledger::{Ledger, LedgerScope};
use crate::outputs::{ClarifyDecision, ResearchBrief, ResearchReport};
use crate::prompts::PromptLibrary;
use crate::search::SearchService;
use crate::structured::{StructuredLlm, StructuredOutput, extract};
use crate::types::{Message, TokenUsage};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

/// Phase of a research session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    /// Waiting for the user to make the request clear.
    AwaitingClarification,
    /// Request is clear; the brief is next.
    Clarified,
    /// Brief written; the tool-call loop is running.
    Researching,
    /// Report written. Terminal.
    ReportReady,
}

impl std::fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionPhase::AwaitingClarification => write!(f, "awaiting_clarification"),
            SessionPhase::Clarified => write!(f, "clarified"),
            SessionPhase::Researching => write!(f, "researching"),
            SessionPhase::ReportReady => write!(f, "report_ready"),
        }
    }
}

impl SessionPhase {
    fn can_transition_to(self, next: SessionPhase) -> bool {
        matches!(
            (self, next),
            (SessionPhase::AwaitingClarification, SessionPhase::Clarified)
                | (SessionPhase::Clarified, SessionPhase::Researching)
                | (SessionPhase::Researching, SessionPhase::ReportReady)
        )
    }
}

/// Result of one clarify turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClarifyOutcome {
    /// The model asked a follow-up question.
    NeedsClarification(String),
    /// The request is clear; carries the verification message.
    Sufficient(String),
}

/// How a full session run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    Report(String),
    /// Input ended during clarification; nothing was researched.
    InputClosed,
}

/// Source of user lines during clarification.
#[async_trait]
pub trait UserInput: Send {
    /// The next line typed by the user, or `None` at end of input.
    async fn next_line(&mut self) -> Option<String>;
}

/// Scripted input for tests and non-interactive runs.
pub struct ScriptedInput {
    lines: std::collections::VecDeque<String>,
}

impl ScriptedInput {
    pub fn new<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            lines: lines.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl UserInput for ScriptedInput {
    async fn next_line(&mut self) -> Option<String> {
        self.lines.pop_front()
    }
}

/// Observer for user-visible session events.
#[async_trait]
pub trait SessionCallback: Send + Sync {
    /// A clarifying question or verification message for the user.
    async fn on_assistant_message(&self, message: &str);

    async fn on_phase_change(&self, _phase: SessionPhase) {}

    /// A search is about to run.
    async fn on_search(&self, _query: &str, _call_number: usize, _budget: usize) {}

    async fn on_reflection(&self, _reflection: &str) {}

    /// Free text the model sent with its final research turn.
    async fn on_research_note(&self, _text: &str) {}
}

/// Callback that ignores every event.
pub struct NoOpCallback;

#[async_trait]
impl SessionCallback for NoOpCallback {
    async fn on_assistant_message(&self, _message: &str) {}
}

/// Callback that records events, for tests.
#[derive(Default)]
pub struct RecordingCallback {
    messages: tokio::sync::Mutex<Vec<String>>,
    phases: tokio::sync::Mutex<Vec<SessionPhase>>,
    searches: tokio::sync::Mutex<Vec<String>>,
    reflections: tokio::sync::Mutex<Vec<String>>,
}

impl RecordingCallback {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn messages(&self) -> Vec<String> {
        self.messages.lock().await.clone()
    }

    pub async fn phases(&self) -> Vec<SessionPhase> {
        self.phases.lock().await.clone()
    }

    pub async fn searches(&self) -> Vec<String> {
        self.searches.lock().await.clone()
    }

    pub async fn reflections(&self) -> Vec<String> {
        self.reflections.lock().await.clone()
    }
}

#[async_trait]
impl SessionCallback for RecordingCallback {
    async fn on_assistant_message(&self, message: &str) {
        self.messages.lock().await.push(message.to_string());
    }

    async fn on_phase_change(&self, phase: SessionPhase) {
        self.phases.lock().await.push(phase);
    }

    async fn on_search(&self, query: &str, _call_number: usize, _budget: usize) {
        self.searches.lock().await.push(query.to_string());
    }

    async fn on_reflection(&self, reflection: &str) {
        self.reflections.lock().await.push(reflection.to_string());
    }
}

/// The external services a session needs, built once at startup.
#[derive(Clone)]
pub struct Capabilities {
    /// Tool-calling completions for the research loop.
    pub completion: Arc<dyn LlmProvider>,
    /// Structured completions for clarify, brief and report.
    pub structured: Arc<dyn StructuredLlm>,
    /// Structured completions for per-document summaries.
    pub summary: Arc<dyn StructuredLlm>,
    pub search: Arc<dyn SearchService>,
}

/// Limits for one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSettings {
    pub search_budget: usize,
    pub num_results: usize,
    pub max_summary_workers: usize,
    pub max_key_excerpts: usize,
    /// Ceiling on model turns in the research loop.
    pub max_iterations: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self::from(&SleuthConfig::default())
    }
}

impl From<&SleuthConfig> for SessionSettings {
    fn from(config: &SleuthConfig) -> Self {
        Self {
            search_budget: config.research.search_budget,
            num_results: config.search.num_results,
            max_summary_workers: config.research.max_summary_workers,
            max_key_excerpts: config.research.max_key_excerpts,
            max_iterations: config.research.max_iterations,
        }
    }
}

/// One interactive research session.
pub struct ResearchSession {
    id: Uuid,
    phase: SessionPhase,
    structured: Arc<dyn StructuredLlm>,
    prompts: Arc<PromptLibrary>,
    tool_loop: ToolCallLoop,
    clarify_ledger: Ledger,
    research_ledger: Ledger,
    state: Option<ResearchState>,
    research_stop: Option<StopReason>,
    report: Option<String>,
    callback: Arc<dyn SessionCallback>,
    cancel: CancellationToken,
}

impl ResearchSession {
    pub fn new(
        capabilities: Capabilities,
        prompts: Arc<PromptLibrary>,
        settings: SessionSettings,
        callback: Arc<dyn SessionCallback>,
        cancel: CancellationToken,
    ) -> Self {
        let summarizer = ResearchSummarizer::new(capabilities.summary, Arc::clone(&prompts))
            .with_max_workers(settings.max_summary_workers)
            .with_max_excerpts(settings.max_key_excerpts);
        let tool_loop = ToolCallLoop::new(
            capabilities.completion,
            capabilities.search,
            summarizer,
            Arc::clone(&prompts),
        )
        .with_budget(settings.search_budget)
        .with_num_results(settings.num_results)
        .with_max_iterations(settings.max_iterations);

        let id = Uuid::new_v4();
        info!(session = %id, "Research session created");
        Self {
            id,
            phase: SessionPhase::AwaitingClarification,
            structured: capabilities.structured,
            prompts,
            tool_loop,
            clarify_ledger: Ledger::new(LedgerScope::Clarify),
            research_ledger: Ledger::new(LedgerScope::Research),
            state: None,
            research_stop: None,
            report: None,
            callback,
            cancel,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn clarify_ledger(&self) -> &Ledger {
        &self.clarify_ledger
    }

    pub fn research_ledger(&self) -> &Ledger {
        &self.research_ledger
    }

    /// Research state; present once the brief is written.
    pub fn state(&self) -> Option<&ResearchState> {
        self.state.as_ref()
    }

    pub fn report(&self) -> Option<&str> {
        self.report.as_deref()
    }

    /// Model turns taken by the research loop so far.
    pub fn research_iterations(&self) -> usize {
        self.tool_loop.iteration()
    }

    /// Tokens spent by the research loop's completion calls.
    pub fn research_usage(&self) -> &TokenUsage {
        self.tool_loop.brain().total_usage()
    }

    fn transition(&mut self, next: SessionPhase) -> Result<(), SessionError> {
        if !self.phase.can_transition_to(next) {
            return Err(self.invalid_transition(next));
        }
        info!(session = %self.id, from = %self.phase, to = %next, "Phase transition");
        self.phase = next;
        Ok(())
    }

    fn invalid_transition(&self, to: SessionPhase) -> SessionError {
        SessionError::InvalidStateTransition {
            from: self.phase.to_string(),
            to: to.to_string(),
        }
    }

    fn require(&self, phase: SessionPhase, next: SessionPhase) -> Result<(), SessionError> {
        if self.phase != phase {
            return Err(self.invalid_transition(next));
        }
        Ok(())
    }

    async fn ask<T: StructuredOutput>(&self, prompt: &str) -> Result<T, LlmError> {
        run_cancellable(
            &self.cancel,
            extract::<T>(self.structured.as_ref(), prompt, &self.cancel),
            || LlmError::Cancelled,
        )
        .await
    }

    /// Record one user turn and let the model decide whether it needs more.
    pub async fn submit_user_message(&mut self, text: &str) -> Result<ClarifyOutcome, SleuthError> {
        self.require(SessionPhase::AwaitingClarification, SessionPhase::Clarified)?;
        let text = text.trim();
        if text.is_empty() {
            return Err(SessionError::EmptyUserMessage.into());
        }
        self.clarify_ledger.append(Message::user(text));

        let prompt = self.prompts.clarify(&self.clarify_ledger)?;
        let decision: ClarifyDecision = self.ask(&prompt).await?;

        if decision.need_clarification {
            debug!(session = %self.id, "Clarification requested");
            self.clarify_ledger
                .append(Message::assistant(decision.question.clone()));
            self.callback.on_assistant_message(&decision.question).await;
            Ok(ClarifyOutcome::NeedsClarification(decision.question))
        } else {
            self.clarify_ledger
                .append(Message::assistant(decision.verification.clone()));
            self.callback
                .on_assistant_message(&decision.verification)
                .await;
            self.transition(SessionPhase::Clarified)?;
            self.callback.on_phase_change(self.phase).await;
            Ok(ClarifyOutcome::Sufficient(decision.verification))
        }
    }

    /// Turn the clarify conversation into the research brief and seed the
    /// research ledger with it.
    pub async fn write_brief(&mut self) -> Result<String, SleuthError> {
        self.require(SessionPhase::Clarified, SessionPhase::Researching)?;

        let prompt = self.prompts.brief(&self.clarify_ledger)?;
        let brief: ResearchBrief = self.ask(&prompt).await?;
        let brief = brief.research_brief;
        info!(session = %self.id, chars = brief.len(), "Research brief written");

        self.clarify_ledger.append(Message::assistant(brief.clone()));
        self.research_ledger.append(Message::user(brief.clone()));
        self.state = Some(ResearchState::new(brief.clone()));
        self.transition(SessionPhase::Researching)?;
        self.callback.on_phase_change(self.phase).await;
        Ok(brief)
    }

    /// Run the tool-call loop until it stops.
    pub async fn research(&mut self) -> Result<StopReason, SleuthError> {
        self.require(SessionPhase::Researching, SessionPhase::Researching)?;
        if let Some(reason) = self.research_stop {
            return Ok(reason);
        }
        let Some(state) = self.state.as_mut() else {
            return Err(self.invalid_transition(SessionPhase::Researching).into());
        };

        let reason = loop {
            let next = self
                .tool_loop
                .run_iteration(
                    state,
                    &mut self.research_ledger,
                    self.callback.as_ref(),
                    &self.cancel,
                )
                .await?;
            if let Continuation::Stop(reason) = next {
                break reason;
            }
        };

        info!(
            session = %self.id,
            ?reason,
            iterations = self.tool_loop.iteration(),
            search_calls = state.search_calls(),
            notes = state.notes().len(),
            completion_calls = self.tool_loop.brain().calls(),
            input_tokens = self.tool_loop.brain().total_usage().input_tokens,
            output_tokens = self.tool_loop.brain().total_usage().output_tokens,
            "Research finished"
        );
        self.research_stop = Some(reason);
        Ok(reason)
    }

    /// Write the report from the brief and the compressed notes.
    pub async fn write_report(&mut self) -> Result<String, SleuthError> {
        self.require(SessionPhase::Researching, SessionPhase::ReportReady)?;
        if self.research_stop.is_none() {
            return Err(self.invalid_transition(SessionPhase::ReportReady).into());
        }
        let Some(state) = self.state.as_ref() else {
            return Err(self.invalid_transition(SessionPhase::ReportReady).into());
        };

        let prompt = self
            .prompts
            .report(state.brief(), state.notes().as_slice())?;
        let report: ResearchReport = self.ask(&prompt).await?;
        info!(session = %self.id, chars = report.report.len(), "Report written");

        self.report = Some(report.report.clone());
        self.transition(SessionPhase::ReportReady)?;
        self.callback.on_phase_change(self.phase).await;
        Ok(report.report)
    }

    /// Drive the whole session from `input` to a report.
    ///
    /// Blank lines are skipped. End of input during clarification ends the
    /// session with [`SessionOutcome::InputClosed`].
    pub async fn run(&mut self, input: &mut dyn UserInput) -> Result<SessionOutcome, SleuthError> {
        while self.phase == SessionPhase::AwaitingClarification {
            let line = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(SessionError::Cancelled.into()),
                line = input.next_line() => line,
            };
            let Some(line) = line else {
                info!(session = %self.id, "Input closed during clarification");
                return Ok(SessionOutcome::InputClosed);
            };
            if line.trim().is_empty() {
                continue;
            }
            self.submit_user_message(&line).await?;
        }

        self.write_brief().await?;
        self.research().await?;
        let report = self.write_report().await?;
        Ok(SessionOutcome::Report(report))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::brain::MockLlmProvider;
    use crate::search::MockSearch;
    use crate::structured::MockStructuredLlm;
    use serde_json::json;

    fn session_with(structured: MockStructuredLlm) -> ResearchSession {
        let capabilities = Capabilities {
            completion: Arc::new(MockLlmProvider::new()),
            structured: Arc::new(structured),
            summary: Arc::new(MockStructuredLlm::new()),
            search: Arc::new(MockSearch::new()),
        };
        ResearchSession::new(
            capabilities,
            Arc::new(PromptLibrary::new().unwrap()),
            SessionSettings::default(),
            Arc::new(NoOpCallback),
            CancellationToken::new(),
        )
    }

    #[test]
    fn test_phase_transitions() {
        use SessionPhase::*;
        assert!(AwaitingClarification.can_transition_to(Clarified));
        assert!(Clarified.can_transition_to(Researching));
        assert!(Researching.can_transition_to(ReportReady));
        assert!(!AwaitingClarification.can_transition_to(Researching));
        assert!(!ReportReady.can_transition_to(AwaitingClarification));
        assert_eq!(ReportReady.to_string(), "report_ready");
    }

    #[tokio::test]
    async fn test_empty_user_message_rejected() {
        let mut session = session_with(MockStructuredLlm::new());
        let err = session.submit_user_message("   ").await.unwrap_err();
        assert!(matches!(
            err,
            SleuthError::Session(SessionError::EmptyUserMessage)
        ));
        assert!(session.clarify_ledger().is_empty());
    }

    #[tokio::test]
    async fn test_needs_clarification_stays_in_phase() {
        let structured = MockStructuredLlm::new();
        structured.queue_value(json!({
            "need_clarification": true,
            "question": "Which region?",
            "verification": ""
        }));
        let mut session = session_with(structured);

        let outcome = session.submit_user_message("EV sales").await.unwrap();
        assert_eq!(
            outcome,
            ClarifyOutcome::NeedsClarification("Which region?".into())
        );
        assert_eq!(session.phase(), SessionPhase::AwaitingClarification);
        assert_eq!(session.clarify_ledger().len(), 2);
    }

    #[tokio::test]
    async fn test_out_of_order_phases_are_rejected() {
        let mut session = session_with(MockStructuredLlm::new());
        let err = session.write_brief().await.unwrap_err();
        assert!(matches!(
            err,
            SleuthError::Session(SessionError::InvalidStateTransition { .. })
        ));
        assert!(session.research().await.is_err());
        assert!(session.write_report().await.is_err());
    }

    #[tokio::test]
    async fn test_report_requires_finished_research() {
        let structured = MockStructuredLlm::new();
        structured.queue_value(json!({
            "need_clarification": false,
            "question": "",
            "verification": "ok"
        }));
        structured.queue_value(json!({"research_brief": "brief"}));
        let mut session = session_with(structured);
        session.submit_user_message("topic").await.unwrap();
        session.write_brief().await.unwrap();

        let err = session.write_report().await.unwrap_err();
        assert!(matches!(
            err,
            SleuthError::Session(SessionError::InvalidStateTransition { .. })
        ));
    }

    #[tokio::test]
    async fn test_cancel_while_waiting_for_input() {
        struct Never;
        #[async_trait]
        impl UserInput for Never {
            async fn next_line(&mut self) -> Option<String> {
                std::future::pending().await
            }
        }

        let cancel = CancellationToken::new();
        let capabilities = Capabilities {
            completion: Arc::new(MockLlmProvider::new()),
            structured: Arc::new(MockStructuredLlm::new()),
            summary: Arc::new(MockStructuredLlm::new()),
            search: Arc::new(MockSearch::new()),
        };
        let mut session = ResearchSession::new(
            capabilities,
            Arc::new(PromptLibrary::new().unwrap()),
            SessionSettings::default(),
            Arc::new(NoOpCallback),
            cancel.clone(),
        );
        cancel.cancel();
        let err = session.run(&mut Never).await.unwrap_err();
        assert!(err.is_cancelled());
    }
}
