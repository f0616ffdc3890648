//! Integration tests for a full research session.
//!
//! These drive Clarify -> Brief -> Research -> Report end to end with
//! MockLlmProvider for the research loop, MockStructuredLlm for structured
//! steps and MockSearch for evidence.

use serde_json::json;
use sleuth_core::brain::MockLlmProvider;
use sleuth_core::error::{SearchError, SleuthError, ToolError};
use sleuth_core::prompts::PromptLibrary;
use sleuth_core::research::tool_loop::budget_exhausted_notice;
use sleuth_core::research::{
    Capabilities, ClarifyOutcome, RecordingCallback, ResearchSession, ScriptedInput,
    SessionOutcome, SessionPhase, SessionSettings, StopReason,
};
use sleuth_core::search::MockSearch;
use sleuth_core::structured::MockStructuredLlm;
use sleuth_core::types::Role;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

struct Harness {
    provider: Arc<MockLlmProvider>,
    structured: Arc<MockStructuredLlm>,
    summary: Arc<MockStructuredLlm>,
    search: Arc<MockSearch>,
    callback: Arc<RecordingCallback>,
    cancel: CancellationToken,
}

impl Harness {
    fn new() -> Self {
        Self::with_summary(MockStructuredLlm::new().with_responder(|prompt| {
            let label = if prompt.contains("doc-") {
                prompt
                    .split("doc-")
                    .nth(1)
                    .and_then(|rest| rest.split_whitespace().next())
                    .unwrap_or("?")
                    .to_string()
            } else {
                "?".to_string()
            };
            Ok(json!({"summary": format!("sum-{label}"), "key_excerpts": ["quote"]}))
        }))
    }

    fn with_summary(summary: MockStructuredLlm) -> Self {
        Self {
            provider: Arc::new(MockLlmProvider::new()),
            structured: Arc::new(MockStructuredLlm::new()),
            summary: Arc::new(summary),
            search: Arc::new(MockSearch::new().with_fallback(vec!["doc-X".into()])),
            callback: Arc::new(RecordingCallback::new()),
            cancel: CancellationToken::new(),
        }
    }

    fn session(&self) -> ResearchSession {
        self.session_with(SessionSettings::default())
    }

    fn session_with(&self, settings: SessionSettings) -> ResearchSession {
        ResearchSession::new(
            Capabilities {
                completion: self.provider.clone(),
                structured: self.structured.clone(),
                summary: self.summary.clone(),
                search: self.search.clone(),
            },
            Arc::new(PromptLibrary::new().unwrap()),
            settings,
            self.callback.clone(),
            self.cancel.clone(),
        )
    }

    fn clear_request(&self, verification: &str) {
        self.structured.queue_value(json!({
            "need_clarification": false,
            "question": "",
            "verification": verification
        }));
    }

    fn brief(&self, brief: &str) {
        self.structured
            .queue_value(json!({ "research_brief": brief }));
    }

    fn report(&self, report: &str) {
        self.structured.queue_value(json!({ "report": report }));
    }
}

#[tokio::test]
async fn sufficient_first_answer_moves_to_brief_after_one_turn() {
    let h = Harness::new();
    h.clear_request("Researching solid-state batteries.");
    let mut session = h.session();

    let outcome = session
        .submit_user_message("Solid-state battery outlook for 2026")
        .await
        .unwrap();
    assert_eq!(
        outcome,
        ClarifyOutcome::Sufficient("Researching solid-state batteries.".into())
    );
    assert_eq!(session.phase(), SessionPhase::Clarified);
    assert_eq!(session.clarify_ledger().count_role(Role::User), 1);
    assert_eq!(h.structured.call_count(), 1);
}

#[tokio::test]
async fn full_session_produces_report() {
    let h = Harness::new();
    h.clear_request("Got it.");
    h.brief("I want to know how sodium-ion cells compare with LFP.");
    h.report("# Sodium-ion vs LFP\n...");
    h.search
        .queue_results(vec!["doc-A body".into(), "doc-B body".into()]);
    h.provider.queue_response(MockLlmProvider::tool_call_response(
        "search_tool",
        json!({"query": "sodium-ion vs LFP"}),
    ));
    h.provider.queue_response(MockLlmProvider::tool_call_response(
        "reflection_tool",
        json!({"reflection": "Two sources; enough."}),
    ));
    h.provider
        .queue_response(MockLlmProvider::text_response("Research complete."));

    let mut session = h.session();
    let mut input = ScriptedInput::new(["Compare sodium-ion and LFP batteries"]);
    let outcome = session.run(&mut input).await.unwrap();

    assert_eq!(
        outcome,
        SessionOutcome::Report("# Sodium-ion vs LFP\n...".into())
    );
    assert_eq!(session.phase(), SessionPhase::ReportReady);
    assert_eq!(session.report(), Some("# Sodium-ion vs LFP\n..."));

    // clarify ledger: request, verification, brief
    let clarify: Vec<Role> = session.clarify_ledger().iter().map(|m| m.role).collect();
    assert_eq!(clarify, vec![Role::User, Role::Assistant, Role::Assistant]);

    // research ledger: brief, search turn, search frame, reflect turn, reflect frame, final turn
    let research = session.research_ledger();
    assert_eq!(research.len(), 6);
    assert_eq!(
        research.messages()[0].text(),
        "I want to know how sodium-ion cells compare with LFP."
    );
    assert!(research.messages()[2].text().contains("sum-A"));
    assert!(
        research.messages()[2].text().find("sum-A").unwrap()
            < research.messages()[2].text().find("sum-B").unwrap()
    );

    let state = session.state().unwrap();
    assert_eq!(state.search_calls(), 1);
    assert_eq!(state.notes().len(), 2);

    // the report prompt saw the brief and the notes in order
    let report_prompt = h.structured.prompts().last().cloned().unwrap();
    assert!(report_prompt.contains("sodium-ion cells compare with LFP"));
    assert!(report_prompt.find("sum-A").unwrap() < report_prompt.find("sum-B").unwrap());

    assert_eq!(
        h.callback.phases().await,
        vec![
            SessionPhase::Clarified,
            SessionPhase::Researching,
            SessionPhase::ReportReady
        ]
    );
    assert_eq!(h.callback.searches().await, vec!["sodium-ion vs LFP"]);
    assert_eq!(h.callback.reflections().await, vec!["Two sources; enough."]);
}

#[tokio::test]
async fn clarification_loop_asks_until_sufficient() {
    let h = Harness::new();
    h.structured.queue_value(json!({
        "need_clarification": true,
        "question": "Which market: EU or US?",
        "verification": ""
    }));
    h.clear_request("EU market it is.");
    h.brief("EU heat pump adoption.");
    h.report("report");

    let mut session = h.session();
    let mut input = ScriptedInput::new(["heat pumps", "   ", "EU"]);
    session.run(&mut input).await.unwrap();

    assert_eq!(
        h.callback.messages().await,
        vec!["Which market: EU or US?", "EU market it is."]
    );
    let users: Vec<String> = session
        .clarify_ledger()
        .iter()
        .filter(|m| m.role == Role::User)
        .map(|m| m.text())
        .collect();
    assert_eq!(users, vec!["heat pumps", "EU"]);
}

#[tokio::test]
async fn end_of_input_during_clarify_ends_cleanly() {
    let h = Harness::new();
    let mut session = h.session();
    let mut input = ScriptedInput::new(["", "  "]);

    let outcome = session.run(&mut input).await.unwrap();
    assert_eq!(outcome, SessionOutcome::InputClosed);
    assert_eq!(session.phase(), SessionPhase::AwaitingClarification);
    assert_eq!(h.structured.call_count(), 0);
    assert!(h.provider.requests().is_empty());
    assert!(session.state().is_none());
}

#[tokio::test]
async fn budget_stops_the_loop_after_five_searches() {
    let h = Harness::new();
    h.clear_request("ok");
    h.brief("brief");
    for i in 0..6 {
        h.provider.queue_response(MockLlmProvider::tool_call_response(
            "search_tool",
            json!({"query": format!("query {i}")}),
        ));
    }
    let mut session = h.session();
    session.submit_user_message("topic").await.unwrap();
    session.write_brief().await.unwrap();

    let reason = session.research().await.unwrap();
    assert_eq!(reason, StopReason::BudgetExhausted);
    assert_eq!(session.state().unwrap().search_calls(), 5);
    assert_eq!(h.search.call_count(), 5);
    // the sixth search request was never even asked for
    assert_eq!(h.provider.requests().len(), 5);
    assert_eq!(session.research_iterations(), 5);
    assert_eq!(session.research_usage().total(), 5 * 130);
}

#[tokio::test]
async fn model_that_never_searches_is_stopped_by_iteration_limit() {
    let h = Harness::new();
    h.clear_request("ok");
    h.brief("brief");
    h.report("r");
    for _ in 0..10 {
        h.provider.queue_response(MockLlmProvider::tool_call_response(
            "reflection_tool",
            json!({"reflection": "more thinking"}),
        ));
    }
    let mut session = h.session_with(SessionSettings {
        max_iterations: 4,
        ..SessionSettings::default()
    });
    session.submit_user_message("topic").await.unwrap();
    session.write_brief().await.unwrap();

    let reason = session.research().await.unwrap();
    assert_eq!(reason, StopReason::IterationLimit);
    assert_eq!(session.research_iterations(), 4);
    assert_eq!(h.provider.requests().len(), 4);
    assert_eq!(session.research_usage().total(), 4 * 130);
    assert_eq!(h.search.call_count(), 0);
    assert_eq!(session.write_report().await.unwrap(), "r");
}

#[tokio::test]
async fn search_beyond_budget_is_refused_with_a_frame() {
    let h = Harness::new();
    h.clear_request("ok");
    h.brief("brief");
    h.provider.queue_response(MockLlmProvider::tool_calls_response(
        (0..4)
            .map(|i| ("search_tool", json!({"query": format!("q{i}")})))
            .collect(),
    ));
    h.provider.queue_response(MockLlmProvider::tool_calls_response(vec![
        ("search_tool", json!({"query": "fifth"})),
        ("search_tool", json!({"query": "sixth"})),
        ("reflection_tool", json!({"reflection": "wrap up"})),
    ]));
    let mut session = h.session();
    session.submit_user_message("topic").await.unwrap();
    session.write_brief().await.unwrap();

    let reason = session.research().await.unwrap();
    assert_eq!(reason, StopReason::BudgetExhausted);
    assert_eq!(session.state().unwrap().search_calls(), 5);
    assert_eq!(h.search.call_count(), 5);

    let queries: Vec<String> = h.search.queries().into_iter().map(|(q, _)| q).collect();
    assert!(!queries.contains(&"sixth".to_string()));

    // brief, turn 1 + 4 frames, turn 2 + 3 frames
    let ledger = session.research_ledger();
    assert_eq!(ledger.len(), 10);
    let refused = &ledger.messages()[8];
    assert_eq!(refused.role, Role::Tool);
    assert_eq!(refused.text(), budget_exhausted_notice(5));
    assert!(matches!(
        refused.content,
        sleuth_core::types::Content::ToolResult { is_error: true, .. }
    ));
    // every call still gets exactly one frame, in order
    assert_eq!(ledger.messages()[9].text(), "Reflection recorded: wrap up");
}

#[tokio::test]
async fn search_failure_is_fatal_and_no_report_is_written() {
    let h = Harness::new();
    h.clear_request("ok");
    h.brief("brief");
    h.report("should never be used");
    h.search.queue_error(SearchError::Status {
        status: 503,
        body: "unavailable".into(),
    });
    h.provider.queue_response(MockLlmProvider::tool_call_response(
        "search_tool",
        json!({"query": "q"}),
    ));

    let mut session = h.session();
    let err = session
        .run(&mut ScriptedInput::new(["topic"]))
        .await
        .unwrap_err();

    assert!(matches!(err, SleuthError::Tool(ToolError::Search { .. })));
    assert_eq!(session.phase(), SessionPhase::Researching);
    assert!(session.report().is_none());
    // clarify + brief only
    assert_eq!(h.structured.call_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn cancel_during_summaries_aborts_session_without_notes() {
    let h = Harness::with_summary(
        MockStructuredLlm::new()
            .with_latency(|_| Duration::from_secs(600))
            .with_responder(|_| Ok(json!({"summary": "s", "key_excerpts": []}))),
    );
    h.clear_request("ok");
    h.brief("brief");
    h.search
        .queue_results((0..7).map(|i| format!("doc-{i}")).collect());
    h.provider.queue_response(MockLlmProvider::tool_call_response(
        "search_tool",
        json!({"query": "q"}),
    ));

    let trigger = h.cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.cancel();
    });

    let mut session = h.session();
    let err = session
        .run(&mut ScriptedInput::new(["topic"]))
        .await
        .unwrap_err();

    assert!(err.is_cancelled());
    assert!(session.state().unwrap().notes().is_empty());
    assert!(session.report().is_none());
}
