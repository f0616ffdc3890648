//! Prompt templates for every model call in a session.
//!
//! Templates are Handlebars with HTML escaping disabled; each one is given
//! today's date so the model can reason about recency.

use crate::error::PromptError;
use crate::ledger::Ledger;
use chrono::{Local, NaiveDate};
use handlebars::Handlebars;
use serde_json::{Value, json};

const CLARIFY: &str = "clarify";
const BRIEF: &str = "brief";
const RESEARCH_SYSTEM: &str = "research_system";
const SUMMARIZE: &str = "summarize";
const REPORT: &str = "report";

const CLARIFY_TEMPLATE: &str = r#"<ROLE>
You decide whether a research request is clear enough to start working on.
</ROLE>

<DATE>
Today's date is {{date}}.
</DATE>

<INSTRUCTIONS>
Read the conversation below. Ask a follow-up question only when something essential is missing: the scope, a key parameter, or the meaning of an acronym or unusual term. Never ask again for something the user already answered. Keep questions short; use a list when there are several.
</INSTRUCTIONS>

<CONVERSATION>
{{#each messages}}
[{{role}}] {{content}}
{{/each}}
</CONVERSATION>

<OUTPUT_FORMAT>
Reply with a JSON object {"need_clarification": boolean, "question": string, "verification": string}.
- If clarification is needed: need_clarification = true, put the question in "question", leave "verification" empty.
- Otherwise: need_clarification = false, leave "question" empty, and in "verification" restate what you understood and say that research is starting.
</OUTPUT_FORMAT>
"#;

const BRIEF_TEMPLATE: &str = r#"<ROLE>
You turn a conversation with a user into a precise research brief.
</ROLE>

<DATE>
Today's date is {{date}}.
</DATE>

<INSTRUCTIONS>
Write one brief, in the first person from the user's point of view, that captures every requirement and preference the user stated. List dimensions the user left open as open instead of guessing a preference. Never invent constraints. Note any sources or source types the user asked for; otherwise prefer primary and official sources over aggregators.
</INSTRUCTIONS>

<CONVERSATION>
{{#each messages}}
[{{role}}] {{content}}
{{/each}}
</CONVERSATION>

<OUTPUT_FORMAT>
Reply with a JSON object {"research_brief": string}.
</OUTPUT_FORMAT>
"#;

const RESEARCH_SYSTEM_TEMPLATE: &str = r#"<ROLE>
You are a research assistant gathering evidence for the brief in the first user message.
</ROLE>

<DATE>
Today's date is {{date}}.
</DATE>

<TOOLS>
- search_tool: run a web search. Results come back summarized.
- reflection_tool: record what you learned, what is still missing and what to do next.
Call one tool at a time and use reflection_tool after every search.
</TOOLS>

<LIMITS>
- Simple questions: 2 or 3 searches.
- Complex questions: at most {{search_budget}} searches. Searches beyond {{search_budget}} are refused.
- Stop as soon as at least three distinct relevant sources answer the brief, or when new searches only repeat what you already found.
</LIMITS>

<INSTRUCTIONS>
Start broad, then narrow down to fill specific gaps. When you are done, reply with plain text and no tool call.
</INSTRUCTIONS>
"#;

const SUMMARIZE_TEMPLATE: &str = r#"<ROLE>
You condense a web page for a downstream research agent.
</ROLE>

<DATE>
Today's date is {{date}}.
</DATE>

<WEBPAGE_CONTENT>
{{document}}
</WEBPAGE_CONTENT>

<INSTRUCTIONS>
Write a summary about a quarter of the original length (shorter pages may stay as they are) that stands on its own. Keep the main topic, central facts and figures, dates, names and places, and any lists or steps. Keep chronological order for time-sensitive content. For news focus on who, what, when, where and why; for scientific work keep method, results and conclusions.
Pick up to {{max_excerpts}} short verbatim quotes worth citing.
</INSTRUCTIONS>

<OUTPUT_FORMAT>
Reply with a JSON object {"summary": string, "key_excerpts": [string]}.
</OUTPUT_FORMAT>
"#;

const REPORT_TEMPLATE: &str = r#"<ROLE>
You write a research report using only the findings provided.
</ROLE>

<DATE>
Today's date is {{date}}.
</DATE>

<RESEARCH_BRIEF>
{{brief}}
</RESEARCH_BRIEF>

<FINDINGS>
{{#each notes}}
{{this}}
{{/each}}
</FINDINGS>

<INSTRUCTIONS>
Answer the brief in Markdown: a single # heading for the title and ## headings for sections. Use only facts from the findings, cite sources inline as numbered references, and finish with a ### Sources list numbered 1, 2, 3 without gaps, one source per line. Do not talk about yourself or the writing process.
</INSTRUCTIONS>

<OUTPUT_FORMAT>
Reply with a JSON object {"report": string}.
</OUTPUT_FORMAT>
"#;

/// Renders the prompts used by each phase.
pub struct PromptLibrary {
    registry: Handlebars<'static>,
    fixed_date: Option<NaiveDate>,
}

impl PromptLibrary {
    pub fn new() -> Result<Self, PromptError> {
        let mut registry = Handlebars::new();
        registry.register_escape_fn(handlebars::no_escape);
        registry.set_strict_mode(false);

        for (name, template) in [
            (CLARIFY, CLARIFY_TEMPLATE),
            (BRIEF, BRIEF_TEMPLATE),
            (RESEARCH_SYSTEM, RESEARCH_SYSTEM_TEMPLATE),
            (SUMMARIZE, SUMMARIZE_TEMPLATE),
            (REPORT, REPORT_TEMPLATE),
        ] {
            registry
                .register_template_string(name, template)
                .map_err(|e| PromptError::Register {
                    name: name.to_string(),
                    message: e.to_string(),
                })?;
        }

        Ok(Self {
            registry,
            fixed_date: None,
        })
    }

    /// Pin the date shown in every prompt.
    pub fn with_date(mut self, date: NaiveDate) -> Self {
        self.fixed_date = Some(date);
        self
    }

    /// Today's date as `dd/mm/YYYY`.
    pub fn date(&self) -> String {
        self.fixed_date
            .unwrap_or_else(|| Local::now().date_naive())
            .format("%d/%m/%Y")
            .to_string()
    }

    pub fn clarify(&self, ledger: &Ledger) -> Result<String, PromptError> {
        self.render(
            CLARIFY,
            json!({ "date": self.date(), "messages": ledger.transcript() }),
        )
    }

    pub fn brief(&self, ledger: &Ledger) -> Result<String, PromptError> {
        self.render(
            BRIEF,
            json!({ "date": self.date(), "messages": ledger.transcript() }),
        )
    }

    /// System prompt for the research loop. Prepended per call, never stored.
    pub fn research_system(&self, search_budget: usize) -> Result<String, PromptError> {
        self.render(
            RESEARCH_SYSTEM,
            json!({ "date": self.date(), "search_budget": search_budget }),
        )
    }

    pub fn summarize(&self, document: &str, max_excerpts: usize) -> Result<String, PromptError> {
        self.render(
            SUMMARIZE,
            json!({ "date": self.date(), "document": document, "max_excerpts": max_excerpts }),
        )
    }

    pub fn report(&self, brief: &str, notes: &[String]) -> Result<String, PromptError> {
        self.render(
            REPORT,
            json!({ "date": self.date(), "brief": brief, "notes": notes }),
        )
    }

    fn render(&self, name: &str, data: Value) -> Result<String, PromptError> {
        self.registry
            .render(name, &data)
            .map_err(|e| PromptError::Render {
                name: name.to_string(),
                message: e.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::LedgerScope;
    use crate::types::Message;

    fn library() -> PromptLibrary {
        PromptLibrary::new()
            .unwrap()
            .with_date(NaiveDate::from_ymd_opt(2025, 3, 7).unwrap())
    }

    #[test]
    fn test_date_format() {
        assert_eq!(library().date(), "07/03/2025");
    }

    #[test]
    fn test_clarify_embeds_conversation_in_order() {
        let mut ledger = Ledger::new(LedgerScope::Clarify);
        ledger.append(Message::user("Compare R&D spend <2020>"));
        ledger.append(Message::assistant("Which companies?"));
        let prompt = library().clarify(&ledger).unwrap();

        let user = prompt.find("[user] Compare R&D spend <2020>").unwrap();
        let assistant = prompt.find("[assistant] Which companies?").unwrap();
        assert!(user < assistant);
        assert!(prompt.contains("07/03/2025"));
    }

    #[test]
    fn test_research_system_mentions_budget() {
        let prompt = library().research_system(5).unwrap();
        assert!(prompt.contains("at most 5 searches"));
        assert!(prompt.contains("search_tool"));
        assert!(prompt.contains("reflection_tool"));
    }

    #[test]
    fn test_summarize_carries_raw_text_unescaped() {
        let prompt = library().summarize("a \"quoted\" <page>", 5).unwrap();
        assert!(prompt.contains("<WEBPAGE_CONTENT>\na \"quoted\" <page>\n</WEBPAGE_CONTENT>"));
        assert!(prompt.contains("up to 5"));
    }

    #[test]
    fn test_summarize_page_body_is_not_dropped() {
        let page = "DOC[3] Heat pump sales rose 40% in 2023.";
        let prompt = library().summarize(page, 2).unwrap();
        let start = prompt.find("<WEBPAGE_CONTENT>").unwrap();
        let end = prompt.find("</WEBPAGE_CONTENT>").unwrap();
        assert_eq!(prompt[start + "<WEBPAGE_CONTENT>".len()..end].trim(), page);
    }

    #[test]
    fn test_report_asks_for_markdown_headings() {
        let prompt = library().report("brief", &[]).unwrap();
        assert!(prompt.contains("# heading for the title"));
        assert!(prompt.contains("### Sources"));
    }

    #[test]
    fn test_report_lists_notes_in_order() {
        let notes = vec!["note-one".to_string(), "note-two".to_string()];
        let prompt = library().report("my brief", &notes).unwrap();
        assert!(prompt.contains("my brief"));
        assert!(prompt.find("note-one").unwrap() < prompt.find("note-two").unwrap());
    }
}
