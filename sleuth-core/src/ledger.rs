//! Conversation ledgers.
//!
//! A ledger is the append-only message history of one conversational phase.
//! The clarify/brief exchange and the research exchange each own a separate
//! ledger; the two are never merged.

use crate::types::{Message, Role};
use serde::Serialize;
use tracing::debug;

/// Which conversation a ledger belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerScope {
    Clarify,
    Research,
}

impl std::fmt::Display for LedgerScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LedgerScope::Clarify => write!(f, "clarify"),
            LedgerScope::Research => write!(f, "research"),
        }
    }
}

/// Append-only ordered message history. Nothing removes, replaces or
/// reorders a message once appended.
#[derive(Debug, Clone)]
pub struct Ledger {
    scope: LedgerScope,
    messages: Vec<Message>,
}

/// One `{role, content}` pair, the shape prompts embed a ledger in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TranscriptEntry {
    pub role: String,
    pub content: String,
}

impl Ledger {
    pub fn new(scope: LedgerScope) -> Self {
        Self {
            scope,
            messages: Vec::new(),
        }
    }

    pub fn scope(&self) -> LedgerScope {
        self.scope
    }

    /// Append a message at the end of the ledger.
    pub fn append(&mut self, message: Message) {
        self.messages.push(message);
        debug!(
            ledger = %self.scope,
            role = %self.messages[self.messages.len() - 1].role,
            len = self.messages.len(),
            "Message appended to ledger"
        );
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Message> {
        self.messages.iter()
    }

    /// Number of messages with the given role.
    pub fn count_role(&self, role: Role) -> usize {
        self.messages.iter().filter(|m| m.role == role).count()
    }

    /// Flatten the ledger into role/content pairs for prompt templates.
    pub fn transcript(&self) -> Vec<TranscriptEntry> {
        self.messages
            .iter()
            .map(|m| TranscriptEntry {
                role: m.role.to_string(),
                content: m.text(),
            })
            .collect()
    }
}

impl<'a> IntoIterator for &'a Ledger {
    type Item = &'a Message;
    type IntoIter = std::slice::Iter<'a, Message>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
