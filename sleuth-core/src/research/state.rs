//! Research state: the brief, the compressed notes and the search counter.

use serde::Serialize;

/// Ordered, append-only list of summarized evidence.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CompressedNotes {
    entries: Vec<String>,
}

impl CompressedNotes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a batch of notes, keeping their order.
    pub fn extend(&mut self, batch: impl IntoIterator<Item = String>) {
        self.entries.extend(batch);
    }

    pub fn as_slice(&self) -> &[String] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Everything the research phase produces for the report.
#[derive(Debug, Clone, Serialize)]
pub struct ResearchState {
    brief: String,
    notes: CompressedNotes,
    search_calls: usize,
}

impl ResearchState {
    /// Start research on `brief`. The brief cannot change afterwards.
    pub fn new(brief: impl Into<String>) -> Self {
        Self {
            brief: brief.into(),
            notes: CompressedNotes::new(),
            search_calls: 0,
        }
    }

    pub fn brief(&self) -> &str {
        &self.brief
    }

    pub fn notes(&self) -> &CompressedNotes {
        &self.notes
    }

    pub fn notes_mut(&mut self) -> &mut CompressedNotes {
        &mut self.notes
    }

    pub fn search_calls(&self) -> usize {
        self.search_calls
    }

    /// Count one dispatched search. Returns `false` and leaves the counter
    /// alone when `budget` is already used up.
    pub fn record_search_call(&mut self, budget: usize) -> bool {
        if self.search_calls >= budget {
            return false;
        }
        self.search_calls += 1;
        true
    }

    pub fn budget_exhausted(&self, budget: usize) -> bool {
        self.search_calls >= budget
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_counter_stops_at_budget() {
        let mut state = ResearchState::new("brief");
        for _ in 0..5 {
            assert!(state.record_search_call(5));
        }
        assert!(state.budget_exhausted(5));
        assert!(!state.record_search_call(5));
        assert_eq!(state.search_calls(), 5);
    }

    #[test]
    fn test_notes_append_in_order() {
        let mut state = ResearchState::new("brief");
        state.notes_mut().extend(vec!["a".to_string(), "b".to_string()]);
        state.notes_mut().extend(vec!["c".to_string()]);
        assert_eq!(state.notes().as_slice(), &["a", "b", "c"]);
        assert_eq!(state.brief(), "brief");
    }
}
