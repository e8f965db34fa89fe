//! Evidence accumulated during a run: navigation transitions and verified
//! expectations.

use std::collections::VecDeque;

use serde::Serialize;

use crate::expectations::ExpectationPair;

/// Default number of transitions kept.
pub const TRANSITION_WINDOW: usize = 20;

/// A page change observed after an action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Transition {
    pub from: String,
    pub to: String,
    pub action: String,
    pub clicked_text: Option<String>,
}

impl Transition {
    pub fn is_click(&self) -> bool {
        self.action == "left_click"
    }

    /// Case-insensitive match of the clicked element text against `target`.
    pub fn clicked(&self, target: &str) -> bool {
        let target = target.trim().to_lowercase();
        !target.is_empty()
            && self
                .clicked_text
                .as_deref()
                .map(|text| text.to_lowercase().contains(&target))
                .unwrap_or(false)
    }
}

/// Bounded ring of recent transitions, oldest first.
#[derive(Debug, Clone)]
pub struct TransitionLog {
    entries: VecDeque<Transition>,
    capacity: usize,
}

impl TransitionLog {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, transition: Transition) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(transition);
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &Transition> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for TransitionLog {
    fn default() -> Self {
        Self::new(TRANSITION_WINDOW)
    }
}

/// Expectations confirmed on their URL. Grows monotonically within a run.
#[derive(Debug, Clone, Default)]
pub struct VerifiedExpectations {
    pairs: Vec<ExpectationPair>,
}

impl VerifiedExpectations {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a pair. Returns `true` if it was not already known.
    pub fn record(&mut self, pair: ExpectationPair) -> bool {
        if self.pairs.contains(&pair) {
            return false;
        }
        self.pairs.push(pair);
        true
    }

    pub fn contains(&self, pair: &ExpectationPair) -> bool {
        self.pairs.contains(pair)
    }

    /// The `n` most recently verified pairs, oldest first.
    pub fn recent(&self, n: usize) -> &[ExpectationPair] {
        let start = self.pairs.len().saturating_sub(n);
        &self.pairs[start..]
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transition(to: &str) -> Transition {
        Transition {
            from: "https://x/start".into(),
            to: to.into(),
            action: "left_click".into(),
            clicked_text: Some("Confirm order".into()),
        }
    }

    #[test]
    fn log_keeps_only_latest_entries() {
        let mut log = TransitionLog::new(3);
        for i in 0..5 {
            log.push(transition(&format!("https://x/{i}")));
        }
        let targets: Vec<_> = log.iter().map(|t| t.to.as_str()).collect();
        assert_eq!(targets, vec!["https://x/2", "https://x/3", "https://x/4"]);
    }

    #[test]
    fn clicked_text_matches_case_insensitively() {
        let t = transition("https://x/done");
        assert!(t.is_click());
        assert!(t.clicked("confirm"));
        assert!(!t.clicked("cancel"));
        assert!(!t.clicked(" "));
    }

    #[test]
    fn verified_pairs_are_unique_and_ordered() {
        let mut verified = VerifiedExpectations::new();
        assert!(verified.record(ExpectationPair::new("https://x/a", "A")));
        assert!(verified.record(ExpectationPair::new("https://x/b", "B")));
        assert!(!verified.record(ExpectationPair::new("https://x/a/", "A")));
        assert_eq!(verified.len(), 2);
        assert_eq!(verified.recent(1), &[ExpectationPair::new("https://x/b", "B")]);
        assert_eq!(verified.recent(10).len(), 2);
    }
}
