//! Run-scoped mutable state owned by the round controller.

use std::collections::VecDeque;

use pilot_core_types::TestCase;

use super::config::AgentLoopConfig;
use crate::coords::ImageSize;
use crate::evidence::{Transition, TransitionLog, VerifiedExpectations};
use crate::expectations::{pass_criteria_pairs, scoped_expectations_for_url, ExpectationPair};
use crate::loop_detector::LoopDetector;
use crate::urls::normalize_for_compare;
use crate::vision::PromptImage;

/// Console errors taken from one round's messages.
pub const CONSOLE_ERRORS_PER_ROUND: usize = 5;

/// Scroll samples kept for the oscillation check.
pub const SCROLL_HISTORY_LEN: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrollDirection {
    Up,
    Down,
}

impl ScrollDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScrollDirection::Up => "up",
            ScrollDirection::Down => "down",
        }
    }
}

/// Where the document sat after one scroll action.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScrollSample {
    pub direction: ScrollDirection,
    pub y: f64,
    pub height: f64,
}

impl ScrollSample {
    pub fn new(direction: ScrollDirection, y: f64, height: f64) -> Self {
        Self {
            direction,
            y,
            height,
        }
    }

    /// `Scroll position: 640/3200 (20.0%).`
    pub fn describe(&self) -> String {
        let height = if self.height > 0.0 { self.height } else { 1.0 };
        format!(
            "Scroll position: {:.0}/{:.0} ({:.1}%).",
            self.y,
            self.height,
            self.y / height * 100.0
        )
    }
}

/// Last few scroll samples, oldest first.
#[derive(Debug, Clone, Default)]
pub struct ScrollHistory {
    samples: VecDeque<ScrollSample>,
}

impl ScrollHistory {
    pub fn push(&mut self, sample: ScrollSample) {
        if self.samples.len() == SCROLL_HISTORY_LEN {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    pub fn last(&self) -> Option<&ScrollSample> {
        self.samples.back()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// At least four recent scrolls going both ways.
    pub fn oscillating(&self) -> bool {
        let has = |dir: ScrollDirection| self.samples.iter().any(|s| s.direction == dir);
        self.samples.len() >= 4 && has(ScrollDirection::Up) && has(ScrollDirection::Down)
    }
}

/// What the controller saw after an action (or at start).
#[derive(Debug, Clone, Default)]
pub struct Observation {
    pub url: String,
    pub title: String,
    pub body: String,
    pub console_errors: Vec<String>,
    pub screenshot: Option<Vec<u8>>,
}

/// Per-run state. Built fresh for every test case and never shared.
#[derive(Debug)]
pub struct RoundState {
    pub round: u32,
    pub url: String,
    pub url_norm: String,
    pub title: String,
    pub body: String,
    /// Set by an observation whose URL differs from the previous one.
    pub page_changed: bool,
    /// Set when the last action looked like a form submission.
    pub just_submitted: bool,
    pub detector: LoopDetector,
    pub console_errors: Vec<String>,
    pub facts: Vec<String>,
    pub transitions: TransitionLog,
    pub verified: VerifiedExpectations,
    pub action_summaries: Vec<String>,
    /// Text of every element clicked so far.
    pub clicked: Vec<String>,
    pub scrolls: ScrollHistory,
    pub last_image_size: Option<ImageSize>,
    pub prompt_image: Option<PromptImage>,
    max_facts: usize,
}

impl RoundState {
    pub fn new(config: &AgentLoopConfig) -> Self {
        Self {
            round: 0,
            url: String::new(),
            url_norm: String::new(),
            title: String::new(),
            body: String::new(),
            page_changed: false,
            just_submitted: false,
            detector: LoopDetector::new(),
            console_errors: Vec::new(),
            facts: Vec::new(),
            transitions: TransitionLog::new(config.transition_window),
            verified: VerifiedExpectations::new(),
            action_summaries: Vec::new(),
            clicked: Vec::new(),
            scrolls: ScrollHistory::default(),
            last_image_size: None,
            prompt_image: None,
            max_facts: config.max_facts,
        }
    }

    /// Adopt a new observation. Returns whether the normalized URL changed.
    pub fn observe(&mut self, observation: Observation) -> bool {
        let url_norm = normalize_for_compare(&observation.url);
        let changed = !self.url_norm.is_empty() && url_norm != self.url_norm;
        self.url = observation.url;
        self.url_norm = url_norm;
        self.title = observation.title;
        self.body = observation.body;
        self.page_changed = changed;
        self.push_console_errors(observation.console_errors);
        changed
    }

    fn push_console_errors(&mut self, errors: Vec<String>) {
        let skip = errors.len().saturating_sub(CONSOLE_ERRORS_PER_ROUND);
        self.console_errors.extend(errors.into_iter().skip(skip));
    }

    /// Console errors worth attaching to a trace.
    pub fn recent_console_errors(&self, n: usize) -> Vec<String> {
        let start = self.console_errors.len().saturating_sub(n);
        self.console_errors[start..].to_vec()
    }

    pub fn record_fact(&mut self, fact: impl Into<String>) {
        self.facts.push(fact.into());
        if self.facts.len() > self.max_facts {
            let excess = self.facts.len() - self.max_facts;
            self.facts.drain(..excess);
        }
    }

    pub fn record_transition(&mut self, from: String, action: &str, clicked_text: Option<String>) {
        self.transitions.push(Transition {
            from,
            to: self.url_norm.clone(),
            action: action.to_string(),
            clicked_text,
        });
    }

    /// Record every expectation tied to the current URL that the current
    /// body text already shows.
    pub fn verify_current_page(&mut self, tc: &TestCase) -> usize {
        let body = self.body.to_lowercase();
        let mut candidates: Vec<ExpectationPair> = scoped_expectations_for_url(tc, &self.url)
            .into_iter()
            .map(|text| ExpectationPair::new(&self.url, text))
            .collect();
        candidates.extend(
            pass_criteria_pairs(tc)
                .into_iter()
                .filter(|pair| pair.url == self.url_norm),
        );

        candidates
            .into_iter()
            .filter(|pair| body.contains(&pair.text.to_lowercase()))
            .filter(|pair| self.verified.record(pair.clone()))
            .count()
    }

    /// Last `n` action summaries, oldest first.
    pub fn recent_summaries(&self, n: usize) -> &[String] {
        let start = self.action_summaries.len().saturating_sub(n);
        &self.action_summaries[start..]
    }

    pub fn left_start(&self, tc: &TestCase) -> bool {
        tc.start_url
            .as_deref()
            .map(|start| normalize_for_compare(start) != self.url_norm)
            .unwrap_or(false)
    }
}
