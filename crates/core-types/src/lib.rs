//! Shared primitives for e2e-pilot crates.
//!
//! A [`TestCase`] is produced by the task loader and read-only during a run;
//! the round controller turns it into exactly one [`TestRunResult`].

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde_json::Value;

/// Default priority for cases that do not declare one (1 = highest, 10 = lowest).
pub const DEFAULT_PRIORITY: u8 = 5;

/// Browser viewport in CSS pixels.
#[cfg_attr(feature = "serde-full", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Viewport {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl Default for Viewport {
    fn default() -> Self {
        Self::new(1440, 900)
    }
}

impl fmt::Display for Viewport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Natural-language end-to-end test definition.
#[cfg_attr(feature = "serde-full", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde-full", serde(default))]
#[derive(Clone, Debug, PartialEq)]
pub struct TestCase {
    pub id: String,
    pub objective: String,
    /// Ordered instructions the agent should follow.
    pub objective_steps: Vec<String>,
    pub pass_criteria: Vec<String>,
    pub fail_criteria: Vec<String>,
    pub start_url: Option<String>,
    pub credentials: BTreeMap<String, String>,
    pub notes: Option<String>,
    pub max_rounds: Option<u32>,
    pub tags: BTreeSet<String>,
    pub skip: bool,
    pub skip_reason: Option<String>,
    pub retry_count: u32,
    pub timeout_seconds: Option<f64>,
    pub priority: u8,
    pub owner: Option<String>,
}

impl Default for TestCase {
    fn default() -> Self {
        Self {
            id: String::new(),
            objective: String::new(),
            objective_steps: Vec::new(),
            pass_criteria: Vec::new(),
            fail_criteria: Vec::new(),
            start_url: None,
            credentials: BTreeMap::new(),
            notes: None,
            max_rounds: None,
            tags: BTreeSet::new(),
            skip: false,
            skip_reason: None,
            retry_count: 0,
            timeout_seconds: None,
            priority: DEFAULT_PRIORITY,
            owner: None,
        }
    }
}

impl TestCase {
    pub fn new(id: impl Into<String>, objective: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            objective: objective.into(),
            ..Self::default()
        }
    }

    pub fn with_steps<I, S>(mut self, steps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.objective_steps = steps.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_pass_criteria<I, S>(mut self, criteria: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.pass_criteria = criteria.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_fail_criteria<I, S>(mut self, criteria: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fail_criteria = criteria.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_start_url(mut self, url: impl Into<String>) -> Self {
        self.start_url = Some(url.into());
        self
    }

    pub fn with_max_rounds(mut self, rounds: u32) -> Self {
        self.max_rounds = Some(rounds);
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// Case-insensitive tag membership.
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|own| own.eq_ignore_ascii_case(tag))
    }

    pub fn has_any_tag<'a, I>(&self, tags: I) -> bool
    where
        I: IntoIterator<Item = &'a String>,
    {
        tags.into_iter().any(|tag| self.has_tag(tag))
    }

    /// An empty include set matches everything; any excluded tag rejects the case.
    pub fn matches_filter(
        &self,
        include: Option<&BTreeSet<String>>,
        exclude: Option<&BTreeSet<String>>,
    ) -> bool {
        if let Some(include) = include.filter(|set| !set.is_empty()) {
            if !self.has_any_tag(include) {
                return false;
            }
        }
        if let Some(exclude) = exclude {
            if self.has_any_tag(exclude) {
                return false;
            }
        }
        true
    }
}

/// One immutable record per round.
#[cfg_attr(feature = "serde-full", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, PartialEq)]
pub struct ActionTrace {
    pub round_index: u32,
    pub action: String,
    pub arguments: Value,
    pub model_response: String,
    pub result: String,
    pub page_url: String,
    pub screenshot_path: Option<PathBuf>,
    pub timestamp: DateTime<Utc>,
    pub duration_ms: Option<f64>,
    pub element_info: Option<Value>,
    pub console_errors: Option<Vec<String>>,
}

impl ActionTrace {
    pub fn new(
        round_index: u32,
        action: impl Into<String>,
        arguments: Value,
        model_response: impl Into<String>,
        result: impl Into<String>,
        page_url: impl Into<String>,
    ) -> Self {
        Self {
            round_index,
            action: action.into(),
            arguments,
            model_response: model_response.into(),
            result: result.into(),
            page_url: page_url.into(),
            screenshot_path: None,
            timestamp: Utc::now(),
            duration_ms: None,
            element_info: None,
            console_errors: None,
        }
    }
}

/// Outcome classification used by reporters.
#[cfg_attr(feature = "serde-full", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde-full", serde(rename_all = "snake_case"))]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RunStatus {
    Passed,
    Failed,
    Skipped,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Passed => "passed",
            RunStatus::Failed => "failed",
            RunStatus::Skipped => "skipped",
        }
    }
}

/// Terminal value of one run, produced exactly once at loop exit.
#[cfg_attr(feature = "serde-full", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, PartialEq)]
pub struct TestRunResult {
    pub case: TestCase,
    pub success: bool,
    pub skipped: bool,
    pub reason: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub actions: Vec<ActionTrace>,
    pub facts: Vec<String>,
    pub retry_attempt: u32,
    pub final_url: Option<String>,
    pub console_errors: Vec<String>,
}

impl TestRunResult {
    /// A failed result with no recorded actions.
    pub fn failed(case: TestCase, reason: impl Into<String>, started_at: DateTime<Utc>) -> Self {
        Self {
            case,
            success: false,
            skipped: false,
            reason: reason.into(),
            started_at,
            finished_at: Utc::now(),
            actions: Vec::new(),
            facts: Vec::new(),
            retry_attempt: 0,
            final_url: None,
            console_errors: Vec::new(),
        }
    }

    pub fn skipped(case: TestCase) -> Self {
        let reason = format!(
            "Skipped: {}",
            case.skip_reason.as_deref().unwrap_or("marked as skip")
        );
        let now = Utc::now();
        Self {
            skipped: true,
            finished_at: now,
            ..Self::failed(case, reason, now)
        }
    }

    pub fn duration_seconds(&self) -> f64 {
        let millis = (self.finished_at - self.started_at).num_milliseconds();
        (millis.max(0) as f64) / 1000.0
    }

    pub fn action_count(&self) -> usize {
        self.actions.len()
    }

    pub fn status(&self) -> RunStatus {
        if self.skipped {
            RunStatus::Skipped
        } else if self.success {
            RunStatus::Passed
        } else {
            RunStatus::Failed
        }
    }
}

/// Aggregated results for a suite run.
#[cfg_attr(feature = "serde-full", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, PartialEq)]
pub struct TestSuiteResult {
    pub results: Vec<TestRunResult>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl TestSuiteResult {
    pub fn total(&self) -> usize {
        self.results.len()
    }

    pub fn passed(&self) -> usize {
        self.results.iter().filter(|r| r.success).count()
    }

    pub fn failed(&self) -> usize {
        self.total() - self.passed()
    }

    /// Percentage in `0.0..=100.0`; an empty suite reports zero.
    pub fn pass_rate(&self) -> f64 {
        if self.results.is_empty() {
            return 0.0;
        }
        self.passed() as f64 / self.total() as f64 * 100.0
    }

    pub fn duration_seconds(&self) -> f64 {
        let millis = (self.finished_at - self.started_at).num_milliseconds();
        (millis.max(0) as f64) / 1000.0
    }

    pub fn failed_tests(&self) -> impl Iterator<Item = &TestRunResult> {
        self.results.iter().filter(|r| !r.success)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn case() -> TestCase {
        TestCase::new("signup", "Sign up")
            .with_pass_criteria(["Dashboard is shown"])
            .with_fail_criteria(["Error is shown"])
            .with_tags(["Smoke", "auth"])
    }

    #[test]
    fn tags_match_case_insensitively() {
        let tc = case();
        assert!(tc.has_tag("smoke"));
        assert!(tc.has_tag("AUTH"));
        assert!(!tc.has_tag("billing"));
    }

    #[test]
    fn filter_honours_include_and_exclude() {
        let tc = case();
        let smoke: BTreeSet<String> = ["smoke".to_string()].into();
        let billing: BTreeSet<String> = ["billing".to_string()].into();
        let empty = BTreeSet::new();

        assert!(tc.matches_filter(None, None));
        assert!(tc.matches_filter(Some(&empty), None));
        assert!(tc.matches_filter(Some(&smoke), Some(&billing)));
        assert!(!tc.matches_filter(Some(&billing), None));
        assert!(!tc.matches_filter(None, Some(&smoke)));
    }

    #[test]
    fn default_priority_is_five() {
        assert_eq!(TestCase::default().priority, DEFAULT_PRIORITY);
    }

    #[test]
    fn skipped_result_carries_reason() {
        let mut tc = case();
        tc.skip = true;
        tc.skip_reason = Some("flaky upstream".into());
        let result = TestRunResult::skipped(tc);
        assert_eq!(result.status(), RunStatus::Skipped);
        assert_eq!(result.reason, "Skipped: flaky upstream");
        assert!(!result.success);
    }

    #[test]
    fn suite_aggregates() {
        let start = Utc::now();
        let mut pass = TestRunResult::failed(case(), "ok", start);
        pass.success = true;
        let fail = TestRunResult::failed(case(), "boom", start);
        let suite = TestSuiteResult {
            results: vec![pass, fail.clone(), fail],
            started_at: start,
            finished_at: start + Duration::milliseconds(2500),
        };
        assert_eq!(suite.total(), 3);
        assert_eq!(suite.passed(), 1);
        assert_eq!(suite.failed(), 2);
        assert!((suite.pass_rate() - 33.333).abs() < 0.01);
        assert!((suite.duration_seconds() - 2.5).abs() < f64::EPSILON);
        assert_eq!(suite.failed_tests().count(), 2);
    }

    #[test]
    fn empty_suite_has_zero_pass_rate() {
        let now = Utc::now();
        let suite = TestSuiteResult {
            results: Vec::new(),
            started_at: now,
            finished_at: now,
        };
        assert_eq!(suite.pass_rate(), 0.0);
    }
}
