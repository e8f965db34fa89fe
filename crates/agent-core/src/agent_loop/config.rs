//! Configuration for the round controller.

use std::path::PathBuf;

use pilot_core_types::Viewport;
use serde::{Deserialize, Serialize};

use crate::envelope::ActionAllowList;
use crate::llm_provider::RetryPolicy;
use crate::vision::ImageProcessorConfig;

/// Tunables for one run of the observe-decide-act loop.
///
/// Loop-detector thresholds are fixed constants in `loop_detector`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentLoopConfig {
    /// Round budget when the test case does not set one.
    /// Default: 20
    pub max_rounds: u32,

    /// Browser viewport the model's coordinates are mapped onto.
    /// Default: 1440x900
    pub viewport: Viewport,

    /// Settle time after the start navigation, in milliseconds.
    /// Default: 1500
    pub initial_settle_ms: u64,

    /// Settle time after each executed action, in milliseconds.
    /// Default: 1500
    pub action_settle_ms: u64,

    /// Network-idle wait after the start navigation.
    /// Default: 5000
    pub start_load_timeout_ms: u64,

    /// Network-idle wait after `visit_url`/`web_search`.
    /// Default: 10000
    pub navigation_load_timeout_ms: u64,

    /// DOMContentLoaded wait after every other action.
    /// Default: 3000
    pub action_load_timeout_ms: u64,

    /// Maximum body text read per observation.
    /// Default: 4000
    pub body_text_limit: usize,

    /// Body characters shown to the model each round.
    /// Default: 220
    pub context_snippet_chars: usize,

    /// Action summaries carried into the round context.
    /// Default: 2
    pub recent_actions: usize,

    /// Memorized facts kept.
    /// Default: 20
    pub max_facts: usize,

    /// Transitions kept for auto-pass evidence.
    /// Default: 20
    pub transition_window: usize,

    /// Upper bound on a single `wait` action, in seconds.
    /// Default: 30
    pub max_wait_secs: f64,

    /// Accept any click transition to the final URL as pass evidence when
    /// the steps name no click target.
    /// Default: false
    pub allow_click_fallback: bool,

    /// Offer the extended action set to the model.
    /// Default: false
    pub extended_actions: bool,

    /// Where per-round screenshots are written. `None` disables saving.
    /// Default: None
    pub screenshots_dir: Option<PathBuf>,

    pub image: ImageProcessorConfig,

    pub retry: RetryPolicy,
}

impl Default for AgentLoopConfig {
    fn default() -> Self {
        Self {
            max_rounds: 20,
            viewport: Viewport::default(),
            initial_settle_ms: 1_500,
            action_settle_ms: 1_500,
            start_load_timeout_ms: 5_000,
            navigation_load_timeout_ms: 10_000,
            action_load_timeout_ms: 3_000,
            body_text_limit: 4_000,
            context_snippet_chars: 220,
            recent_actions: 2,
            max_facts: 20,
            transition_window: 20,
            max_wait_secs: 30.0,
            allow_click_fallback: false,
            extended_actions: false,
            screenshots_dir: None,
            image: ImageProcessorConfig::default(),
            retry: RetryPolicy::default(),
        }
    }
}

impl AgentLoopConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// No settle delays and zero-delay retries. For tests.
    pub fn minimal() -> Self {
        Self {
            initial_settle_ms: 0,
            action_settle_ms: 0,
            start_load_timeout_ms: 0,
            navigation_load_timeout_ms: 0,
            action_load_timeout_ms: 0,
            max_wait_secs: 0.0,
            retry: RetryPolicy::immediate(),
            ..Self::default()
        }
    }

    /// Builder: set the round budget.
    pub fn max_rounds(mut self, rounds: u32) -> Self {
        self.max_rounds = rounds;
        self
    }

    /// Builder: set the viewport.
    pub fn viewport(mut self, viewport: Viewport) -> Self {
        self.viewport = viewport;
        self
    }

    /// Builder: enable screenshot saving.
    pub fn screenshots_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.screenshots_dir = Some(dir.into());
        self
    }

    /// Builder: set the retry policy.
    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    /// Builder: toggle the opt-in click fallback.
    pub fn click_fallback(mut self, enabled: bool) -> Self {
        self.allow_click_fallback = enabled;
        self
    }

    /// Builder: toggle the extended action set.
    pub fn extended(mut self, enabled: bool) -> Self {
        self.extended_actions = enabled;
        self
    }

    pub fn allow_list(&self) -> ActionAllowList {
        if self.extended_actions {
            ActionAllowList::extended()
        } else {
            ActionAllowList::curated()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AgentLoopConfig::default();
        assert_eq!(config.max_rounds, 20);
        assert_eq!(config.viewport, Viewport::new(1440, 900));
        assert_eq!(config.context_snippet_chars, 220);
        assert!(!config.allow_click_fallback);
        assert_eq!(config.allow_list(), ActionAllowList::curated());
    }

    #[test]
    fn test_builder() {
        let config = AgentLoopConfig::new()
            .max_rounds(5)
            .extended(true)
            .click_fallback(true);
        assert_eq!(config.max_rounds, 5);
        assert!(config.allow_list().contains("select_option"));
        assert!(config.allow_click_fallback);
    }

    #[test]
    fn test_minimal_config() {
        let config = AgentLoopConfig::minimal();
        assert_eq!(config.action_settle_ms, 0);
        assert_eq!(config.retry, RetryPolicy::immediate());
    }

    #[test]
    fn partial_yaml_falls_back_to_defaults() {
        let config: AgentLoopConfig = serde_json::from_str(r#"{"max_rounds": 7}"#).unwrap();
        assert_eq!(config.max_rounds, 7);
        assert_eq!(config.action_settle_ms, 1_500);
    }
}
