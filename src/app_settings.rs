use std::env;
use std::path::PathBuf;
use std::time::Duration;

use agent_core::AgentLoopConfig;
use pilot_core_types::Viewport;
use serde::{Deserialize, Serialize};

use crate::llm::OpenAiConfig;
use crate::report::{ReportFormat, ReportOptions};

/// `top_p` applied when the endpoint looks like a local LM Studio server.
pub const LOCAL_TOP_P: f32 = 0.85;

/// Application settings loaded from `config.yaml`.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub model: ModelSettings,
    pub agent: AgentSettings,
    pub browser: BrowserSettings,
    pub reporting: ReportingSettings,
    pub runner: RunnerSettings,
    pub heuristics: HeuristicSettings,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ModelSettings {
    pub model: String,
    pub base_url: String,
    pub api_key: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub request_timeout_secs: u64,
    /// Explicit `top_p`; local endpoints fall back to [`LOCAL_TOP_P`].
    pub top_p: Option<f32>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct AgentSettings {
    pub max_rounds: u32,
    pub viewport_width: u32,
    pub viewport_height: u32,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct BrowserSettings {
    pub headless: bool,
    pub executable: Option<PathBuf>,
    pub no_sandbox: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ReportingSettings {
    pub reports_dir: PathBuf,
    pub screenshots_dir: PathBuf,
    pub save_screenshots: bool,
    pub output_format: ReportFormat,
    /// Inline screenshots in HTML reports instead of linking them.
    pub embed_screenshots: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct RunnerSettings {
    pub parallel_workers: usize,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct HeuristicSettings {
    pub click_fallback: bool,
    pub extended_actions: bool,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            model: "microsoft_fara-7b".to_string(),
            base_url: "http://localhost:1234/v1".to_string(),
            api_key: "lm-studio".to_string(),
            temperature: 0.1,
            max_tokens: 768,
            request_timeout_secs: 120,
            top_p: None,
        }
    }
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            max_rounds: 20,
            viewport_width: 1440,
            viewport_height: 900,
        }
    }
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            headless: true,
            executable: None,
            no_sandbox: false,
        }
    }
}

impl Default for ReportingSettings {
    fn default() -> Self {
        Self {
            reports_dir: PathBuf::from("reports"),
            screenshots_dir: PathBuf::from("screenshots"),
            save_screenshots: true,
            output_format: ReportFormat::Json,
            embed_screenshots: false,
        }
    }
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            parallel_workers: 1,
        }
    }
}

impl ModelSettings {
    /// LM Studio serves on port 1234 and accepts the `lm-studio` key.
    pub fn is_local_endpoint(&self) -> bool {
        self.base_url.contains(":1234") || self.api_key == "lm-studio"
    }

    pub fn effective_top_p(&self) -> Option<f32> {
        self.top_p
            .or_else(|| self.is_local_endpoint().then_some(LOCAL_TOP_P))
    }

    pub fn client_config(&self) -> OpenAiConfig {
        OpenAiConfig {
            base_url: self.base_url.trim_end_matches('/').to_string(),
            api_key: self.api_key.clone(),
            model: self.model.clone(),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            top_p: self.effective_top_p(),
            timeout: Duration::from_secs(self.request_timeout_secs),
        }
    }
}

impl ReportingSettings {
    pub fn report_options(&self) -> ReportOptions {
        ReportOptions::new(self.output_format).embed_screenshots(self.embed_screenshots)
    }
}

impl AgentSettings {
    pub fn viewport(&self) -> Viewport {
        Viewport::new(self.viewport_width, self.viewport_height)
    }
}

impl Config {
    /// Apply `E2E_PILOT_BASE_URL`, `E2E_PILOT_API_KEY` and `E2E_PILOT_MODEL`.
    pub fn apply_env_overrides(&mut self) {
        if let Some(base_url) = env_value("E2E_PILOT_BASE_URL") {
            self.model.base_url = base_url.trim_end_matches('/').to_string();
        }
        if let Some(api_key) = env_value("E2E_PILOT_API_KEY") {
            self.model.api_key = api_key;
        }
        if let Some(model) = env_value("E2E_PILOT_MODEL") {
            self.model.model = model;
        }
    }

    /// Round-controller settings derived from this configuration.
    pub fn agent_loop_config(&self) -> AgentLoopConfig {
        let config = AgentLoopConfig::default()
            .max_rounds(self.agent.max_rounds)
            .viewport(self.agent.viewport())
            .click_fallback(self.heuristics.click_fallback)
            .extended(self.heuristics.extended_actions);
        if self.reporting.save_screenshots {
            config.screenshots_dir(self.reporting.screenshots_dir.clone())
        } else {
            config
        }
    }
}

fn env_value(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
