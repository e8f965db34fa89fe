use std::env;
use std::path::PathBuf;

use pilot_core_types::Viewport;
use serde::{Deserialize, Serialize};

use crate::chrome::detect_chrome_executable;

/// Launch and tuning settings for one Chromium session.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CdpConfig {
    pub executable: PathBuf,
    /// Profile directory. Relative paths resolve against the working directory.
    pub user_data_dir: PathBuf,
    pub headless: bool,
    pub no_sandbox: bool,
    /// Deadline for a single CDP command.
    pub default_deadline_ms: u64,
    /// Deadline for `goto` to reach DOM ready.
    pub navigation_timeout_ms: u64,
    pub launch_timeout_ms: u64,
    /// Attach to an already running browser instead of launching one.
    pub websocket_url: Option<String>,
    /// `0` disables the keep-alive ping.
    pub heartbeat_interval_ms: u64,
    pub viewport: Viewport,
}

impl Default for CdpConfig {
    fn default() -> Self {
        Self {
            executable: detect_chrome_executable().unwrap_or_default(),
            user_data_dir: default_profile_dir(),
            headless: env_flag("E2E_PILOT_HEADLESS").unwrap_or(true),
            no_sandbox: env_flag("E2E_PILOT_DISABLE_SANDBOX").unwrap_or(false),
            default_deadline_ms: 30_000,
            navigation_timeout_ms: 30_000,
            launch_timeout_ms: 20_000,
            websocket_url: env_string("E2E_PILOT_CDP_WS"),
            heartbeat_interval_ms: 15_000,
            viewport: Viewport::default(),
        }
    }
}

impl CdpConfig {
    pub fn with_viewport(mut self, viewport: Viewport) -> Self {
        self.viewport = viewport;
        self
    }

    pub fn with_headless(mut self, headless: bool) -> Self {
        self.headless = headless;
        self
    }

    pub fn with_profile_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.user_data_dir = dir.into();
        self
    }
}

fn default_profile_dir() -> PathBuf {
    env_string("E2E_PILOT_CHROME_PROFILE")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("./.e2e-pilot-profile"))
}

fn env_string(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// `0`, `false`, `no` and `off` are false; any other non-empty value is true.
fn env_flag(key: &str) -> Option<bool> {
    env_string(key).map(|value| {
        !matches!(
            value.to_ascii_lowercase().as_str(),
            "0" | "false" | "no" | "off"
        )
    })
}
