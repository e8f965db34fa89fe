use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::BrowserError;

/// Page readiness milestones a driver can wait for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadState {
    Load,
    DomContentLoaded,
    NetworkIdle,
}

impl LoadState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoadState::Load => "load",
            LoadState::DomContentLoaded => "domcontentloaded",
            LoadState::NetworkIdle => "networkidle",
        }
    }
}

/// Inspection of the element under a point.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ElementInfo {
    pub found: bool,
    pub tag: Option<String>,
    #[serde(rename = "type")]
    pub input_type: Option<String>,
    pub role: Option<String>,
    pub text: Option<String>,
    #[serde(rename = "ariaChecked", alias = "aria_checked")]
    pub aria_checked: Option<String>,
    pub checked: Option<bool>,
    /// Accessible label or value, used for submit detection.
    pub label: Option<String>,
}

impl ElementInfo {
    pub fn not_found() -> Self {
        Self::default()
    }

    /// ` Element: tag=button, text='Confirm'` style summary, empty when
    /// nothing was found.
    pub fn summary(&self) -> String {
        if !self.found {
            return String::new();
        }
        let mut parts = Vec::new();
        if let Some(tag) = &self.tag {
            parts.push(format!("tag={tag}"));
        }
        if let Some(kind) = self.input_type.as_deref().filter(|s| !s.is_empty()) {
            parts.push(format!("type={kind}"));
        }
        if let Some(role) = self.role.as_deref().filter(|s| !s.is_empty()) {
            parts.push(format!("role={role}"));
        }
        if let Some(aria) = self.aria_checked.as_deref().filter(|s| !s.is_empty()) {
            parts.push(format!("aria-checked={aria}"));
        }
        if let Some(checked) = self.checked {
            parts.push(format!("checked={checked}"));
        }
        if let Some(text) = self.text.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            let short: String = text.chars().take(50).collect();
            parts.push(format!("text='{short}'"));
        }
        if parts.is_empty() {
            return String::new();
        }
        format!(" Element: {}", parts.join(", "))
    }

    /// Text used to describe what was clicked: text, then label.
    pub fn display_text(&self) -> Option<String> {
        [self.text.as_deref(), self.label.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .find(|s| !s.is_empty())
            .map(str::to_string)
    }
}

/// One console entry as reported by the page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsoleMessage {
    #[serde(rename = "type")]
    pub kind: String,
    pub text: String,
}

impl ConsoleMessage {
    pub fn new(kind: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            text: text.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.kind.eq_ignore_ascii_case("error")
    }
}

/// Document scroll offset and scrollable height, in CSS pixels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScrollPosition {
    pub x: f64,
    pub y: f64,
    #[serde(rename = "scrollHeight", alias = "scroll_height")]
    pub scroll_height: f64,
    #[serde(rename = "viewportH", alias = "viewport_height")]
    pub viewport_height: f64,
}

/// How to pick an `<option>`; the first populated field wins.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptionChoice {
    pub value: Option<String>,
    pub label: Option<String>,
    pub index: Option<u32>,
}

/// Browser automation surface consumed by the round controller.
///
/// Coordinates are viewport pixels. `scroll` takes a DOM-convention delta
/// (positive scrolls down).
#[async_trait]
pub trait BrowserDriver: Send + Sync {
    async fn goto(&self, url: &str) -> Result<(), BrowserError>;

    async fn current_url(&self) -> Result<String, BrowserError>;

    async fn title(&self) -> Result<String, BrowserError>;

    async fn body_text(&self, max_len: usize) -> Result<String, BrowserError>;

    /// PNG bytes of the visible viewport.
    async fn screenshot(&self) -> Result<Vec<u8>, BrowserError>;

    async fn click(&self, x: f64, y: f64) -> Result<ElementInfo, BrowserError>;

    async fn double_click(&self, x: f64, y: f64) -> Result<ElementInfo, BrowserError>;

    async fn right_click(&self, x: f64, y: f64) -> Result<ElementInfo, BrowserError>;

    async fn hover(&self, x: f64, y: f64) -> Result<ElementInfo, BrowserError>;

    async fn type_text(
        &self,
        text: &str,
        press_enter: bool,
        clear_first: bool,
    ) -> Result<(), BrowserError>;

    async fn press_keys(&self, keys: &[String]) -> Result<(), BrowserError>;

    async fn scroll(&self, delta_y: f64) -> Result<(), BrowserError>;

    async fn scroll_position(&self) -> Result<ScrollPosition, BrowserError>;

    async fn go_back(&self) -> Result<(), BrowserError>;

    async fn go_forward(&self) -> Result<(), BrowserError>;

    async fn reload(&self) -> Result<(), BrowserError>;

    /// Select an option in the `<select>` at `(x, y)` and return its label.
    async fn select_option(
        &self,
        x: f64,
        y: f64,
        choice: &OptionChoice,
    ) -> Result<String, BrowserError>;

    async fn file_upload(&self, x: f64, y: f64, files: &[PathBuf]) -> Result<(), BrowserError>;

    async fn wait_for_load_state(&self, state: LoadState, timeout_ms: u64)
        -> Result<(), BrowserError>;

    /// Console messages received since the previous call. Draining.
    async fn console_messages(&self) -> Result<Vec<ConsoleMessage>, BrowserError>;

    /// Inspect the element at `(x, y)` without interacting with it.
    async fn element_at(&self, x: f64, y: f64) -> Result<ElementInfo, BrowserError>;
}
