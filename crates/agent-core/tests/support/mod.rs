//! In-memory browser used by the round controller tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::io::Cursor;
use std::path::PathBuf;
use std::sync::Mutex;

use agent_core::{
    BrowserDriver, BrowserError, ConsoleMessage, ElementInfo, LoadState, OptionChoice, ScrollPosition,
};
use async_trait::async_trait;
use image::{DynamicImage, ImageOutputFormat, RgbImage};

#[derive(Clone, Debug, Default)]
pub struct Page {
    pub title: String,
    pub body: String,
}

/// A clickable rectangle in viewport pixels.
#[derive(Clone, Debug)]
pub struct Target {
    pub x: (f64, f64),
    pub y: (f64, f64),
    pub element: ElementInfo,
    pub navigate_to: Option<String>,
}

#[derive(Default)]
struct Inner {
    pages: HashMap<String, Page>,
    targets: Vec<Target>,
    current: String,
    history: Vec<String>,
    calls: Vec<String>,
    console: Vec<ConsoleMessage>,
    screenshot: Option<Vec<u8>>,
    fail_goto: bool,
    scroll_y: f64,
    page_height: f64,
}

pub struct FakeBrowser {
    inner: Mutex<Inner>,
}

impl Default for FakeBrowser {
    fn default() -> Self {
        Self {
            inner: Mutex::new(Inner {
                page_height: 2000.0,
                ..Default::default()
            }),
        }
    }
}

impl FakeBrowser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scrollable document height; scrolling clamps to `[0, height]`.
    pub fn page_height(self, height: f64) -> Self {
        self.inner.lock().unwrap().page_height = height;
        self
    }

    pub fn page(self, url: &str, title: &str, body: &str) -> Self {
        self.inner.lock().unwrap().pages.insert(
            url.to_string(),
            Page {
                title: title.into(),
                body: body.into(),
            },
        );
        self
    }

    /// A button whose text is `text`, covering `[x0, x1] x [y0, y1]`.
    pub fn button(self, rect: (f64, f64, f64, f64), text: &str, navigate_to: Option<&str>) -> Self {
        let (x0, y0, x1, y1) = rect;
        self.inner.lock().unwrap().targets.push(Target {
            x: (x0, x1),
            y: (y0, y1),
            element: ElementInfo {
                found: true,
                tag: Some("button".into()),
                text: Some(text.into()),
                ..Default::default()
            },
            navigate_to: navigate_to.map(str::to_string),
        });
        self
    }

    /// Serve a blank PNG of the given size as every screenshot.
    pub fn screenshot_size(self, width: u32, height: u32) -> Self {
        let img = DynamicImage::ImageRgb8(RgbImage::new(width, height));
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, ImageOutputFormat::Png).unwrap();
        self.inner.lock().unwrap().screenshot = Some(out.into_inner());
        self
    }

    pub fn console_error(self, text: &str) -> Self {
        self.inner
            .lock()
            .unwrap()
            .console
            .push(ConsoleMessage::new("error", text));
        self
    }

    pub fn failing_navigation(self) -> Self {
        self.inner.lock().unwrap().fail_goto = true;
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.inner.lock().unwrap().calls.clone()
    }

    pub fn current(&self) -> String {
        self.inner.lock().unwrap().current.clone()
    }

    fn record(&self, call: String) {
        self.inner.lock().unwrap().calls.push(call);
    }

    fn navigate(&self, url: &str) {
        let mut inner = self.inner.lock().unwrap();
        let previous = std::mem::replace(&mut inner.current, url.to_string());
        if !previous.is_empty() {
            inner.history.push(previous);
        }
    }

    fn press(&self, kind: &str, x: f64, y: f64) -> ElementInfo {
        self.record(format!("{kind} {x:.1},{y:.1}"));
        let hit = {
            let inner = self.inner.lock().unwrap();
            inner
                .targets
                .iter()
                .find(|t| x >= t.x.0 && x <= t.x.1 && y >= t.y.0 && y <= t.y.1)
                .cloned()
        };
        match hit {
            Some(target) => {
                if let Some(url) = &target.navigate_to {
                    self.navigate(url);
                }
                target.element
            }
            None => ElementInfo::not_found(),
        }
    }

    fn current_page(&self) -> Page {
        let inner = self.inner.lock().unwrap();
        inner.pages.get(&inner.current).cloned().unwrap_or_default()
    }
}

#[async_trait]
impl BrowserDriver for FakeBrowser {
    async fn goto(&self, url: &str) -> Result<(), BrowserError> {
        self.record(format!("goto {url}"));
        if self.inner.lock().unwrap().fail_goto {
            return Err(BrowserError::navigation("net::ERR_NAME_NOT_RESOLVED"));
        }
        self.navigate(url);
        Ok(())
    }

    async fn current_url(&self) -> Result<String, BrowserError> {
        Ok(self.current())
    }

    async fn title(&self) -> Result<String, BrowserError> {
        Ok(self.current_page().title)
    }

    async fn body_text(&self, max_len: usize) -> Result<String, BrowserError> {
        Ok(self.current_page().body.chars().take(max_len).collect())
    }

    async fn screenshot(&self) -> Result<Vec<u8>, BrowserError> {
        self.inner
            .lock()
            .unwrap()
            .screenshot
            .clone()
            .ok_or_else(|| BrowserError::command("no screenshot configured"))
    }

    async fn click(&self, x: f64, y: f64) -> Result<ElementInfo, BrowserError> {
        Ok(self.press("click", x, y))
    }

    async fn double_click(&self, x: f64, y: f64) -> Result<ElementInfo, BrowserError> {
        Ok(self.press("double_click", x, y))
    }

    async fn right_click(&self, x: f64, y: f64) -> Result<ElementInfo, BrowserError> {
        self.record(format!("right_click {x:.1},{y:.1}"));
        Ok(ElementInfo::not_found())
    }

    async fn hover(&self, x: f64, y: f64) -> Result<ElementInfo, BrowserError> {
        self.record(format!("hover {x:.1},{y:.1}"));
        Ok(ElementInfo::not_found())
    }

    async fn type_text(
        &self,
        text: &str,
        press_enter: bool,
        clear_first: bool,
    ) -> Result<(), BrowserError> {
        self.record(format!("type {text} enter={press_enter} clear={clear_first}"));
        Ok(())
    }

    async fn press_keys(&self, keys: &[String]) -> Result<(), BrowserError> {
        self.record(format!("keys {}", keys.join("+")));
        Ok(())
    }

    async fn scroll(&self, delta_y: f64) -> Result<(), BrowserError> {
        self.record(format!("scroll {delta_y}"));
        let mut inner = self.inner.lock().unwrap();
        inner.scroll_y = (inner.scroll_y + delta_y).clamp(0.0, inner.page_height);
        Ok(())
    }

    async fn scroll_position(&self) -> Result<ScrollPosition, BrowserError> {
        let inner = self.inner.lock().unwrap();
        Ok(ScrollPosition {
            y: inner.scroll_y,
            scroll_height: inner.page_height,
            ..Default::default()
        })
    }

    async fn go_back(&self) -> Result<(), BrowserError> {
        self.record("back".into());
        let mut inner = self.inner.lock().unwrap();
        if let Some(previous) = inner.history.pop() {
            inner.current = previous;
        }
        Ok(())
    }

    async fn go_forward(&self) -> Result<(), BrowserError> {
        Err(BrowserError::Unsupported("forward".into()))
    }

    async fn reload(&self) -> Result<(), BrowserError> {
        self.record("reload".into());
        Ok(())
    }

    async fn select_option(
        &self,
        _x: f64,
        _y: f64,
        choice: &OptionChoice,
    ) -> Result<String, BrowserError> {
        Ok(choice.label.clone().unwrap_or_default())
    }

    async fn file_upload(&self, _x: f64, _y: f64, _files: &[PathBuf]) -> Result<(), BrowserError> {
        Ok(())
    }

    async fn wait_for_load_state(
        &self,
        _state: LoadState,
        _timeout_ms: u64,
    ) -> Result<(), BrowserError> {
        Ok(())
    }

    async fn console_messages(&self) -> Result<Vec<ConsoleMessage>, BrowserError> {
        Ok(std::mem::take(&mut self.inner.lock().unwrap().console))
    }

    async fn element_at(&self, _x: f64, _y: f64) -> Result<ElementInfo, BrowserError> {
        Ok(ElementInfo::not_found())
    }
}

/// `<tool_call>` envelope around `arguments`.
pub fn tool_call(arguments: serde_json::Value) -> String {
    format!(
        "<tool_call>\n{}\n</tool_call>",
        serde_json::json!({ "name": "computer_use", "arguments": arguments })
    )
}
