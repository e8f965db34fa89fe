//! [`BrowserDriver`] over raw CDP commands on one page session.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use agent_core::{
    BrowserDriver, BrowserError, ConsoleMessage, ElementInfo, LoadState, OptionChoice, ScrollPosition,
};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::config::CdpConfig;
use crate::error::{AdapterError, AdapterErrorKind};
use crate::keys::{key_definition, modifier_bit, select_all_modifier, KeyDef, ALT, CTRL, META};
use crate::scripts;
use crate::transport::{CdpTransport, ChromiumTransport, CommandTarget, TransportEvent};

/// Console entries kept between two `console_messages` calls.
const CONSOLE_BUFFER: usize = 200;
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Page events the driver keeps track of between calls.
#[derive(Default)]
struct PageEvents {
    console: Mutex<Vec<ConsoleMessage>>,
    /// Lifecycle milestones seen since the current document started loading.
    lifecycle: Mutex<HashSet<String>>,
}

impl PageEvents {
    async fn ingest(&self, session: &str, event: TransportEvent) {
        if event.session_id.as_deref() != Some(session) {
            return;
        }
        let params = &event.params;
        match event.method.as_str() {
            "Runtime.consoleAPICalled" => {
                let kind = params.get("type").and_then(Value::as_str).unwrap_or("log");
                let text = params
                    .get("args")
                    .and_then(Value::as_array)
                    .map(|args| args.iter().map(remote_object_text).collect::<Vec<_>>().join(" "))
                    .unwrap_or_default();
                self.push_console(ConsoleMessage::new(kind, text)).await;
            }
            "Runtime.exceptionThrown" => {
                let details = params.get("exceptionDetails").unwrap_or(&Value::Null);
                let text = details
                    .pointer("/exception/description")
                    .or_else(|| details.get("text"))
                    .and_then(Value::as_str)
                    .unwrap_or("Uncaught exception");
                self.push_console(ConsoleMessage::new("error", text)).await;
            }
            "Log.entryAdded" => {
                let entry = params.get("entry").unwrap_or(&Value::Null);
                let level = entry.get("level").and_then(Value::as_str).unwrap_or("info");
                let text = entry.get("text").and_then(Value::as_str).unwrap_or_default();
                self.push_console(ConsoleMessage::new(level, text)).await;
            }
            "Page.lifecycleEvent" => {
                let Some(name) = params.get("name").and_then(Value::as_str) else {
                    return;
                };
                let mut seen = self.lifecycle.lock().await;
                if name == "init" {
                    seen.clear();
                }
                seen.insert(name.to_string());
            }
            _ => {}
        }
    }

    async fn push_console(&self, message: ConsoleMessage) {
        let mut console = self.console.lock().await;
        console.push(message);
        if console.len() > CONSOLE_BUFFER {
            let excess = console.len() - CONSOLE_BUFFER;
            console.drain(..excess);
        }
    }
}

fn remote_object_text(arg: &Value) -> String {
    match arg.get("value") {
        Some(Value::String(s)) => s.clone(),
        Some(other) if !other.is_null() => other.to_string(),
        _ => arg
            .get("description")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
    }
}

/// One browser tab driven over CDP.
pub struct ChromiumDriver {
    transport: Arc<dyn CdpTransport>,
    cfg: CdpConfig,
    target_id: String,
    session: String,
    events: Arc<PageEvents>,
    /// Last pointer position; wheel events are dispatched there.
    pointer: Mutex<(f64, f64)>,
    pump: JoinHandle<()>,
}

impl ChromiumDriver {
    /// Launch Chromium per `cfg` and open a fresh page.
    pub async fn launch(cfg: CdpConfig) -> Result<Self, AdapterError> {
        let transport = Arc::new(ChromiumTransport::new(cfg.clone()));
        Self::open(transport, cfg).await
    }

    /// Create and attach a page over an existing transport.
    pub async fn open(transport: Arc<dyn CdpTransport>, cfg: CdpConfig) -> Result<Self, AdapterError> {
        transport.start().await?;
        let created = transport
            .send_command(
                CommandTarget::Browser,
                "Target.createTarget",
                json!({ "url": "about:blank" }),
            )
            .await?;
        let target_id = string_field(&created, "targetId")?;
        let attached = transport
            .send_command(
                CommandTarget::Browser,
                "Target.attachToTarget",
                json!({ "targetId": target_id, "flatten": true }),
            )
            .await?;
        let session = string_field(&attached, "sessionId")?;

        let events = Arc::new(PageEvents::default());
        let pump = {
            let transport = transport.clone();
            let events = events.clone();
            let session = session.clone();
            tokio::spawn(async move {
                while let Some(event) = transport.next_event().await {
                    events.ingest(&session, event).await;
                }
                debug!(target: "cdp-driver", "event stream ended");
            })
        };

        let viewport = cfg.viewport;
        let driver = Self {
            transport,
            cfg,
            target_id,
            session,
            events,
            pointer: Mutex::new((
                f64::from(viewport.width) / 2.0,
                f64::from(viewport.height) / 2.0,
            )),
            pump,
        };

        for (method, params) in [
            ("Page.enable", json!({})),
            ("Runtime.enable", json!({})),
            ("Log.enable", json!({})),
            ("Page.setLifecycleEventsEnabled", json!({ "enabled": true })),
            (
                "Emulation.setDeviceMetricsOverride",
                json!({
                    "width": viewport.width,
                    "height": viewport.height,
                    "deviceScaleFactor": 1,
                    "mobile": false,
                }),
            ),
        ] {
            driver.page_command(method, params).await?;
        }

        info!(target: "cdp-driver", target = %driver.target_id, viewport = %viewport, "page attached");
        Ok(driver)
    }

    /// Close the page and release the browser.
    pub async fn close(&self) {
        if let Err(err) = self
            .transport
            .send_command(
                CommandTarget::Browser,
                "Target.closeTarget",
                json!({ "targetId": self.target_id }),
            )
            .await
        {
            debug!(target: "cdp-driver", %err, "closeTarget failed");
        }
        self.pump.abort();
        self.transport.shutdown().await;
    }

    async fn page_command(&self, method: &str, params: Value) -> Result<Value, AdapterError> {
        self.transport
            .send_command(CommandTarget::Session(self.session.clone()), method, params)
            .await
    }

    async fn evaluate(&self, expression: &str) -> Result<Value, AdapterError> {
        let response = self
            .page_command(
                "Runtime.evaluate",
                json!({
                    "expression": expression,
                    "returnByValue": true,
                    "awaitPromise": true,
                }),
            )
            .await?;
        if let Some(details) = response.get("exceptionDetails") {
            let text = details
                .pointer("/exception/description")
                .or_else(|| details.get("text"))
                .and_then(Value::as_str)
                .unwrap_or("script threw");
            return Err(AdapterError::new(AdapterErrorKind::Script).with_hint(text));
        }
        Ok(response.pointer("/result/value").cloned().unwrap_or(Value::Null))
    }

    async fn evaluate_string(&self, expression: &str) -> Result<String, AdapterError> {
        Ok(self
            .evaluate(expression)
            .await?
            .as_str()
            .unwrap_or_default()
            .to_string())
    }

    async fn ready_state(&self) -> Option<String> {
        self.evaluate_string("document.readyState").await.ok()
    }

    /// Poll `document.readyState` until it reaches `complete` (or
    /// `interactive` unless `complete_only`).
    async fn wait_ready(&self, complete_only: bool, timeout: Duration) -> Result<(), AdapterError> {
        let deadline = Instant::now() + timeout;
        loop {
            let ready = match self.ready_state().await.as_deref() {
                Some("complete") => true,
                Some("interactive") => !complete_only,
                _ => false,
            };
            if ready {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(AdapterError::new(AdapterErrorKind::NavTimeout)
                    .with_hint(format!("page not ready after {}ms", timeout.as_millis())));
            }
            sleep(POLL_INTERVAL).await;
        }
    }

    async fn wait_network_idle(&self, timeout: Duration) -> Result<(), AdapterError> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.events.lifecycle.lock().await.contains("networkIdle") {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(AdapterError::new(AdapterErrorKind::NavTimeout)
                    .with_hint(format!("network not idle after {}ms", timeout.as_millis())));
            }
            sleep(POLL_INTERVAL).await;
        }
    }

    async fn navigation_started(&self) {
        self.events.lifecycle.lock().await.clear();
    }

    fn navigation_timeout(&self) -> Duration {
        Duration::from_millis(self.cfg.navigation_timeout_ms)
    }

    async fn navigate(&self, url: &str) -> Result<(), AdapterError> {
        self.navigation_started().await;
        let response = self.page_command("Page.navigate", json!({ "url": url })).await?;
        if let Some(error_text) = response
            .get("errorText")
            .and_then(Value::as_str)
            .filter(|text| !text.is_empty())
        {
            return Err(AdapterError::new(AdapterErrorKind::Navigation)
                .with_hint(format!("{error_text} at {url}")));
        }
        self.wait_ready(false, self.navigation_timeout()).await
    }

    /// Move `delta` entries through session history. Returns `false` when
    /// there is no such entry.
    async fn history_step(&self, delta: i64) -> Result<bool, AdapterError> {
        let history = self
            .page_command("Page.getNavigationHistory", json!({}))
            .await?;
        let current = history
            .get("currentIndex")
            .and_then(Value::as_i64)
            .ok_or_else(|| AdapterError::internal("navigation history missing currentIndex"))?;
        let entry_id = usize::try_from(current + delta)
            .ok()
            .and_then(|index| history.get("entries")?.get(index)?.get("id")?.as_i64());
        let Some(entry_id) = entry_id else {
            return Ok(false);
        };

        self.navigation_started().await;
        self.page_command("Page.navigateToHistoryEntry", json!({ "entryId": entry_id }))
            .await?;
        self.wait_ready(false, self.navigation_timeout()).await?;
        Ok(true)
    }

    async fn inspect(&self, x: f64, y: f64) -> ElementInfo {
        let value = match self.evaluate(&scripts::inspect_point(x, y)).await {
            Ok(value) => value,
            Err(err) => {
                debug!(target: "cdp-driver", %err, x, y, "element inspection failed");
                return ElementInfo::not_found();
            }
        };
        serde_json::from_value(value).unwrap_or_default()
    }

    async fn mouse_event(
        &self,
        kind: &str,
        x: f64,
        y: f64,
        button: &str,
        click_count: u32,
    ) -> Result<(), AdapterError> {
        self.page_command(
            "Input.dispatchMouseEvent",
            json!({
                "type": kind,
                "x": x,
                "y": y,
                "button": button,
                "clickCount": click_count,
            }),
        )
        .await?;
        Ok(())
    }

    async fn move_to(&self, x: f64, y: f64) -> Result<(), AdapterError> {
        self.mouse_event("mouseMoved", x, y, "none", 0).await?;
        *self.pointer.lock().await = (x, y);
        Ok(())
    }

    /// Inspect, then press `button` `clicks` times at a point.
    async fn press_at(&self, x: f64, y: f64, button: &str, clicks: u32) -> Result<ElementInfo, AdapterError> {
        let info = self.inspect(x, y).await;
        self.move_to(x, y).await?;
        for count in 1..=clicks {
            self.mouse_event("mousePressed", x, y, button, count).await?;
            self.mouse_event("mouseReleased", x, y, button, count).await?;
        }
        Ok(info)
    }

    async fn key_down(&self, key: &KeyDef, modifiers: u32) -> Result<(), AdapterError> {
        let shortcut = modifiers & (CTRL | ALT | META) != 0;
        let text = key.text.as_deref().filter(|_| !shortcut);
        let mut params = json!({
            "type": if text.is_some() { "keyDown" } else { "rawKeyDown" },
            "key": key.key,
            "code": key.code,
            "windowsVirtualKeyCode": key.key_code,
            "nativeVirtualKeyCode": key.key_code,
            "modifiers": modifiers,
        });
        if let Some(text) = text {
            params["text"] = json!(text);
        }
        self.page_command("Input.dispatchKeyEvent", params).await?;
        Ok(())
    }

    async fn key_up(&self, key: &KeyDef, modifiers: u32) -> Result<(), AdapterError> {
        self.page_command(
            "Input.dispatchKeyEvent",
            json!({
                "type": "keyUp",
                "key": key.key,
                "code": key.code,
                "windowsVirtualKeyCode": key.key_code,
                "nativeVirtualKeyCode": key.key_code,
                "modifiers": modifiers,
            }),
        )
        .await?;
        Ok(())
    }

    async fn tap(&self, key: &KeyDef, modifiers: u32) -> Result<(), AdapterError> {
        self.key_down(key, modifiers).await?;
        self.key_up(key, modifiers).await
    }

    /// Press keys in order. Modifiers before the last key stay held until
    /// the sequence ends, so `["Control", "a"]` is a chord.
    async fn press_sequence(&self, keys: &[String]) -> Result<(), AdapterError> {
        let mut modifiers = 0;
        let mut held = Vec::new();
        for (i, name) in keys.iter().enumerate() {
            let key = key_definition(name);
            let last = i + 1 == keys.len();
            match modifier_bit(name) {
                Some(bit) if !last => {
                    modifiers |= bit;
                    self.key_down(&key, modifiers).await?;
                    held.push((key, bit));
                }
                _ => self.tap(&key, modifiers).await?,
            }
        }
        for (key, bit) in held.into_iter().rev() {
            modifiers &= !bit;
            self.key_up(&key, modifiers).await?;
        }
        Ok(())
    }

    async fn insert_text(&self, text: &str, press_enter: bool, clear_first: bool) -> Result<(), AdapterError> {
        if clear_first {
            self.tap(&key_definition("a"), select_all_modifier()).await?;
            self.tap(&key_definition("Backspace"), 0).await?;
        }
        if !text.is_empty() {
            self.page_command("Input.insertText", json!({ "text": text }))
                .await?;
        }
        if press_enter {
            self.tap(&key_definition("Enter"), 0).await?;
        }
        Ok(())
    }

    async fn wheel(&self, delta_y: f64) -> Result<(), AdapterError> {
        let (x, y) = *self.pointer.lock().await;
        self.page_command(
            "Input.dispatchMouseEvent",
            json!({
                "type": "mouseWheel",
                "x": x,
                "y": y,
                "deltaX": 0,
                "deltaY": delta_y,
            }),
        )
        .await?;
        Ok(())
    }

    async fn choose_option(&self, x: f64, y: f64, choice: &OptionChoice) -> Result<String, AdapterError> {
        let outcome = self.evaluate(&scripts::select_option(x, y, choice)).await?;
        if outcome.get("ok").and_then(Value::as_bool) == Some(true) {
            return Ok(outcome
                .get("label")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string());
        }
        match outcome.get("reason").and_then(Value::as_str) {
            Some("no_option") => Err(AdapterError::new(AdapterErrorKind::OptionNotFound)
                .with_hint(describe_choice(choice))
                .with_data(json!({ "available": outcome.get("available") }))),
            _ => Err(AdapterError::new(AdapterErrorKind::TargetNotFound)
                .with_hint(format!("no <select> at ({x:.1}, {y:.1})"))),
        }
    }

    async fn set_files(&self, x: f64, y: f64, files: &[PathBuf]) -> Result<(), AdapterError> {
        let mut resolved = Vec::with_capacity(files.len());
        for file in files {
            let path = std::fs::canonicalize(file).map_err(|err| {
                AdapterError::new(AdapterErrorKind::TargetNotFound)
                    .with_hint(format!("file {}: {err}", file.display()))
            })?;
            resolved.push(path.to_string_lossy().to_string());
        }

        let response = self
            .page_command(
                "Runtime.evaluate",
                json!({ "expression": scripts::file_input_at(x, y), "returnByValue": false }),
            )
            .await?;
        let object_id = response
            .pointer("/result/objectId")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                AdapterError::new(AdapterErrorKind::TargetNotFound)
                    .with_hint(format!("no file input at ({x:.1}, {y:.1})"))
            })?;
        self.page_command(
            "DOM.setFileInputFiles",
            json!({ "files": resolved, "objectId": object_id }),
        )
        .await?;
        Ok(())
    }

    async fn screenshot_png(&self) -> Result<Vec<u8>, AdapterError> {
        let response = self
            .page_command("Page.captureScreenshot", json!({ "format": "png" }))
            .await?;
        let data = response
            .get("data")
            .and_then(Value::as_str)
            .ok_or_else(|| AdapterError::internal("missing screenshot data"))?;
        STANDARD
            .decode(data)
            .map_err(|err| AdapterError::internal(err.to_string()))
    }
}

impl Drop for ChromiumDriver {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

fn string_field(value: &Value, field: &str) -> Result<String, AdapterError> {
    value
        .get(field)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| AdapterError::internal(format!("response missing {field}")))
}

fn describe_choice(choice: &OptionChoice) -> String {
    choice
        .value
        .clone()
        .or_else(|| choice.label.clone())
        .or_else(|| choice.index.map(|i| format!("index {i}")))
        .unwrap_or_else(|| "no option requested".to_string())
}

#[async_trait]
impl BrowserDriver for ChromiumDriver {
    async fn goto(&self, url: &str) -> Result<(), BrowserError> {
        debug!(target: "cdp-driver", url, "navigate");
        Ok(self.navigate(url).await?)
    }

    async fn current_url(&self) -> Result<String, BrowserError> {
        Ok(self.evaluate_string("location.href").await?)
    }

    async fn title(&self) -> Result<String, BrowserError> {
        Ok(self.evaluate_string("document.title").await?)
    }

    async fn body_text(&self, max_len: usize) -> Result<String, BrowserError> {
        Ok(self.evaluate_string(&scripts::body_text(max_len)).await?)
    }

    async fn screenshot(&self) -> Result<Vec<u8>, BrowserError> {
        Ok(self.screenshot_png().await?)
    }

    async fn click(&self, x: f64, y: f64) -> Result<ElementInfo, BrowserError> {
        Ok(self.press_at(x, y, "left", 1).await?)
    }

    async fn double_click(&self, x: f64, y: f64) -> Result<ElementInfo, BrowserError> {
        Ok(self.press_at(x, y, "left", 2).await?)
    }

    async fn right_click(&self, x: f64, y: f64) -> Result<ElementInfo, BrowserError> {
        Ok(self.press_at(x, y, "right", 1).await?)
    }

    async fn hover(&self, x: f64, y: f64) -> Result<ElementInfo, BrowserError> {
        let info = self.inspect(x, y).await;
        self.move_to(x, y).await?;
        Ok(info)
    }

    async fn type_text(
        &self,
        text: &str,
        press_enter: bool,
        clear_first: bool,
    ) -> Result<(), BrowserError> {
        Ok(self.insert_text(text, press_enter, clear_first).await?)
    }

    async fn press_keys(&self, keys: &[String]) -> Result<(), BrowserError> {
        Ok(self.press_sequence(keys).await?)
    }

    async fn scroll(&self, delta_y: f64) -> Result<(), BrowserError> {
        Ok(self.wheel(delta_y).await?)
    }

    async fn scroll_position(&self) -> Result<ScrollPosition, BrowserError> {
        let value = self.evaluate(scripts::SCROLL_POSITION).await?;
        serde_json::from_value(value).map_err(|err| BrowserError::command(err.to_string()))
    }

    async fn go_back(&self) -> Result<(), BrowserError> {
        if !self.history_step(-1).await? {
            debug!(target: "cdp-driver", "no previous history entry");
        }
        Ok(())
    }

    async fn go_forward(&self) -> Result<(), BrowserError> {
        if !self.history_step(1).await? {
            debug!(target: "cdp-driver", "no next history entry");
        }
        Ok(())
    }

    async fn reload(&self) -> Result<(), BrowserError> {
        self.navigation_started().await;
        self.page_command("Page.reload", json!({}))
            .await
            .map_err(BrowserError::from)?;
        Ok(self.wait_ready(false, self.navigation_timeout()).await?)
    }

    async fn select_option(
        &self,
        x: f64,
        y: f64,
        choice: &OptionChoice,
    ) -> Result<String, BrowserError> {
        Ok(self.choose_option(x, y, choice).await?)
    }

    async fn file_upload(&self, x: f64, y: f64, files: &[PathBuf]) -> Result<(), BrowserError> {
        Ok(self.set_files(x, y, files).await?)
    }

    async fn wait_for_load_state(
        &self,
        state: LoadState,
        timeout_ms: u64,
    ) -> Result<(), BrowserError> {
        let timeout = Duration::from_millis(timeout_ms);
        let result = match state {
            LoadState::DomContentLoaded => self.wait_ready(false, timeout).await,
            LoadState::Load => self.wait_ready(true, timeout).await,
            LoadState::NetworkIdle => self.wait_network_idle(timeout).await,
        };
        if let Err(err) = &result {
            debug!(target: "cdp-driver", state = state.as_str(), %err, "load state not reached");
        }
        Ok(result?)
    }

    async fn console_messages(&self) -> Result<Vec<ConsoleMessage>, BrowserError> {
        Ok(std::mem::take(&mut *self.events.console.lock().await))
    }

    async fn element_at(&self, x: f64, y: f64) -> Result<ElementInfo, BrowserError> {
        let value = self.evaluate(&scripts::inspect_point(x, y)).await?;
        serde_json::from_value(value).map_err(|err| {
            warn!(target: "cdp-driver", %err, "unexpected element description");
            BrowserError::command(err.to_string())
        })
    }
}
