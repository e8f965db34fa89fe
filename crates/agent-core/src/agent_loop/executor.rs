//! Executes validated actions against a [`BrowserDriver`].
//!
//! Browser failures never escape: they become an `Action failed: ...` result
//! the model sees next round.

use std::path::PathBuf;
use std::time::Duration;

use tracing::debug;

use super::config::AgentLoopConfig;
use super::state::{ScrollDirection, ScrollSample};
use crate::browser::{BrowserDriver, ElementInfo, LoadState, OptionChoice};
use crate::coords::Point;
use crate::envelope::ActionRequest;
use crate::errors::BrowserError;
use crate::urls::{navigation_target, search_url};

/// Element labels that mark a click as a form submission.
pub const SUBMIT_TERMS: [&str; 7] = [
    "sign up", "sign-in", "signin", "login", "submit", "confirm", "continue",
];

/// What happened when an action ran.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActionOutcome {
    /// First-person description fed back to the model.
    pub text: String,
    pub element: Option<ElementInfo>,
    /// The action probably submitted a form.
    pub submitted: bool,
    /// Visible text of the clicked element, if any.
    pub clicked_text: Option<String>,
    pub fact: Option<String>,
    /// Position read back after a scroll.
    pub scroll: Option<ScrollSample>,
}

impl ActionOutcome {
    fn said(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }
}

pub struct ActionExecutor<'a> {
    browser: &'a dyn BrowserDriver,
    config: &'a AgentLoopConfig,
}

impl<'a> ActionExecutor<'a> {
    pub fn new(browser: &'a dyn BrowserDriver, config: &'a AgentLoopConfig) -> Self {
        Self { browser, config }
    }

    /// Run `action`. `point` is the action's coordinate already mapped to
    /// viewport pixels.
    pub async fn execute(&self, action: &ActionRequest, point: Option<Point>) -> ActionOutcome {
        match self.try_execute(action, point).await {
            Ok(outcome) => outcome,
            Err(err) => {
                debug!(target: "round-controller", action = action.name(), error = %err, "action failed");
                ActionOutcome::said(format!("Action failed: {err}"))
            }
        }
    }

    async fn try_execute(
        &self,
        action: &ActionRequest,
        point: Option<Point>,
    ) -> Result<ActionOutcome, BrowserError> {
        let browser = self.browser;
        match action {
            ActionRequest::Key { keys } => {
                if keys.is_empty() {
                    return Ok(ActionOutcome::said("No keys provided."));
                }
                browser.press_keys(keys).await?;
                let submitted = keys
                    .iter()
                    .any(|k| k.eq_ignore_ascii_case("enter") || k.eq_ignore_ascii_case("return"));
                Ok(ActionOutcome {
                    submitted,
                    ..ActionOutcome::said(format!("I pressed keys: {}.", keys.join(", ")))
                })
            }
            ActionRequest::Type {
                text,
                press_enter,
                clear,
                ..
            } => {
                let element = match point {
                    Some(p) => Some(browser.click(p.x, p.y).await?),
                    None => None,
                };
                browser.type_text(text, *press_enter, *clear).await?;
                let mut said = format!("I typed '{text}'.");
                if *press_enter {
                    said.push_str(" I pressed Enter.");
                }
                Ok(ActionOutcome {
                    text: said,
                    element,
                    submitted: *press_enter,
                    ..ActionOutcome::default()
                })
            }
            ActionRequest::MouseMove { .. } => {
                let p = require(point)?;
                let info = browser.hover(p.x, p.y).await?;
                Ok(ActionOutcome {
                    text: format!("I moved the mouse to ({:.1}, {:.1}).{}", p.x, p.y, info.summary()),
                    element: Some(info),
                    ..ActionOutcome::default()
                })
            }
            ActionRequest::LeftClick { label, .. } => {
                let p = require(point)?;
                let info = browser.click(p.x, p.y).await?;
                Ok(clicked("clicked", p, info, label.as_deref()))
            }
            ActionRequest::DoubleClick { .. } => {
                let p = require(point)?;
                let info = browser.double_click(p.x, p.y).await?;
                Ok(clicked("double-clicked", p, info, None))
            }
            ActionRequest::RightClick { .. } => {
                let p = require(point)?;
                let info = browser.right_click(p.x, p.y).await?;
                Ok(ActionOutcome {
                    text: format!("I right-clicked at coordinates ({:.1}, {:.1}).{}", p.x, p.y, info.summary()),
                    element: Some(info),
                    ..ActionOutcome::default()
                })
            }
            ActionRequest::Scroll { pixels, .. } => {
                if let Some(p) = point {
                    browser.hover(p.x, p.y).await?;
                }
                // Positive pixels mean "up"; the driver takes a DOM delta.
                browser.scroll(-pixels).await?;
                let direction = if *pixels > 0.0 {
                    ScrollDirection::Up
                } else {
                    ScrollDirection::Down
                };
                let scroll = match browser.scroll_position().await {
                    Ok(pos) => Some(ScrollSample::new(direction, pos.y, pos.scroll_height)),
                    Err(err) => {
                        debug!(target: "round-controller", error = %err, "scroll position unavailable");
                        None
                    }
                };
                Ok(ActionOutcome {
                    text: format!("I scrolled {} by {} pixels.", direction.as_str(), pixels.abs()),
                    scroll,
                    ..ActionOutcome::default()
                })
            }
            ActionRequest::VisitUrl { url } => {
                let target = navigation_target(url);
                browser.goto(&target).await?;
                self.settle_navigation().await;
                Ok(ActionOutcome::said(format!("I navigated to '{target}'.")))
            }
            ActionRequest::WebSearch { query } => {
                browser.goto(&search_url(query)).await?;
                self.settle_navigation().await;
                Ok(ActionOutcome::said(format!("I searched for '{query}'.")))
            }
            ActionRequest::HistoryBack => {
                browser.go_back().await?;
                Ok(ActionOutcome::said("I went back to the previous page."))
            }
            ActionRequest::HistoryForward => {
                browser.go_forward().await?;
                Ok(ActionOutcome::said("I went forward to the next page."))
            }
            ActionRequest::Reload => {
                browser.reload().await?;
                Ok(ActionOutcome::said("I reloaded the page."))
            }
            ActionRequest::Wait { time } => {
                let secs = time.unwrap_or(1.0).clamp(0.0, self.config.max_wait_secs.max(0.0));
                if secs > 0.0 {
                    tokio::time::sleep(Duration::from_secs_f64(secs)).await;
                }
                Ok(ActionOutcome::said(format!("I waited for {secs} seconds.")))
            }
            ActionRequest::SelectOption {
                value,
                label,
                index,
                ..
            } => {
                let p = require(point)?;
                let element = browser.element_at(p.x, p.y).await.ok();
                let choice = OptionChoice {
                    value: value.clone(),
                    label: label.clone(),
                    index: *index,
                };
                let picked = browser.select_option(p.x, p.y, &choice).await?;
                Ok(ActionOutcome {
                    text: format!("I selected '{picked}'."),
                    element,
                    ..ActionOutcome::default()
                })
            }
            ActionRequest::FileUpload { files, .. } => {
                let p = require(point)?;
                let element = browser.element_at(p.x, p.y).await.ok();
                let paths: Vec<PathBuf> = files.iter().map(PathBuf::from).collect();
                browser.file_upload(p.x, p.y, &paths).await?;
                Ok(ActionOutcome {
                    text: format!("I attached {} file(s): {}.", paths.len(), files.join(", ")),
                    element,
                    ..ActionOutcome::default()
                })
            }
            ActionRequest::PauseAndMemorizeFact { fact } => Ok(ActionOutcome {
                fact: Some(fact.clone()).filter(|f| !f.trim().is_empty()),
                ..ActionOutcome::said("I memorized a fact.")
            }),
            ActionRequest::Terminate { .. } => Ok(ActionOutcome::said("Terminated.")),
        }
    }

    async fn settle_navigation(&self) {
        if let Err(err) = self
            .browser
            .wait_for_load_state(LoadState::NetworkIdle, self.config.navigation_load_timeout_ms)
            .await
        {
            debug!(target: "round-controller", error = %err, "network idle wait ignored");
        }
    }
}

fn require(point: Option<Point>) -> Result<Point, BrowserError> {
    point.ok_or_else(|| BrowserError::Unsupported("action needs a coordinate".into()))
}

fn clicked(verb: &str, p: Point, info: ElementInfo, label: Option<&str>) -> ActionOutcome {
    let clicked_text = info
        .display_text()
        .or_else(|| label.map(str::trim).filter(|l| !l.is_empty()).map(str::to_string));
    let submitted = is_submit(&info, label);
    ActionOutcome {
        text: format!(
            "I {verb} at coordinates ({:.1}, {:.1}).{}",
            p.x,
            p.y,
            info.summary()
        ),
        element: Some(info),
        submitted,
        clicked_text,
        fact: None,
        scroll: None,
    }
}

/// Whether a clicked element looks like a submit control.
pub fn is_submit(info: &ElementInfo, label: Option<&str>) -> bool {
    let haystack = [
        info.text.as_deref(),
        info.label.as_deref(),
        label,
        info.input_type.as_deref().filter(|t| t.eq_ignore_ascii_case("submit")),
    ]
    .into_iter()
    .flatten()
    .collect::<Vec<_>>()
    .join(" ")
    .to_lowercase();
    SUBMIT_TERMS.iter().any(|term| haystack.contains(term))
}
