//! Round controller: the observe-decide-act loop for one test case.
//!
//! ```text
//! Init -> (BuildContext -> Invoke -> ParseAction -> [Repair] -> Execute -> Observe -> Verdict)* -> Terminal
//! ```
//!
//! Every exit path produces a [`TestRunResult`] with a non-empty reason and
//! the traces recorded so far.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use pilot_core_types::{ActionTrace, TestCase, TestRunResult};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::config::AgentLoopConfig;
use super::executor::{ActionExecutor, ActionOutcome};
use super::prompt::{
    click_hint, format_repair_prompt, format_round_context, format_system_prompt,
    format_task_brief, snippet, RoundContext,
};
use super::state::{Observation, RoundState, ScrollSample};
use crate::browser::{BrowserDriver, LoadState};
use crate::coords::to_viewport;
use crate::envelope::{parse_envelope, terminate_status, ActionAllowList, ActionRequest, RawAction};
use crate::errors::{AgentError, ProtocolError};
use crate::expectations::click_targets;
use crate::llm_provider::{complete_with_retry, ModelClient, ModelTurn};
use crate::loop_detector::{bucket, ActionSignature};
use crate::verdict::{
    check_auto_pass, check_error_page, check_scoped_text_missing, missing_scoped_text,
    AutoPassInputs, Verdict,
};
use crate::vision::prepare_prompt_image;

/// Console errors attached to each trace.
const TRACE_CONSOLE_ERRORS: usize = 3;
/// Characters of an unusable reply echoed back in the repair prompt.
const REPAIR_EXCERPT_CHARS: usize = 200;
const SUMMARY_CHARS: usize = 160;

/// Drives one test case at a time against a browser and a model.
pub struct RoundController {
    config: AgentLoopConfig,
    browser: Arc<dyn BrowserDriver>,
    model: Arc<dyn ModelClient>,
    allow: ActionAllowList,
    cancel: CancellationToken,
}

impl RoundController {
    /// A controller with a fresh, uncancelled token.
    pub fn new(
        config: AgentLoopConfig,
        browser: Arc<dyn BrowserDriver>,
        model: Arc<dyn ModelClient>,
    ) -> Self {
        let allow = config.allow_list();
        Self {
            config,
            browser,
            model,
            allow,
            cancel: CancellationToken::new(),
        }
    }

    /// Use `token` for cooperative cancellation.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Clone of the token; cancelling it stops the current run.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn config(&self) -> &AgentLoopConfig {
        &self.config
    }

    /// Run `tc` to completion. Never fails: errors become failed results.
    pub async fn run(&self, tc: &TestCase) -> TestRunResult {
        let started_at = Utc::now();
        let mut state = RoundState::new(&self.config);
        let mut traces = Vec::new();

        let verdict = match self.drive(tc, &mut state, &mut traces).await {
            Ok(verdict) => verdict,
            Err(err) => {
                warn!(target: "round-controller", case = %tc.id, round = state.round, error = %err, "run aborted");
                Verdict::fail(err.to_string())
            }
        };
        info!(
            target: "round-controller",
            case = %tc.id,
            passed = verdict.passed,
            rounds = state.round,
            reason = %verdict.reason,
            "run finished"
        );

        TestRunResult {
            case: tc.clone(),
            success: verdict.passed,
            skipped: false,
            reason: verdict.reason,
            started_at,
            finished_at: Utc::now(),
            actions: traces,
            facts: state.facts,
            retry_attempt: 0,
            final_url: Some(state.url).filter(|url| !url.is_empty()),
            console_errors: state.console_errors,
        }
    }

    /// Start the case, then run observe/decide/act rounds until a verdict,
    /// the round budget, or an error.
    async fn drive(
        &self,
        tc: &TestCase,
        state: &mut RoundState,
        traces: &mut Vec<ActionTrace>,
    ) -> Result<Verdict, AgentError> {
        let max_rounds = tc.max_rounds.unwrap_or(self.config.max_rounds).max(1);
        let shots_dir = self.prepare_screenshot_dir(tc).await;

        if let Some(start) = tc.start_url.as_deref().filter(|url| !url.trim().is_empty()) {
            info!(target: "round-controller", case = %tc.id, url = start, "opening start page");
            self.guard(self.browser.goto(start)).await??;
            self.wait_quietly(LoadState::NetworkIdle, self.config.start_load_timeout_ms)
                .await?;
        }
        self.pause(self.config.initial_settle_ms).await?;

        let observation = self.observe(&state.url).await?;
        self.adopt_screenshot(state, observation.screenshot.as_deref());
        state.observe(observation);
        state.page_changed = false;
        state.verify_current_page(tc);
        state.detector.record_visit(&state.url_norm);

        let system = format_system_prompt(state.last_image_size, &self.allow);
        let brief = format_task_brief(tc);
        let targets = click_targets(tc);

        for round in 1..=max_rounds {
            state.round = round;
            debug!(target: "round-controller", case = %tc.id, round, max_rounds, url = %state.url, "round started");

            let page_changed = std::mem::take(&mut state.page_changed);
            if page_changed {
                state.detector.clear_regions();
                if let Some(verdict) = check_scoped_text_missing(tc, &state.url, &state.body) {
                    return Ok(self.auto_terminate(state, traces, verdict));
                }
            }

            if let Some(verdict) = check_auto_pass(AutoPassInputs {
                tc,
                url: &state.url,
                body: &state.body,
                verified: &state.verified,
                transitions: &state.transitions,
                allow_click_fallback: self.config.allow_click_fallback,
            }) {
                return Ok(self.auto_terminate(state, traces, verdict));
            }

            let just_submitted = std::mem::take(&mut state.just_submitted);
            let context = RoundContext {
                url: &state.url,
                rounds_left: max_rounds - round + 1,
                page_changed,
                just_submitted,
                left_start: state.left_start(tc),
                click_hint: click_hint(&targets, &state.clicked, &state.body),
                verified: state.verified.recent(3),
                recent_actions: state.recent_summaries(self.config.recent_actions),
                warnings: state.detector.repeat_warnings(),
                facts: &state.facts,
                scroll_position: state.scrolls.last().map(ScrollSample::describe),
                scroll_oscillating: state.scrolls.oscillating(),
                title: &state.title,
                snippet: snippet(&state.body, self.config.context_snippet_chars),
            };
            let turn = ModelTurn::text(format_round_context(&context))
                .with_image(state.prompt_image.clone());

            let (action, raw, reply) = self.decide(&system, &brief, &turn, round).await?;

            if let ActionRequest::Terminate { status, reason } = &action {
                let status = terminate_status(status.as_deref());
                let passed = status == "success";
                let reason = reason
                    .as_deref()
                    .map(str::trim)
                    .filter(|r| !r.is_empty())
                    .map(str::to_string)
                    .unwrap_or_else(|| {
                        if passed {
                            "Completed successfully.".to_string()
                        } else {
                            format!("Model terminated with status: {status}")
                        }
                    });
                traces.push(ActionTrace::new(
                    round,
                    "terminate",
                    raw.arguments_value(),
                    reply,
                    reason.clone(),
                    state.url.clone(),
                ));
                info!(target: "round-controller", case = %tc.id, round, status = %status, "model terminated");
                return Ok(Verdict { passed, reason });
            }

            let point = action
                .coordinate()
                .map(|c| to_viewport(c, state.last_image_size, self.config.viewport));
            let from_url = state.url_norm.clone();
            let started = Instant::now();
            let executor = ActionExecutor::new(&*self.browser, &self.config);
            let outcome = self.guard(executor.execute(&action, point)).await?;
            info!(
                target: "round-controller",
                case = %tc.id,
                round,
                action = action.name(),
                result = %snippet(&outcome.text, SUMMARY_CHARS),
                "action executed"
            );

            if outcome.submitted {
                state.just_submitted = true;
            }
            if let Some(fact) = &outcome.fact {
                state.record_fact(fact.clone());
            }
            if let Some(text) = &outcome.clicked_text {
                state.clicked.push(text.clone());
            }
            if let Some(sample) = outcome.scroll {
                state.scrolls.push(sample);
            }
            state.action_summaries.push(format!(
                "- Round {round}: {} -> {}",
                action.name(),
                snippet(&outcome.text, SUMMARY_CHARS)
            ));

            state.detector.record_signature(ActionSignature::new(
                action.name(),
                from_url.clone(),
                point.map(bucket),
                action.scroll_pixels(),
            ));
            if let Some(point) = point {
                state.detector.record_interaction(action.name(), point);
            }
            if let Some(abort) = state
                .detector
                .check_streak()
                .or_else(|| state.detector.check_regions())
            {
                let mut trace = self.action_trace(state, round, &raw, reply, &outcome);
                trace.duration_ms = Some(started.elapsed().as_secs_f64() * 1000.0);
                traces.push(trace);
                return Ok(self.auto_terminate(state, traces, Verdict::fail(abort.to_string())));
            }

            if !action.is_navigation() {
                self.wait_quietly(LoadState::DomContentLoaded, self.config.action_load_timeout_ms)
                    .await?;
            }
            self.pause(self.config.action_settle_ms).await?;

            let observation = self.observe(&state.url).await?;
            let screenshot_path = match (&shots_dir, observation.screenshot.as_deref()) {
                (Some(dir), Some(bytes)) => self.save_screenshot(dir, round, bytes).await,
                _ => None,
            };
            self.adopt_screenshot(state, observation.screenshot.as_deref());
            let changed = state.observe(observation);
            if changed || action.is_navigation() {
                state.detector.record_visit(&state.url_norm);
            }
            if changed {
                state.record_transition(from_url, action.name(), outcome.clicked_text.clone());
                let newly = state.verify_current_page(tc);
                debug!(target: "round-controller", case = %tc.id, round, url = %state.url, verified = newly, "page changed");
            }

            let mut trace = self.action_trace(state, round, &raw, reply, &outcome);
            trace.duration_ms = Some(started.elapsed().as_secs_f64() * 1000.0);
            trace.screenshot_path = screenshot_path;
            traces.push(trace);

            if let Some(verdict) = check_error_page(tc, &state.url, &state.title, &state.body) {
                return Ok(self.auto_terminate(state, traces, verdict));
            }

            let missing = missing_scoped_text(tc, &state.url, &state.body);
            if let Some(abort) = state
                .detector
                .check_revisit(&state.url_norm, missing.as_deref())
            {
                return Ok(self.auto_terminate(state, traces, Verdict::fail(abort.to_string())));
            }
        }

        Ok(Verdict::fail("Max rounds reached."))
    }

    /// Invoke the model and decode its action, with one repair attempt.
    async fn decide(
        &self,
        system: &str,
        brief: &str,
        turn: &ModelTurn,
        round: u32,
    ) -> Result<(ActionRequest, RawAction, String), AgentError> {
        let reply = self.invoke(system, brief, turn).await?;
        let problem = match self.decode(&reply) {
            Ok((action, raw)) => return Ok((action, raw, reply)),
            Err(problem) => problem,
        };

        warn!(target: "round-controller", round, problem = %problem, "unusable reply; requesting repair");
        let excerpt: String = reply.chars().take(REPAIR_EXCERPT_CHARS).collect();
        let repair = ModelTurn::text(format_repair_prompt(
            &self.allow,
            &problem.to_string(),
            &excerpt,
        ))
        .with_image(turn.image.clone());
        let repaired = self.invoke(system, brief, &repair).await?;
        match self.decode(&repaired) {
            Ok((action, raw)) => Ok((action, raw, repaired)),
            Err(problem) => {
                warn!(target: "round-controller", round, problem = %problem, "repair failed");
                Err(AgentError::NoValidToolCall)
            }
        }
    }

    /// One model call with transport retries, abandoned on cancellation.
    async fn invoke(&self, system: &str, brief: &str, turn: &ModelTurn) -> Result<String, AgentError> {
        let reply = self
            .guard(complete_with_retry(
                &*self.model,
                &self.config.retry,
                system,
                brief,
                turn,
            ))
            .await??;
        Ok(reply)
    }

    fn decode(&self, reply: &str) -> Result<(ActionRequest, RawAction), ProtocolError> {
        let raw = parse_envelope(reply).ok_or(ProtocolError::Unparseable)?;
        let action = ActionRequest::from_raw(&raw, &self.allow)?;
        Ok((action, raw))
    }

    /// Trace for an executed action on the current page.
    fn action_trace(
        &self,
        state: &RoundState,
        round: u32,
        raw: &RawAction,
        reply: String,
        outcome: &ActionOutcome,
    ) -> ActionTrace {
        let mut trace = ActionTrace::new(
            round,
            raw.name.clone(),
            raw.arguments_value(),
            reply,
            outcome.text.clone(),
            state.url.clone(),
        );
        trace.element_info = outcome
            .element
            .as_ref()
            .and_then(|info| serde_json::to_value(info).ok());
        let errors = state.recent_console_errors(TRACE_CONSOLE_ERRORS);
        trace.console_errors = (!errors.is_empty()).then_some(errors);
        trace
    }

    /// Append the `auto_terminate` trace and hand back `verdict`.
    fn auto_terminate(
        &self,
        state: &RoundState,
        traces: &mut Vec<ActionTrace>,
        verdict: Verdict,
    ) -> Verdict {
        let status = if verdict.passed { "success" } else { "failure" };
        info!(
            target: "round-controller",
            round = state.round,
            status,
            reason = %verdict.reason,
            "automatic verdict"
        );
        traces.push(ActionTrace::new(
            state.round,
            "auto_terminate",
            json!({ "auto": true, "status": status, "reason": verdict.reason }),
            "",
            verdict.reason.clone(),
            state.url.clone(),
        ));
        verdict
    }

    /// Read the page. Individual read failures are logged and replaced with
    /// empty values; only cancellation is fatal.
    async fn observe(&self, previous_url: &str) -> Result<Observation, AgentError> {
        let url = match self.guard(self.browser.current_url()).await? {
            Ok(url) => url,
            Err(err) => {
                warn!(target: "round-controller", error = %err, "could not read current url");
                previous_url.to_string()
            }
        };
        let title = self.tolerant("title", self.browser.title()).await?;
        let body = self
            .tolerant("body text", self.browser.body_text(self.config.body_text_limit))
            .await?;
        let console_errors = self
            .tolerant("console messages", self.browser.console_messages())
            .await?
            .into_iter()
            .filter(|message| message.is_error())
            .map(|message| message.text)
            .collect();
        let screenshot = match self.guard(self.browser.screenshot()).await? {
            Ok(bytes) => Some(bytes),
            Err(err) => {
                warn!(target: "round-controller", error = %err, "screenshot failed");
                None
            }
        };
        Ok(Observation {
            url,
            title,
            body,
            console_errors,
            screenshot,
        })
    }

    /// Await a page read; a failed read yields `T::default()`.
    async fn tolerant<T, F>(&self, what: &str, fut: F) -> Result<T, AgentError>
    where
        T: Default,
        F: Future<Output = Result<T, crate::errors::BrowserError>>,
    {
        Ok(match self.guard(fut).await? {
            Ok(value) => value,
            Err(err) => {
                warn!(target: "round-controller", what, error = %err, "page read failed");
                T::default()
            }
        })
    }

    /// Resize `bytes` for the next prompt. No usable image clears the
    /// image size, so coordinates pass through unscaled.
    fn adopt_screenshot(&self, state: &mut RoundState, bytes: Option<&[u8]>) {
        let prepared = bytes.map(|bytes| prepare_prompt_image(bytes, &self.config.image));
        match prepared {
            Some(Ok(image)) => {
                state.last_image_size = Some(image.size);
                state.prompt_image = Some(image);
            }
            Some(Err(err)) => {
                warn!(target: "round-controller", error = %err, "screenshot not usable; coordinates pass through unscaled");
                state.last_image_size = None;
                state.prompt_image = None;
            }
            None => {
                state.last_image_size = None;
                state.prompt_image = None;
            }
        }
    }

    /// `<screenshots_dir>/<case-id>-<timestamp>`, or `None` when disabled.
    async fn prepare_screenshot_dir(&self, tc: &TestCase) -> Option<PathBuf> {
        let root = self.config.screenshots_dir.as_ref()?;
        let safe_id: String = tc
            .id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        let dir = root.join(format!("{safe_id}-{}", Utc::now().format("%Y%m%d-%H%M%S")));
        match tokio::fs::create_dir_all(&dir).await {
            Ok(()) => Some(dir),
            Err(err) => {
                warn!(target: "round-controller", dir = %dir.display(), error = %err, "screenshots disabled");
                None
            }
        }
    }

    /// `step-NN.png`
    async fn save_screenshot(&self, dir: &Path, round: u32, bytes: &[u8]) -> Option<PathBuf> {
        let path = dir.join(format!("step-{round:02}.png"));
        match tokio::fs::write(&path, bytes).await {
            Ok(()) => Some(path),
            Err(err) => {
                warn!(target: "round-controller", path = %path.display(), error = %err, "failed to save screenshot");
                None
            }
        }
    }

    /// Wait for a load state, ignoring timeouts and driver errors.
    async fn wait_quietly(&self, state: LoadState, timeout_ms: u64) -> Result<(), AgentError> {
        if let Err(err) = self
            .guard(self.browser.wait_for_load_state(state, timeout_ms))
            .await?
        {
            debug!(target: "round-controller", state = state.as_str(), error = %err, "load wait ignored");
        }
        Ok(())
    }

    async fn pause(&self, ms: u64) -> Result<(), AgentError> {
        self.guard(tokio::time::sleep(Duration::from_millis(ms)))
            .await
    }

    /// Await `fut` unless the run is cancelled first.
    async fn guard<T>(&self, fut: impl Future<Output = T>) -> Result<T, AgentError> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(AgentError::Cancelled),
            out = fut => Ok(out),
        }
    }
}
