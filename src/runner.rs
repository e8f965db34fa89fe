//! Suite execution: one independent browser session per attempt.

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use agent_core::{AgentLoopConfig, BrowserDriver, ModelClient, RoundController};
use async_trait::async_trait;
use cdp_adapter::{CdpConfig, ChromiumDriver};
use chrono::Utc;
use pilot_core_types::{TestCase, TestRunResult, TestSuiteResult};
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::llm::{OpenAiClient, OpenAiConfig};

type ShutdownFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("browser launch failed: {0}")]
    Browser(String),

    #[error("model client unavailable: {0}")]
    Model(String),

    #[error("failed to prepare browser profile: {0}")]
    Profile(#[from] std::io::Error),
}

/// Collaborators for a single attempt.
pub struct Session {
    pub browser: Arc<dyn BrowserDriver>,
    pub model: Arc<dyn ModelClient>,
    shutdown: Option<ShutdownFuture>,
}

impl Session {
    pub fn new(browser: Arc<dyn BrowserDriver>, model: Arc<dyn ModelClient>) -> Self {
        Self {
            browser,
            model,
            shutdown: None,
        }
    }

    /// Run `shutdown` when the attempt is over.
    pub fn with_shutdown<F>(mut self, shutdown: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.shutdown = Some(Box::pin(shutdown));
        self
    }

    pub async fn close(self) {
        if let Some(shutdown) = self.shutdown {
            shutdown.await;
        }
    }
}

/// Opens independent sessions; runs never share one.
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn open(&self, case: &TestCase) -> Result<Session, SessionError>;
}

/// Launches Chromium with a private temporary profile for every attempt.
pub struct ChromiumSessionFactory {
    cdp: CdpConfig,
    model: OpenAiConfig,
    /// Explicit profile directory; disables the temporary profile.
    profile_dir: Option<PathBuf>,
}

impl ChromiumSessionFactory {
    pub fn new(cdp: CdpConfig, model: OpenAiConfig) -> Self {
        Self {
            cdp,
            model,
            profile_dir: None,
        }
    }

    pub fn with_profile_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.profile_dir = dir;
        self
    }
}

#[async_trait]
impl SessionFactory for ChromiumSessionFactory {
    async fn open(&self, case: &TestCase) -> Result<Session, SessionError> {
        let model = OpenAiClient::new(self.model.clone())
            .map_err(|err| SessionError::Model(err.to_string()))?;

        let (cdp, profile) = match &self.profile_dir {
            Some(dir) => (self.cdp.clone().with_profile_dir(dir.clone()), None),
            None => {
                let profile = tempfile::Builder::new()
                    .prefix("e2e-pilot-profile-")
                    .tempdir()?;
                (
                    self.cdp.clone().with_profile_dir(profile.path()),
                    Some(profile),
                )
            }
        };

        let driver = ChromiumDriver::launch(cdp)
            .await
            .map_err(|err| SessionError::Browser(err.to_string()))?;
        let driver = Arc::new(driver);
        info!(target: "suite-runner", case = %case.id, "browser session opened");

        let closer = driver.clone();
        Ok(Session::new(driver, Arc::new(model)).with_shutdown(async move {
            closer.close().await;
            drop(profile);
        }))
    }
}

/// Runs test cases with retries, timeouts and optional parallelism.
#[derive(Clone)]
pub struct SuiteRunner {
    loop_config: AgentLoopConfig,
    factory: Arc<dyn SessionFactory>,
    parallel: usize,
    cancel: CancellationToken,
}

impl SuiteRunner {
    pub fn new(loop_config: AgentLoopConfig, factory: Arc<dyn SessionFactory>) -> Self {
        Self {
            loop_config,
            factory,
            parallel: 1,
            cancel: CancellationToken::new(),
        }
    }

    /// Worker count; values below 1 mean sequential.
    pub fn with_parallelism(mut self, workers: usize) -> Self {
        self.parallel = workers.max(1);
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// One attempt at `case` in a fresh session.
    pub async fn run_case(&self, case: &TestCase, attempt: u32) -> TestRunResult {
        let started_at = Utc::now();
        if self.cancel.is_cancelled() {
            return stamped(TestRunResult::failed(case.clone(), "Run cancelled.", started_at), attempt);
        }

        let limit = match case.timeout_seconds.filter(|secs| *secs != 0.0) {
            Some(secs) => match Duration::try_from_secs_f64(secs) {
                Ok(limit) => Some((secs, limit)),
                Err(err) => {
                    error!(
                        target: "suite-runner",
                        case = %case.id,
                        timeout_secs = secs,
                        %err,
                        "invalid case timeout"
                    );
                    let result = TestRunResult::failed(
                        case.clone(),
                        format!("Runner exception: invalid timeout {secs}s ({err})"),
                        started_at,
                    );
                    return stamped(result, attempt);
                }
            },
            None => None,
        };

        let session = match self.factory.open(case).await {
            Ok(session) => session,
            Err(err) => {
                error!(target: "suite-runner", case = %case.id, %err, "failed to open session");
                let result =
                    TestRunResult::failed(case.clone(), format!("Runner exception: {err}"), started_at);
                return stamped(result, attempt);
            }
        };

        let token = self.cancel.child_token();
        let controller = RoundController::new(
            self.loop_config.clone(),
            session.browser.clone(),
            session.model.clone(),
        )
        .with_cancellation(token.clone());

        let result = match limit {
            Some((secs, limit)) => {
                let run = controller.run(case);
                tokio::pin!(run);
                tokio::select! {
                    result = &mut run => result,
                    _ = tokio::time::sleep(limit) => {
                        warn!(target: "suite-runner", case = %case.id, timeout_secs = secs, "case timed out");
                        token.cancel();
                        let mut result = run.await;
                        result.success = false;
                        result.reason = format!("Timed out after {secs}s.");
                        result
                    }
                }
            }
            None => controller.run(case).await,
        };

        session.close().await;
        stamped(result, attempt)
    }

    /// `retry_count + 1` attempts; the first success or the last failure.
    pub async fn run_with_retries(&self, case: &TestCase) -> TestRunResult {
        let attempts = case.retry_count + 1;
        let mut attempt = 0;
        loop {
            if attempt > 0 {
                info!(
                    target: "suite-runner",
                    case = %case.id,
                    attempt = attempt + 1,
                    attempts,
                    "retrying case"
                );
            }
            let result = self.run_case(case, attempt).await;
            attempt += 1;
            if result.success || attempt >= attempts || self.cancel.is_cancelled() {
                return result;
            }
        }
    }

    async fn run_one(&self, case: &TestCase, index: usize, total: usize) -> TestRunResult {
        if case.skip {
            info!(target: "suite-runner", case = %case.id, "skipping case");
            return TestRunResult::skipped(case.clone());
        }
        info!(target: "suite-runner", case = %case.id, index = index + 1, total, "running case");
        let result = self.run_with_retries(case).await;
        info!(
            target: "suite-runner",
            case = %case.id,
            success = result.success,
            reason = %result.reason,
            "case finished"
        );
        result
    }

    /// Run every case; results keep the input order.
    pub async fn run_all(&self, cases: Vec<TestCase>) -> TestSuiteResult {
        let started_at = Utc::now();
        let total = cases.len();
        let results = if self.parallel <= 1 {
            let mut results = Vec::with_capacity(total);
            for (index, case) in cases.iter().enumerate() {
                results.push(self.run_one(case, index, total).await);
            }
            results
        } else {
            self.run_parallel(cases).await
        };
        TestSuiteResult {
            results,
            started_at,
            finished_at: Utc::now(),
        }
    }

    async fn run_parallel(&self, cases: Vec<TestCase>) -> Vec<TestRunResult> {
        let total = cases.len();
        info!(target: "suite-runner", total, workers = self.parallel, "running cases in parallel");
        let permits = Arc::new(Semaphore::new(self.parallel));
        let mut workers = JoinSet::new();
        for (index, case) in cases.iter().cloned().enumerate() {
            let runner = self.clone();
            let permits = permits.clone();
            workers.spawn(async move {
                let _permit = permits.acquire_owned().await;
                let result = runner.run_one(&case, index, total).await;
                (index, result)
            });
        }

        let mut slots: Vec<Option<TestRunResult>> = vec![None; total];
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok((index, result)) => slots[index] = Some(result),
                Err(err) => error!(target: "suite-runner", %err, "case worker failed"),
            }
        }

        slots
            .into_iter()
            .zip(cases)
            .map(|(slot, case)| {
                slot.unwrap_or_else(|| {
                    TestRunResult::failed(case, "Runner exception: worker task failed", Utc::now())
                })
            })
            .collect()
    }
}

fn stamped(mut result: TestRunResult, attempt: u32) -> TestRunResult {
    result.retry_attempt = attempt;
    result
}
