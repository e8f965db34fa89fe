use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::warn;

use crate::errors::InferenceError;
use crate::vision::PromptImage;

/// The latest user turn: round context plus the prepared screenshot.
#[derive(Debug, Clone, Default)]
pub struct ModelTurn {
    pub text: String,
    pub image: Option<PromptImage>,
}

impl ModelTurn {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            image: None,
        }
    }

    pub fn with_image(mut self, image: Option<PromptImage>) -> Self {
        self.image = image;
        self
    }
}

/// Abstraction over chat-completion backends so multiple vendors can drive
/// the round controller.
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Return the raw reply text for one turn.
    ///
    /// `system` and `brief` are stable for the whole run; only `turn`
    /// changes between rounds.
    async fn complete(
        &self,
        system: &str,
        brief: &str,
        turn: &ModelTurn,
    ) -> Result<String, InferenceError>;
}

/// Retry schedule applied around [`ModelClient::complete`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Default: 3
    pub max_attempts: u32,
    /// Default: 2000
    pub base_delay_ms: u64,
    /// Default: 10000
    pub max_delay_ms: u64,
    /// Default: true
    pub retry_empty: bool,
    /// Default: true
    pub retry_transport: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 2_000,
            max_delay_ms: 10_000,
            retry_empty: true,
            retry_transport: true,
        }
    }
}

impl RetryPolicy {
    /// Same attempts, no waiting. Used by tests.
    pub fn immediate() -> Self {
        Self {
            base_delay_ms: 0,
            max_delay_ms: 0,
            ..Self::default()
        }
    }

    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    pub fn is_retryable(&self, err: &InferenceError) -> bool {
        match err {
            InferenceError::EmptyResponse => self.retry_empty,
            InferenceError::Transport(_) => self.retry_transport,
            InferenceError::Rejected(_) => false,
        }
    }

    /// Delay after failed attempt `attempt` (1-based): base * 2^(n-1), capped.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let delay = self
            .base_delay_ms
            .saturating_mul(1u64 << exponent)
            .min(self.max_delay_ms);
        Duration::from_millis(delay)
    }
}

/// Call `client` under `policy`. Blank replies count as
/// [`InferenceError::EmptyResponse`].
pub async fn complete_with_retry(
    client: &dyn ModelClient,
    policy: &RetryPolicy,
    system: &str,
    brief: &str,
    turn: &ModelTurn,
) -> Result<String, InferenceError> {
    let attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        let outcome = match client.complete(system, brief, turn).await {
            Ok(text) if text.trim().is_empty() => Err(InferenceError::EmptyResponse),
            other => other,
        };
        match outcome {
            Ok(text) => return Ok(text),
            Err(err) if attempt < attempts && policy.is_retryable(&err) => {
                let delay = policy.backoff_for(attempt);
                warn!(
                    target: "round-controller",
                    attempt,
                    max_attempts = attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "model call failed; retrying"
                );
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

/// A recorded call to [`ScriptedModelClient`].
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub system: String,
    pub brief: String,
    pub turn_text: String,
    pub had_image: bool,
}

/// Deterministic client that replays queued replies. Used for tests and
/// offline dry runs.
#[derive(Debug, Default)]
pub struct ScriptedModelClient {
    replies: Mutex<VecDeque<Result<String, InferenceError>>>,
    calls: Mutex<Vec<RecordedCall>>,
    fallback: Option<String>,
}

impl ScriptedModelClient {
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            replies: Mutex::new(replies.into_iter().map(|r| Ok(r.into())).collect()),
            ..Self::default()
        }
    }

    /// Reply returned once the queue is exhausted.
    pub fn with_fallback(mut self, reply: impl Into<String>) -> Self {
        self.fallback = Some(reply.into());
        self
    }

    /// Queue an error reply.
    pub fn push_error(mut self, err: InferenceError) -> Self {
        self.replies.get_mut().push_back(Err(err));
        self
    }

    pub async fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().await.clone()
    }

    pub async fn call_count(&self) -> usize {
        self.calls.lock().await.len()
    }
}

#[async_trait]
impl ModelClient for ScriptedModelClient {
    async fn complete(
        &self,
        system: &str,
        brief: &str,
        turn: &ModelTurn,
    ) -> Result<String, InferenceError> {
        self.calls.lock().await.push(RecordedCall {
            system: system.to_string(),
            brief: brief.to_string(),
            turn_text: turn.text.clone(),
            had_image: turn.image.is_some(),
        });
        match self.replies.lock().await.pop_front() {
            Some(reply) => reply,
            None => self
                .fallback
                .clone()
                .ok_or_else(|| InferenceError::transport("scripted replies exhausted")),
        }
    }
}
