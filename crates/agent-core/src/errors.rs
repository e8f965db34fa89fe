use thiserror::Error;

/// Terminal errors raised while driving a run.
///
/// The `Display` output doubles as the human-readable reason recorded on the
/// failed `TestRunResult`.
#[derive(Debug, Error)]
pub enum AgentError {
    /// The model call failed after the retry policy was exhausted.
    #[error("LLM error: {0}")]
    Inference(#[from] InferenceError),

    /// Neither the original reply nor the repair reply carried an allowed action.
    #[error("Model did not return a valid tool call.")]
    NoValidToolCall,

    /// A browser call outside action execution failed (e.g. the start navigation).
    #[error("Browser error: {0}")]
    Browser(#[from] BrowserError),

    /// Cooperative cancellation observed at a suspension point.
    #[error("Run cancelled.")]
    Cancelled,
}

/// Failures reported by a model-inference client.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum InferenceError {
    #[error("Empty response from model")]
    EmptyResponse,

    #[error("Model call failed: {0}")]
    Transport(String),

    /// The endpoint refused the request outright; retrying will not help.
    #[error("Model request rejected: {0}")]
    Rejected(String),
}

impl InferenceError {
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self::Rejected(message.into())
    }
}

/// Reasons a model reply could not be turned into an allowed action.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("no parseable tool call found in the reply")]
    Unparseable,

    #[error("action `{0}` is not in the allowed action list")]
    Disallowed(String),

    #[error("invalid arguments for `{action}`: {message}")]
    InvalidArguments { action: String, message: String },
}

/// Errors surfaced by a [`crate::browser::BrowserDriver`].
#[derive(Debug, Clone, Error, PartialEq)]
pub enum BrowserError {
    #[error("navigation failed: {0}")]
    Navigation(String),

    #[error("browser command failed: {0}")]
    Command(String),

    #[error("timed out waiting for {0}")]
    Timeout(String),

    #[error("no element at ({x:.1}, {y:.1})")]
    NoElement { x: f64, y: f64 },

    #[error("unsupported browser operation: {0}")]
    Unsupported(String),
}

impl BrowserError {
    pub fn command(message: impl Into<String>) -> Self {
        Self::Command(message.into())
    }

    pub fn navigation(message: impl Into<String>) -> Self {
        Self::Navigation(message.into())
    }
}
