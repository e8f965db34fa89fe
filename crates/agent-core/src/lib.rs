//! Agent decision loop and verdict engine.
//!
//! Drives a browser through model-chosen, vision-grounded actions and
//! decides PASS/FAIL for a natural-language test case. The browser and the
//! model are collaborators behind [`BrowserDriver`] and [`ModelClient`].

pub mod agent_loop;
pub mod browser;
pub mod coords;
pub mod envelope;
pub mod errors;
pub mod evidence;
pub mod expectations;
pub mod llm_provider;
pub mod loop_detector;
pub mod urls;
pub mod verdict;
pub mod vision;

pub use agent_loop::{AgentLoopConfig, RoundController};
pub use browser::{BrowserDriver, ConsoleMessage, ElementInfo, LoadState, OptionChoice, ScrollPosition};
pub use coords::{to_viewport, ImageSize, Point};
pub use envelope::{parse_envelope, ActionAllowList, ActionRequest, RawAction};
pub use errors::{AgentError, BrowserError, InferenceError, ProtocolError};
pub use llm_provider::{
    complete_with_retry, ModelClient, ModelTurn, RetryPolicy, ScriptedModelClient,
};
pub use verdict::Verdict;
pub use vision::{prepare_prompt_image, ImageProcessorConfig, PromptImage};
