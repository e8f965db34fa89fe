//! Round-based observe-decide-act loop.
//!
//! ```text
//! for round in 1..=max_rounds:
//!     verdict? = heuristics(state)          // scoped text, auto-pass
//!     reply    = model.complete(context)    // retried per RetryPolicy
//!     action   = parse(reply) | repair once
//!     outcome  = execute(action)
//!     abort?   = loop_detector(state)
//!     observe(); verdict? = error_page(state)
//! ```
//!
//! # Key Components
//!
//! - [`AgentLoopConfig`]: run-loop tunables
//! - [`RoundState`]: per-run mutable state, built fresh for every case
//! - [`ActionExecutor`]: turns an [`crate::ActionRequest`] into browser calls
//! - [`RoundController`]: the loop itself

pub mod config;
pub mod controller;
pub mod executor;
pub mod prompt;
pub mod state;

pub use config::AgentLoopConfig;
pub use controller::RoundController;
pub use executor::{ActionExecutor, ActionOutcome};
pub use prompt::{format_repair_prompt, format_round_context, format_system_prompt, format_task_brief};
pub use state::{Observation, RoundState, ScrollDirection, ScrollHistory, ScrollSample};
