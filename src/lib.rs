//! e2e-pilot: natural-language browser end-to-end tests.
//!
//! Exposes modules for integration testing.

pub mod app_settings;
pub mod cli;
pub mod llm;
pub mod report;
pub mod runner;
pub mod task_loader;

pub use app_settings::Config;
pub use runner::{Session, SessionError, SessionFactory, SuiteRunner};
pub use task_loader::{discover_tasks, TaskFilter, TaskLoadError};
