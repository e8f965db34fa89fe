pub mod app;
pub mod commands;
pub mod context;
pub mod dispatch;
pub mod env;
pub mod list;
pub mod run;
pub mod runtime;
pub mod selection;
pub mod validate;

pub use app::run;
pub use env::CliArgs;
