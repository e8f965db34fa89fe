use clap::Subcommand;

use super::list::ListArgs;
use super::run::RunArgs;
use super::validate::ValidateArgs;

#[derive(Subcommand, Clone)]
pub enum Commands {
    /// Run test cases against a real browser
    Run(RunArgs),

    /// Check task files without running them
    Validate(ValidateArgs),

    /// List the test cases a run would select
    List(ListArgs),
}
