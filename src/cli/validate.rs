use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::Args;

use crate::task_loader::{read_task_value, validate_task};

#[derive(Args, Clone, Debug)]
pub struct ValidateArgs {
    /// Task files to check
    #[arg(required = true, value_name = "FILES")]
    pub files: Vec<PathBuf>,
}

pub async fn cmd_validate(args: ValidateArgs) -> Result<()> {
    let mut invalid = 0;
    for file in &args.files {
        let problems = match read_task_value(file) {
            Ok(value) => validate_task(&value),
            Err(err) => vec![err.to_string()],
        };
        if problems.is_empty() {
            println!("OK {}", file.display());
        } else {
            invalid += 1;
            println!("INVALID {}", file.display());
            for problem in problems {
                println!("  - {problem}");
            }
        }
    }
    if invalid > 0 {
        bail!("{invalid} of {} task file(s) invalid", args.files.len());
    }
    Ok(())
}
