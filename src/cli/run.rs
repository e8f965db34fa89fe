use std::fmt::Write as _;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use cdp_adapter::CdpConfig;
use clap::Args;
use pilot_core_types::TestSuiteResult;
use tracing::{info, warn};

use super::context::CliContext;
use super::selection::TaskSelectionArgs;
use crate::app_settings::Config;
use crate::report::{write_case_reports, write_suite_reports, ReportFormat};
use crate::runner::{ChromiumSessionFactory, SuiteRunner};

const REASON_CHARS: usize = 80;

#[derive(Args, Clone, Debug)]
pub struct RunArgs {
    #[command(flatten)]
    pub selection: TaskSelectionArgs,

    /// Number of cases to run concurrently
    #[arg(long, value_name = "N")]
    pub parallel: Option<usize>,

    /// Show the browser window
    #[arg(long)]
    pub headful: bool,

    /// Model endpoint base URL
    #[arg(long, value_name = "URL")]
    pub base_url: Option<String>,

    /// Model name
    #[arg(long)]
    pub model: Option<String>,

    /// Directory for reports
    #[arg(long, value_name = "DIR")]
    pub reports_dir: Option<PathBuf>,

    /// Report format
    #[arg(long, value_enum)]
    pub output_format: Option<ReportFormat>,
}

impl RunArgs {
    /// Fold command-line overrides into the loaded settings.
    pub fn apply(&self, config: &mut Config) {
        if let Some(base_url) = &self.base_url {
            config.model.base_url = base_url.trim_end_matches('/').to_string();
        }
        if let Some(model) = &self.model {
            config.model.model = model.clone();
        }
        if let Some(parallel) = self.parallel {
            config.runner.parallel_workers = parallel.max(1);
        }
        if self.headful {
            config.browser.headless = false;
        }
        if let Some(dir) = &self.reports_dir {
            config.reporting.reports_dir = dir.clone();
        }
        if let Some(format) = self.output_format {
            config.reporting.output_format = format;
        }
    }
}

pub async fn cmd_run(args: RunArgs, ctx: &CliContext) -> Result<()> {
    let cases = args.selection.discover()?;
    if cases.is_empty() {
        warn!("No test cases found matching filters");
        println!("No test cases found matching filters");
        return Ok(());
    }

    let mut config = ctx.config().clone();
    args.apply(&mut config);
    info!(
        cases = cases.len(),
        config = %ctx.config_path().display(),
        model = %config.model.model,
        base_url = %config.model.base_url,
        workers = config.runner.parallel_workers,
        headless = config.browser.headless,
        "Loaded test cases"
    );

    let mut cdp = CdpConfig::default()
        .with_viewport(config.agent.viewport())
        .with_headless(config.browser.headless);
    if let Some(executable) = &config.browser.executable {
        cdp.executable = executable.clone();
    }
    cdp.no_sandbox |= config.browser.no_sandbox;

    let profile_dir = std::env::var("E2E_PILOT_CHROME_PROFILE")
        .ok()
        .filter(|value| !value.trim().is_empty())
        .map(PathBuf::from);
    let factory = ChromiumSessionFactory::new(cdp, config.model.client_config())
        .with_profile_dir(profile_dir);
    let runner = SuiteRunner::new(config.agent_loop_config(), Arc::new(factory))
        .with_parallelism(config.runner.parallel_workers);

    let cancel = runner.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted; cancelling in-flight runs");
            cancel.cancel();
        }
    });

    let suite = runner.run_all(cases).await;

    let reports_dir = &config.reporting.reports_dir;
    let options = config.reporting.report_options();
    for result in &suite.results {
        write_case_reports(result, reports_dir, options)
            .with_context(|| format!("Failed to write report for {}", result.case.id))?;
    }
    write_suite_reports(&suite, reports_dir, options.format).context("Failed to write suite reports")?;

    print!("{}", format_summary(&suite));

    if suite.failed() > 0 {
        bail!("{} of {} test(s) failed", suite.failed(), suite.total());
    }
    Ok(())
}

pub fn format_summary(suite: &TestSuiteResult) -> String {
    let rule = "=".repeat(60);
    let mut out = String::new();
    let _ = writeln!(out, "\n{rule}");
    let _ = writeln!(out, "TEST SUITE SUMMARY");
    let _ = writeln!(out, "{rule}");
    let _ = writeln!(out, "Total:  {}", suite.total());
    let _ = writeln!(out, "Passed: {}", suite.passed());
    let _ = writeln!(out, "Failed: {}", suite.failed());
    let _ = writeln!(out, "Pass Rate: {:.1}%", suite.pass_rate());
    let _ = writeln!(out, "Duration: {:.1}s", suite.duration_seconds());
    let _ = writeln!(out, "{rule}");

    let mut failed = suite.failed_tests().peekable();
    if failed.peek().is_some() {
        let _ = writeln!(out, "\nFailed Tests:");
        for result in failed {
            let reason: String = result.reason.chars().take(REASON_CHARS).collect();
            let _ = writeln!(out, "  - {}: {}", result.case.id, reason);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use pilot_core_types::{TestCase, TestRunResult};

    #[test]
    fn overrides_fold_into_config() {
        let args = RunArgs {
            selection: TaskSelectionArgs {
                tasks_dir: "tasks".into(),
                tasks: Vec::new(),
                tags: Vec::new(),
                exclude_tags: Vec::new(),
                include_skipped: false,
                sort_by_priority: false,
            },
            parallel: Some(0),
            headful: true,
            base_url: Some("http://gpu:8000/v1/".into()),
            model: None,
            reports_dir: Some("out".into()),
            output_format: Some(ReportFormat::All),
        };
        let mut config = Config::default();
        args.apply(&mut config);
        assert_eq!(config.model.base_url, "http://gpu:8000/v1");
        assert_eq!(config.model.model, "microsoft_fara-7b");
        assert_eq!(config.runner.parallel_workers, 1);
        assert!(!config.browser.headless);
        assert_eq!(config.reporting.reports_dir, PathBuf::from("out"));
        assert_eq!(config.reporting.output_format, ReportFormat::All);
    }

    #[test]
    fn output_format_accepts_html() {
        use crate::cli::commands::Commands;
        use crate::cli::env::CliArgs;
        use clap::Parser;

        for (flag, format) in [("html", ReportFormat::Html), ("all", ReportFormat::All)] {
            let cli = CliArgs::try_parse_from(["e2e-pilot", "run", "--output-format", flag]).unwrap();
            let Commands::Run(args) = cli.command else {
                panic!("expected run");
            };
            assert_eq!(args.output_format, Some(format));
        }
    }

    #[test]
    fn summary_lists_failures() {
        let now = Utc::now();
        let mut pass = TestRunResult::failed(TestCase::new("a", "x"), "ok", now);
        pass.success = true;
        let fail = TestRunResult::failed(TestCase::new("b", "y"), "Max rounds reached.", now);
        let suite = TestSuiteResult {
            results: vec![pass, fail],
            started_at: now,
            finished_at: now,
        };
        let summary = format_summary(&suite);
        assert!(summary.contains("Total:  2"));
        assert!(summary.contains("Pass Rate: 50.0%"));
        assert!(summary.contains("  - b: Max rounds reached."));
    }
}
