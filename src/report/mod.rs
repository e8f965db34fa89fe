//! Report sinks for completed runs.

pub mod html;
pub mod json;
pub mod junit;

use std::io;
use std::path::{Path, PathBuf};

use clap::ValueEnum;
use pilot_core_types::{TestRunResult, TestSuiteResult};
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    Json,
    Junit,
    Html,
    All,
}

impl ReportFormat {
    pub fn includes_json(self) -> bool {
        matches!(self, ReportFormat::Json | ReportFormat::All)
    }

    pub fn includes_junit(self) -> bool {
        matches!(self, ReportFormat::Junit | ReportFormat::All)
    }

    pub fn includes_html(self) -> bool {
        matches!(self, ReportFormat::Html | ReportFormat::All)
    }
}

/// Which reports to write and how.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportOptions {
    pub format: ReportFormat,
    pub html: html::HtmlOptions,
}

impl ReportOptions {
    pub fn new(format: ReportFormat) -> Self {
        Self {
            format,
            html: html::HtmlOptions::default(),
        }
    }

    pub fn embed_screenshots(mut self, embed: bool) -> Self {
        self.html.embed_screenshots = embed;
        self
    }
}

/// Write the per-case report(s) for one result.
pub fn write_case_reports(
    result: &TestRunResult,
    dir: &Path,
    options: ReportOptions,
) -> io::Result<Vec<PathBuf>> {
    let mut written = Vec::new();
    if options.format.includes_json() {
        written.push(json::write_case(result, dir)?);
    }
    if options.format.includes_html() {
        written.push(html::write_case(result, dir, options.html)?);
    }
    for path in &written {
        info!(target: "suite-runner", case = %result.case.id, path = %path.display(), "case report written");
    }
    Ok(written)
}

/// Write the suite-level report(s).
pub fn write_suite_reports(
    suite: &TestSuiteResult,
    dir: &Path,
    format: ReportFormat,
) -> io::Result<Vec<PathBuf>> {
    let mut written = Vec::new();
    if format.includes_json() {
        written.push(json::write_suite(suite, dir)?);
    }
    if format.includes_junit() {
        written.push(junit::write_suite(suite, dir)?);
    }
    if format.includes_html() {
        written.push(html::write_suite(suite, dir)?);
    }
    for path in &written {
        info!(target: "suite-runner", path = %path.display(), "suite report written");
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use pilot_core_types::TestCase;

    #[test]
    fn all_writes_every_format() {
        let dir = tempfile::tempdir().unwrap();
        let result = TestRunResult::failed(TestCase::new("cart", "Checkout"), "Max rounds reached.", Utc::now());
        let suite = TestSuiteResult {
            results: vec![result.clone()],
            started_at: Utc::now(),
            finished_at: Utc::now(),
        };

        let cases = write_case_reports(&result, dir.path(), ReportOptions::new(ReportFormat::All)).unwrap();
        let names: Vec<_> = cases.iter().map(|p| p.file_name().unwrap().to_owned()).collect();
        assert_eq!(names, vec!["cart.json", "cart.html"]);

        let suites = write_suite_reports(&suite, dir.path(), ReportFormat::All).unwrap();
        let names: Vec<_> = suites.iter().map(|p| p.file_name().unwrap().to_owned()).collect();
        assert_eq!(names, vec!["suite.json", "junit.xml", "suite.html"]);
    }

    #[test]
    fn html_alone_skips_json_and_junit() {
        let dir = tempfile::tempdir().unwrap();
        let result = TestRunResult::failed(TestCase::new("cart", "Checkout"), "Max rounds reached.", Utc::now());
        let options = ReportOptions::new(ReportFormat::Html).embed_screenshots(true);
        let cases = write_case_reports(&result, dir.path(), options).unwrap();
        assert_eq!(cases, vec![dir.path().join("cart.html")]);
        assert!(!dir.path().join("cart.json").exists());
    }
}
