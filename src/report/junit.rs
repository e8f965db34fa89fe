use std::fmt::Write as _;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::Utc;
use pilot_core_types::{RunStatus, TestRunResult, TestSuiteResult};

pub const JUNIT_FILE: &str = "junit.xml";
const CLASSNAME: &str = "e2e_pilot";
const SUITE_NAME: &str = "e2e-pilot";
const RECENT_ACTIONS: usize = 5;

/// Render a suite as a single JUnit `<testsuite>` document.
pub fn render(suite: &TestSuiteResult) -> String {
    let skipped = suite
        .results
        .iter()
        .filter(|r| r.status() == RunStatus::Skipped)
        .count();
    let failures = suite
        .results
        .iter()
        .filter(|r| r.status() == RunStatus::Failed)
        .count();

    let mut xml = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    let _ = writeln!(
        xml,
        "<testsuite name=\"{}\" tests=\"{}\" failures=\"{}\" errors=\"0\" skipped=\"{}\" time=\"{:.3}\" timestamp=\"{}\">",
        SUITE_NAME,
        suite.total(),
        failures,
        skipped,
        suite.duration_seconds(),
        suite.started_at.format("%Y-%m-%dT%H:%M:%S"),
    );
    xml.push_str("  <properties>\n");
    let _ = writeln!(
        xml,
        "    <property name=\"generated_at\" value=\"{}\"/>",
        Utc::now().to_rfc3339()
    );
    xml.push_str("  </properties>\n");
    for result in &suite.results {
        render_case(&mut xml, result);
    }
    xml.push_str("</testsuite>\n");
    xml
}

fn render_case(xml: &mut String, result: &TestRunResult) {
    let _ = writeln!(
        xml,
        "  <testcase classname=\"{}\" name=\"{}\" time=\"{:.3}\">",
        CLASSNAME,
        escape(&result.case.id),
        result.duration_seconds()
    );
    match result.status() {
        RunStatus::Skipped => {
            let _ = writeln!(xml, "    <skipped message=\"{}\"/>", escape(&result.reason));
        }
        RunStatus::Passed => {
            if !result.actions.is_empty() {
                let mut out = String::new();
                let _ = writeln!(out, "Objective: {}", result.case.objective);
                let _ = writeln!(
                    out,
                    "URL: {}",
                    result.case.start_url.as_deref().unwrap_or("N/A")
                );
                let _ = writeln!(out, "Actions: {}", result.action_count());
                for action in recent(result) {
                    let _ = writeln!(
                        out,
                        "  [{}] {}: {}",
                        action.round_index,
                        action.action,
                        excerpt(&action.result, 100)
                    );
                }
                let _ = writeln!(xml, "    <system-out>{}</system-out>", cdata(&out));
            }
        }
        RunStatus::Failed => {
            let kind = if result.reason.to_lowercase().contains("criteria") {
                "AssertionError"
            } else {
                "TestFailure"
            };
            let mut body = String::new();
            let _ = writeln!(body, "Test Case: {}", result.case.id);
            let _ = writeln!(body, "Objective: {}", result.case.objective);
            let _ = writeln!(body, "Failure Reason: {}", result.reason);
            body.push_str("\nPass Criteria:\n");
            for criterion in &result.case.pass_criteria {
                let _ = writeln!(body, "  - {criterion}");
            }
            body.push_str("\nFail Criteria:\n");
            for criterion in &result.case.fail_criteria {
                let _ = writeln!(body, "  - {criterion}");
            }
            let _ = writeln!(body, "\nTotal Actions: {}", result.action_count());
            if !result.actions.is_empty() {
                body.push_str("\nLast Actions:\n");
                for action in recent(result) {
                    let _ = writeln!(
                        body,
                        "  [{}] {} @ {}",
                        action.round_index, action.action, action.page_url
                    );
                    let _ = writeln!(body, "      Result: {}", excerpt(&action.result, 150));
                }
            }
            let _ = writeln!(
                xml,
                "    <failure message=\"{}\" type=\"{}\">{}</failure>",
                escape(&result.reason),
                kind,
                cdata(&body)
            );
        }
    }
    xml.push_str("  </testcase>\n");
}

/// `<dir>/junit.xml`
pub fn write_suite(suite: &TestSuiteResult, dir: &Path) -> io::Result<PathBuf> {
    fs::create_dir_all(dir)?;
    let path = dir.join(JUNIT_FILE);
    fs::write(&path, render(suite))?;
    Ok(path)
}

fn recent(result: &TestRunResult) -> &[pilot_core_types::ActionTrace] {
    let start = result.actions.len().saturating_sub(RECENT_ACTIONS);
    &result.actions[start..]
}

fn excerpt(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

/// Escape text for XML attributes and character data.
pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            c => out.push(c),
        }
    }
    out
}

/// Wrap text in a CDATA section; `]]>` is split across two sections.
fn cdata(text: &str) -> String {
    format!("<![CDATA[{}]]>", text.replace("]]>", "]]]]><![CDATA[>"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pilot_core_types::{ActionTrace, TestCase};
    use serde_json::json;

    fn case(id: &str) -> TestCase {
        TestCase::new(id, "Buy a <hat>")
            .with_pass_criteria(["Order confirmed"])
            .with_fail_criteria(["Payment error"])
    }

    fn suite(results: Vec<TestRunResult>) -> TestSuiteResult {
        let now = Utc::now();
        TestSuiteResult {
            results,
            started_at: now,
            finished_at: now,
        }
    }

    #[test]
    fn failures_list_criteria_and_recent_actions() {
        let mut failed = TestRunResult::failed(case("checkout"), "Fail criteria matched: \"Payment error\"", Utc::now());
        for round in 1..=7 {
            failed.actions.push(ActionTrace::new(
                round,
                "left_click",
                json!({}),
                "",
                format!("clicked {round}"),
                "https://shop.test/pay",
            ));
        }

        let xml = render(&suite(vec![failed]));
        assert!(xml.contains("tests=\"1\" failures=\"1\" errors=\"0\" skipped=\"0\""));
        assert!(xml.contains("<testcase classname=\"e2e_pilot\" name=\"checkout\""));
        assert!(xml.contains(
            "<failure message=\"Fail criteria matched: &quot;Payment error&quot;\" type=\"AssertionError\">"
        ));
        assert!(xml.contains("  - Order confirmed"));
        assert!(xml.contains("Objective: Buy a <hat>"));
        assert!(!xml.contains("[2] left_click"));
        assert!(xml.contains("[3] left_click @ https://shop.test/pay"));
        assert!(xml.contains("[7] left_click"));
    }

    #[test]
    fn skipped_and_passed_cases() {
        let mut skipped_case = case("later");
        skipped_case.skip_reason = Some("flaky".into());
        let skipped = TestRunResult::skipped(skipped_case);

        let mut passed = TestRunResult::failed(case("ok"), "Completed successfully.", Utc::now());
        passed.success = true;
        passed.actions.push(ActionTrace::new(
            1,
            "terminate",
            json!({ "status": "success" }),
            "",
            "Completed successfully.",
            "https://shop.test/done",
        ));

        let crashed = TestRunResult::failed(case("boom"), "Browser error: gone", Utc::now());

        let xml = render(&suite(vec![skipped, passed, crashed]));
        assert!(xml.contains("failures=\"1\" errors=\"0\" skipped=\"1\""));
        assert!(xml.contains("<skipped message=\"Skipped: flaky\"/>"));
        assert!(xml.contains("<system-out><![CDATA[Objective: Buy a <hat>"));
        assert!(xml.contains("[1] terminate: Completed successfully."));
        assert!(xml.contains("type=\"TestFailure\""));
    }

    #[test]
    fn cdata_terminators_are_split() {
        assert_eq!(cdata("a]]>b"), "<![CDATA[a]]]]><![CDATA[>b]]>");
        assert_eq!(escape("a&b<'"), "a&amp;b&lt;&#x27;");
    }
}
