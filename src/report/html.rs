use std::fmt::Write as _;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use pilot_core_types::{ActionTrace, RunStatus, TestRunResult, TestSuiteResult};
use tracing::warn;

use super::json::file_safe;
use super::junit::escape;

pub const SUITE_FILE: &str = "suite.html";
const MODEL_SNIPPET_CHARS: usize = 200;

const STYLE: &str = "\
body{font-family:-apple-system,'Segoe UI',Helvetica,Arial,sans-serif;margin:0;background:#f5f6f8;color:#1f2328}
main{max-width:1100px;margin:0 auto;padding:24px}
header{background:#fff;border-radius:8px;padding:16px 20px;margin-bottom:16px;box-shadow:0 1px 2px rgba(0,0,0,.08)}
section{background:#fff;border-radius:8px;padding:12px 20px;margin-bottom:16px;box-shadow:0 1px 2px rgba(0,0,0,.08)}
h1{font-size:20px;margin:0 0 8px}
h2{font-size:16px;margin:8px 0}
.badge{display:inline-block;padding:2px 10px;border-radius:12px;font-weight:600;font-size:12px;color:#fff}
.passed{background:#1a7f37}.failed{background:#cf222e}.skipped{background:#6e7781}
.meta{color:#57606a;font-size:13px}
.error{color:#cf222e}
table{border-collapse:collapse;width:100%;font-size:13px}
th,td{border-bottom:1px solid #d0d7de;padding:6px;text-align:left;vertical-align:top}
pre{white-space:pre-wrap;word-break:break-word;margin:0;font-size:12px}
img.shot{max-width:240px;border:1px solid #d0d7de}
.stats{display:flex;gap:24px}
.stat b{display:block;font-size:22px}
.card{border-left:4px solid #d0d7de;padding:8px 12px;margin:8px 0}
.card.passed{background:none;border-color:#1a7f37}.card.failed{background:none;border-color:#cf222e}.card.skipped{background:none;border-color:#6e7781}";

/// How screenshots referenced by traces end up in the page.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HtmlOptions {
    /// Inline screenshots as `data:` URLs instead of linking the files.
    pub embed_screenshots: bool,
}

/// Render one run as a standalone page. `dir` is where the page will live
/// and anchors relative screenshot links.
pub fn render_case(result: &TestRunResult, dir: &Path, options: HtmlOptions) -> String {
    let case = &result.case;
    let status = result.status();
    let mut html = page_head(&format!("{} - {}", case.id, case.objective));

    html.push_str("<header>\n");
    let _ = writeln!(
        html,
        "<h1>{} {}</h1>",
        escape(&case.objective),
        badge(status)
    );
    let _ = writeln!(
        html,
        "<div class=\"meta\">Task: {} &middot; Start URL: {}</div>",
        escape(&case.id),
        escape(case.start_url.as_deref().unwrap_or("N/A"))
    );
    let _ = writeln!(
        html,
        "<div class=\"meta\">Started {} &middot; Finished {} &middot; {:.2}s &middot; {} action(s){}</div>",
        timestamp(&result.started_at),
        timestamp(&result.finished_at),
        result.duration_seconds(),
        result.action_count(),
        if result.retry_attempt > 0 {
            format!(" &middot; attempt {}", result.retry_attempt + 1)
        } else {
            String::new()
        }
    );
    html.push_str("</header>\n");

    html.push_str("<section>\n<h2>Result</h2>\n");
    let class = if status == RunStatus::Failed { " class=\"error\"" } else { "" };
    let _ = writeln!(html, "<p{class}>{}</p>", escape(&result.reason));
    if let Some(url) = &result.final_url {
        let _ = writeln!(html, "<p class=\"meta\">Final URL: {}</p>", escape(url));
    }
    push_list(&mut html, "Console errors", &result.console_errors);
    html.push_str("</section>\n");

    html.push_str("<section>\n");
    push_list(&mut html, "Steps", &case.objective_steps);
    push_list(&mut html, "Pass criteria", &case.pass_criteria);
    push_list(&mut html, "Fail criteria", &case.fail_criteria);
    if !case.credentials.is_empty() {
        let masked: Vec<String> = case.credentials.keys().map(|k| format!("{k}: ***")).collect();
        push_list(&mut html, "Credentials", &masked);
    }
    if let Some(notes) = case.notes.as_deref().filter(|n| !n.trim().is_empty()) {
        let _ = writeln!(html, "<h2>Notes</h2>\n<p>{}</p>", escape(notes));
    }
    push_list(&mut html, "Remembered facts", &result.facts);
    html.push_str("</section>\n");

    if !result.actions.is_empty() {
        html.push_str("<section>\n<h2>Actions</h2>\n<table>\n");
        html.push_str(
            "<tr><th>Round</th><th>Action</th><th>URL</th><th>Arguments</th><th>Result</th><th>Model</th><th>Screenshot</th></tr>\n",
        );
        for action in &result.actions {
            push_action_row(&mut html, action, dir, options);
        }
        html.push_str("</table>\n</section>\n");
    }

    html.push_str(PAGE_TAIL);
    html
}

/// Suite overview with a card per run linking to its page.
pub fn render_suite(suite: &TestSuiteResult) -> String {
    let mut html = page_head("e2e-pilot suite report");
    html.push_str("<header>\n<h1>Test suite</h1>\n");
    let _ = writeln!(
        html,
        "<div class=\"meta\">Started {} &middot; {:.2}s &middot; generated {}</div>",
        timestamp(&suite.started_at),
        suite.duration_seconds(),
        timestamp(&Utc::now())
    );
    html.push_str("<div class=\"stats\">\n");
    for (label, value) in [
        ("Total", suite.total().to_string()),
        ("Passed", suite.passed().to_string()),
        ("Failed", suite.failed().to_string()),
        ("Pass rate", format!("{:.1}%", suite.pass_rate())),
    ] {
        let _ = writeln!(html, "<div class=\"stat\"><b>{value}</b>{label}</div>");
    }
    html.push_str("</div>\n</header>\n<section>\n");

    for result in &suite.results {
        let status = result.status();
        let _ = writeln!(html, "<div class=\"card {}\">", status.as_str());
        let _ = writeln!(
            html,
            "<a href=\"{}\">{}</a> {}",
            escape(&case_file_name(result)),
            escape(&result.case.id),
            badge(status)
        );
        let _ = writeln!(html, "<div>{}</div>", escape(&result.case.objective));
        let _ = writeln!(
            html,
            "<div class=\"meta\">{:.2}s &middot; {} action(s) &middot; {}</div>",
            result.duration_seconds(),
            result.action_count(),
            escape(&result.reason)
        );
        html.push_str("</div>\n");
    }
    html.push_str("</section>\n");
    html.push_str(PAGE_TAIL);
    html
}

/// `<dir>/<case-id>.html`
pub fn write_case(result: &TestRunResult, dir: &Path, options: HtmlOptions) -> io::Result<PathBuf> {
    fs::create_dir_all(dir)?;
    let path = dir.join(case_file_name(result));
    fs::write(&path, render_case(result, dir, options))?;
    Ok(path)
}

/// `<dir>/suite.html`
pub fn write_suite(suite: &TestSuiteResult, dir: &Path) -> io::Result<PathBuf> {
    fs::create_dir_all(dir)?;
    let path = dir.join(SUITE_FILE);
    fs::write(&path, render_suite(suite))?;
    Ok(path)
}

fn case_file_name(result: &TestRunResult) -> String {
    format!("{}.html", file_safe(&result.case.id))
}

fn push_action_row(html: &mut String, action: &ActionTrace, dir: &Path, options: HtmlOptions) {
    let arguments = serde_json::to_string_pretty(&action.arguments).unwrap_or_default();
    let model: String = action.model_response.chars().take(MODEL_SNIPPET_CHARS).collect();
    let shot = action
        .screenshot_path
        .as_deref()
        .map(|path| screenshot_src(path, dir, options))
        .map(|src| {
            let src = escape(&src);
            format!("<a href=\"{src}\"><img class=\"shot\" src=\"{src}\" alt=\"round {}\"></a>", action.round_index)
        })
        .unwrap_or_default();
    let _ = writeln!(
        html,
        "<tr><td>{}</td><td>{}</td><td>{}</td><td><pre>{}</pre></td><td>{}</td><td><pre>{}</pre></td><td>{}</td></tr>",
        action.round_index,
        escape(&action.action),
        escape(&action.page_url),
        escape(&arguments),
        escape(&action.result),
        escape(&model),
        shot
    );
}

/// A data URL when embedding, otherwise a link relative to the report.
/// An unreadable file falls back to the link.
fn screenshot_src(path: &Path, dir: &Path, options: HtmlOptions) -> String {
    if options.embed_screenshots {
        match fs::read(path) {
            Ok(bytes) => return format!("data:image/png;base64,{}", STANDARD.encode(bytes)),
            Err(err) => {
                warn!(target: "suite-runner", path = %path.display(), %err, "screenshot not embedded");
            }
        }
    }
    relative_to(path, dir).to_string_lossy().replace('\\', "/")
}

/// `path` expressed relative to `base` when both are absolute or both are
/// relative; otherwise `path` unchanged.
fn relative_to(path: &Path, base: &Path) -> PathBuf {
    if path.is_absolute() != base.is_absolute() {
        return path.to_path_buf();
    }
    fn normal(p: &Path) -> Vec<Component<'_>> {
        p.components().filter(|c| *c != Component::CurDir).collect()
    }
    let path_parts = normal(path);
    let base_parts = normal(base);
    if base_parts.contains(&Component::ParentDir) {
        return path.to_path_buf();
    }
    let common = path_parts
        .iter()
        .zip(&base_parts)
        .take_while(|(a, b)| a == b)
        .count();
    let mut out = PathBuf::new();
    for _ in common..base_parts.len() {
        out.push("..");
    }
    for part in &path_parts[common..] {
        out.push(part.as_os_str());
    }
    out
}

fn push_list(html: &mut String, heading: &str, items: &[String]) {
    if items.is_empty() {
        return;
    }
    let _ = writeln!(html, "<h2>{heading}</h2>\n<ul>");
    for item in items {
        let _ = writeln!(html, "<li>{}</li>", escape(item));
    }
    html.push_str("</ul>\n");
}

fn badge(status: RunStatus) -> String {
    let label = match status {
        RunStatus::Passed => "PASS",
        RunStatus::Failed => "FAIL",
        RunStatus::Skipped => "SKIP",
    };
    format!("<span class=\"badge {}\">{label}</span>", status.as_str())
}

fn timestamp(at: &DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

fn page_head(title: &str) -> String {
    format!(
        "<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n<title>{}</title>\n<style>\n{STYLE}\n</style>\n</head>\n<body>\n<main>\n",
        escape(title)
    )
}

const PAGE_TAIL: &str = "</main>\n</body>\n</html>\n";

#[cfg(test)]
mod tests {
    use super::*;
    use pilot_core_types::TestCase;
    use serde_json::json;

    fn case() -> TestCase {
        let mut case = TestCase::new("login/admin", "Sign in as <admin>")
            .with_start_url("https://app.test/login")
            .with_pass_criteria(["Dashboard visible"])
            .with_fail_criteria(["Error shown"]);
        case.credentials.insert("password".into(), "hunter2".into());
        case
    }

    fn traced(screenshot: Option<PathBuf>) -> TestRunResult {
        let mut result = TestRunResult::failed(case(), "Fail criteria matched: \"Error shown\"", Utc::now());
        let mut trace = ActionTrace::new(
            1,
            "left_click",
            json!({ "coordinate": [10, 20] }),
            "<tool_call>{}</tool_call>",
            "I clicked at coordinates (10.0, 20.0).",
            "https://app.test/login",
        );
        trace.screenshot_path = screenshot;
        result.actions.push(trace);
        result
    }

    #[test]
    fn case_page_escapes_and_masks() {
        let page = render_case(&traced(None), Path::new("reports"), HtmlOptions::default());
        assert!(page.starts_with("<!DOCTYPE html>"));
        assert!(page.contains("Sign in as &lt;admin&gt;"));
        assert!(page.contains("<span class=\"badge failed\">FAIL</span>"));
        assert!(page.contains("password: ***"));
        assert!(!page.contains("hunter2"));
        assert!(page.contains("&lt;tool_call&gt;"));
        assert!(page.contains("<li>Dashboard visible</li>"));
    }

    #[test]
    fn screenshots_link_relative_to_the_report() {
        let result = traced(Some(PathBuf::from("screenshots/login-1/step-01.png")));
        let page = render_case(&result, Path::new("reports"), HtmlOptions::default());
        assert!(page.contains("src=\"../screenshots/login-1/step-01.png\""));
    }

    #[test]
    fn embedded_screenshots_become_data_urls() {
        let dir = tempfile::tempdir().unwrap();
        let shot = dir.path().join("step-01.png");
        fs::write(&shot, [0x89, b'P', b'N', b'G']).unwrap();

        let options = HtmlOptions {
            embed_screenshots: true,
        };
        let page = render_case(&traced(Some(shot)), dir.path(), options);
        assert!(page.contains("src=\"data:image/png;base64,iVBORw==\""));

        let missing = traced(Some(dir.path().join("gone.png")));
        let page = render_case(&missing, dir.path(), options);
        assert!(page.contains("src=\"gone.png\""));
    }

    #[test]
    fn suite_page_links_each_case() {
        let now = Utc::now();
        let mut passed = TestRunResult::failed(TestCase::new("search", "Search"), "Completed successfully.", now);
        passed.success = true;
        let suite = TestSuiteResult {
            results: vec![passed, traced(None)],
            started_at: now,
            finished_at: now,
        };

        let dir = tempfile::tempdir().unwrap();
        let path = write_suite(&suite, dir.path()).unwrap();
        assert_eq!(path.file_name().unwrap(), SUITE_FILE);
        let page = fs::read_to_string(path).unwrap();
        assert!(page.contains("<b>2</b>Total"));
        assert!(page.contains("<b>50.0%</b>Pass rate"));
        assert!(page.contains("<a href=\"search.html\">search</a>"));
        assert!(page.contains("<a href=\"login_admin.html\">login/admin</a>"));
        assert!(page.contains("card passed"));
    }

    #[test]
    fn relative_paths_climb_out_of_the_report_dir() {
        assert_eq!(
            relative_to(Path::new("/runs/shots/a.png"), Path::new("/runs/reports")),
            PathBuf::from("../shots/a.png")
        );
        assert_eq!(
            relative_to(Path::new("./reports/a.png"), Path::new("reports")),
            PathBuf::from("a.png")
        );
        assert_eq!(
            relative_to(Path::new("/abs/a.png"), Path::new("reports")),
            PathBuf::from("/abs/a.png")
        );
    }
}
