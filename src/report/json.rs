use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::Utc;
use pilot_core_types::{TestRunResult, TestSuiteResult};
use serde_json::{json, Value};

pub const SUITE_FILE: &str = "suite.json";
const REPORT_VERSION: &str = "1.0";

/// The serialised result with credential values masked.
pub fn case_document(result: &TestRunResult) -> io::Result<Value> {
    let mut document = serde_json::to_value(result)?;
    if let Some(Value::Object(credentials)) = document.pointer_mut("/case/credentials") {
        for value in credentials.values_mut() {
            *value = Value::String("***".to_string());
        }
    }
    Ok(document)
}

pub fn suite_document(suite: &TestSuiteResult) -> io::Result<Value> {
    let results = suite
        .results
        .iter()
        .map(case_document)
        .collect::<io::Result<Vec<_>>>()?;
    let failed: Vec<Value> = suite
        .failed_tests()
        .map(|result| json!({ "id": result.case.id, "reason": result.reason }))
        .collect();
    Ok(json!({
        "generated_at": Utc::now().to_rfc3339(),
        "report_version": REPORT_VERSION,
        "summary": {
            "total": suite.total(),
            "passed": suite.passed(),
            "failed": suite.failed(),
            "pass_rate": round2(suite.pass_rate()),
            "duration_seconds": round2(suite.duration_seconds()),
        },
        "failed_tests": failed,
        "results": results,
    }))
}

/// `<dir>/<case-id>.json`
pub fn write_case(result: &TestRunResult, dir: &Path) -> io::Result<PathBuf> {
    let path = dir.join(format!("{}.json", file_safe(&result.case.id)));
    write_pretty(&path, &case_document(result)?)?;
    Ok(path)
}

/// `<dir>/suite.json`
pub fn write_suite(suite: &TestSuiteResult, dir: &Path) -> io::Result<PathBuf> {
    let path = dir.join(SUITE_FILE);
    write_pretty(&path, &suite_document(suite)?)?;
    Ok(path)
}

fn write_pretty(path: &Path, value: &Value) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let text = serde_json::to_string_pretty(value)?;
    fs::write(path, text)
}

pub(crate) fn file_safe(id: &str) -> String {
    id.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use pilot_core_types::TestCase;

    fn result(id: &str, success: bool) -> TestRunResult {
        let mut case = TestCase::new(id, "Log in");
        case.credentials.insert("password".into(), "hunter2".into());
        let mut result = TestRunResult::failed(case, "Fail criteria matched", Utc::now());
        result.success = success;
        result
    }

    #[test]
    fn case_report_masks_credentials() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_case(&result("login/admin", false), dir.path()).unwrap();
        assert_eq!(path.file_name().unwrap(), "login_admin.json");

        let written: Value = serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(written["case"]["credentials"]["password"], json!("***"));
        assert_eq!(written["reason"], json!("Fail criteria matched"));
        assert_eq!(written["success"], json!(false));
    }

    #[test]
    fn suite_report_has_summary() {
        let start = Utc::now();
        let suite = TestSuiteResult {
            results: vec![result("a", true), result("b", false), result("c", false)],
            started_at: start,
            finished_at: start + Duration::milliseconds(1234),
        };
        let document = suite_document(&suite).unwrap();
        assert_eq!(document["summary"]["total"], json!(3));
        assert_eq!(document["summary"]["passed"], json!(1));
        assert_eq!(document["summary"]["failed"], json!(2));
        assert_eq!(document["summary"]["pass_rate"], json!(33.33));
        assert_eq!(document["summary"]["duration_seconds"], json!(1.23));
        assert_eq!(document["failed_tests"][0]["id"], json!("b"));
        assert_eq!(document["results"].as_array().unwrap().len(), 3);
    }
}
