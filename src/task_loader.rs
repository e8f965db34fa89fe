//! Filesystem-backed loading of natural-language test cases.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use pilot_core_types::{TestCase, DEFAULT_PRIORITY};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

const TASK_EXTENSIONS: [&str; 3] = ["yaml", "yml", "json"];
const MAX_TIMEOUT_SECONDS: f64 = 86_400.0;

#[derive(Debug, Error)]
pub enum TaskLoadError {
    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {}: {message}", .path.display())]
    Parse { path: PathBuf, message: String },

    #[error("task '{task_id}' is invalid ({field}): {message}")]
    Validation {
        task_id: String,
        field: &'static str,
        message: String,
    },

    #[error("Tasks directory does not exist: {}", .0.display())]
    MissingDirectory(PathBuf),

    #[error("Tasks not found: {}", .0.join(", "))]
    UnknownIds(Vec<String>),
}

impl TaskLoadError {
    fn invalid(task_id: &str, field: &'static str, message: impl Into<String>) -> Self {
        Self::Validation {
            task_id: task_id.to_string(),
            field,
            message: message.into(),
        }
    }
}

/// Selection applied by [`discover_tasks`].
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    /// Only these ids; every listed id must exist.
    pub ids: Vec<String>,
    pub include_tags: BTreeSet<String>,
    pub exclude_tags: BTreeSet<String>,
    pub include_skipped: bool,
    pub sort_by_priority: bool,
}

/// Read a task file into a JSON value without interpreting it.
pub fn read_task_value(path: &Path) -> Result<Value, TaskLoadError> {
    let raw = fs::read_to_string(path).map_err(|source| TaskLoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let parse_error = |message: String| TaskLoadError::Parse {
        path: path.to_path_buf(),
        message,
    };
    if is_yaml(path) {
        serde_yaml::from_str(&raw).map_err(|err| parse_error(err.to_string()))
    } else {
        serde_json::from_str(&raw).map_err(|err| parse_error(err.to_string()))
    }
}

/// Load one YAML or JSON task. The id falls back to the file stem.
pub fn load_task_file(path: &Path) -> Result<TestCase, TaskLoadError> {
    let value = read_task_value(path)?;
    let fallback_id = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().to_string())
        .unwrap_or_default();
    parse_task(&value, &fallback_id)
}

/// Load every task in `dir` (sorted by file name) that passes `filter`.
pub fn discover_tasks(dir: &Path, filter: &TaskFilter) -> Result<Vec<TestCase>, TaskLoadError> {
    if !dir.is_dir() {
        return Err(TaskLoadError::MissingDirectory(dir.to_path_buf()));
    }
    let entries = fs::read_dir(dir).map_err(|source| TaskLoadError::Io {
        path: dir.to_path_buf(),
        source,
    })?;
    let mut files: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && has_task_extension(path))
        .collect();
    files.sort();

    let wanted: HashSet<&str> = filter.ids.iter().map(String::as_str).collect();
    let mut found = Vec::new();
    for path in files {
        let task = load_task_file(&path)?;
        if !wanted.is_empty() && !wanted.contains(task.id.as_str()) {
            continue;
        }
        if task.skip && !filter.include_skipped {
            debug!(task = %task.id, "skipping task marked skip");
            continue;
        }
        if !task.matches_filter(Some(&filter.include_tags), Some(&filter.exclude_tags)) {
            continue;
        }
        found.push(task);
    }

    if !wanted.is_empty() {
        let loaded: HashSet<&str> = found.iter().map(|task| task.id.as_str()).collect();
        let mut missing: Vec<String> = wanted
            .iter()
            .filter(|id| !loaded.contains(*id))
            .map(|id| id.to_string())
            .collect();
        if !missing.is_empty() {
            missing.sort();
            return Err(TaskLoadError::UnknownIds(missing));
        }
    }

    if filter.sort_by_priority {
        found.sort_by_key(|task| task.priority);
    }
    Ok(found)
}

/// Turn a task document into a [`TestCase`].
pub fn parse_task(data: &Value, fallback_id: &str) -> Result<TestCase, TaskLoadError> {
    let Some(map) = data.as_object() else {
        return Err(TaskLoadError::invalid(
            fallback_id,
            "task",
            "task payload must be a mapping",
        ));
    };
    let field = |names: &[&str]| names.iter().find_map(|name| present(map.get(*name)));

    let id = field(&["id"])
        .map(scalar_string)
        .unwrap_or_else(|| fallback_id.to_string());
    let objective = field(&["objective", "task"])
        .map(scalar_string)
        .ok_or_else(|| TaskLoadError::invalid(&id, "objective", "missing an objective"))?;

    let objective_steps = string_list(&id, "objective_steps", field(&["objective_steps", "steps"]))?;
    let pass_criteria = string_list(&id, "pass_criteria", field(&["pass_criteria", "pass"]))?;
    let fail_criteria = string_list(&id, "fail_criteria", field(&["fail_criteria", "fail"]))?;
    if pass_criteria.is_empty() {
        return Err(TaskLoadError::invalid(
            &id,
            "pass_criteria",
            "at least one pass criterion is required",
        ));
    }
    if fail_criteria.is_empty() {
        return Err(TaskLoadError::invalid(
            &id,
            "fail_criteria",
            "at least one fail criterion is required",
        ));
    }

    let credentials = match field(&["credentials"]) {
        None => BTreeMap::new(),
        Some(Value::Object(entries)) => entries
            .iter()
            .map(|(key, value)| (key.clone(), scalar_string(value)))
            .collect(),
        Some(_) => {
            return Err(TaskLoadError::invalid(
                &id,
                "credentials",
                "credentials must be a mapping",
            ))
        }
    };

    let tags = string_list(&id, "tags", field(&["tags"]))?
        .into_iter()
        .collect();
    let retry_count = match field(&["retry_count"]).and_then(as_integer) {
        Some(n) => u32::try_from(n.max(0))
            .map_err(|_| TaskLoadError::invalid(&id, "retry_count", "retry_count is too large"))?,
        None => 0,
    };
    let priority = field(&["priority"])
        .and_then(as_integer)
        .map(|n| n.clamp(1, 10) as u8)
        .unwrap_or(DEFAULT_PRIORITY);
    let max_rounds = match field(&["max_rounds"]).and_then(as_integer).filter(|n| *n >= 1) {
        Some(n) => Some(
            u32::try_from(n)
                .map_err(|_| TaskLoadError::invalid(&id, "max_rounds", "max_rounds is too large"))?,
        ),
        None => None,
    };
    let timeout_seconds = match field(&["timeout_seconds", "timeout"]) {
        None => None,
        Some(value) => timeout_value(value)
            .map_err(|message| TaskLoadError::invalid(&id, "timeout_seconds", message))?,
    };

    Ok(TestCase {
        objective,
        objective_steps,
        pass_criteria,
        fail_criteria,
        start_url: field(&["start_url"]).map(scalar_string),
        credentials,
        notes: field(&["notes"]).map(scalar_string),
        max_rounds,
        tags,
        skip: field(&["skip"]).map(truthy).unwrap_or(false),
        skip_reason: field(&["skip_reason"]).map(scalar_string),
        retry_count,
        timeout_seconds,
        priority,
        owner: field(&["owner"]).map(scalar_string),
        id,
    })
}

/// Every problem with a task document, without loading it.
pub fn validate_task(data: &Value) -> Vec<String> {
    let Some(map) = data.as_object() else {
        return vec!["Task must be a mapping".to_string()];
    };
    let field = |names: &[&str]| names.iter().find_map(|name| present(map.get(*name)));
    let mut errors = Vec::new();

    if field(&["objective", "task"]).is_none() {
        errors.push("Missing required field: objective".to_string());
    }
    for (names, label) in [
        (&["pass_criteria", "pass"][..], "pass_criteria"),
        (&["fail_criteria", "fail"][..], "fail_criteria"),
    ] {
        match field(names) {
            None => errors.push(format!("Missing required field: {label}")),
            Some(value) if !is_text_or_list(value) => {
                errors.push(format!("{label} must be a string or list"))
            }
            Some(_) => {}
        }
    }
    match map.get("objective_steps").or_else(|| map.get("steps")) {
        None | Some(Value::Null) => errors.push(
            "Missing required field: objective_steps (ordered steps the agent should follow)"
                .to_string(),
        ),
        Some(value) if !is_text_or_list(value) => {
            errors.push("objective_steps must be a string or list".to_string())
        }
        Some(_) => {}
    }
    if let Some(credentials) = map.get("credentials").filter(|v| !v.is_null()) {
        if !credentials.is_object() {
            errors.push("credentials must be a mapping".to_string());
        }
    }
    if let Some(value) = map.get("max_rounds").filter(|v| !v.is_null()) {
        match as_integer(value) {
            Some(n) if n < 1 => errors.push("max_rounds must be at least 1".to_string()),
            Some(n) if u32::try_from(n).is_err() => {
                errors.push("max_rounds is too large".to_string())
            }
            Some(_) => {}
            None => errors.push("max_rounds must be an integer".to_string()),
        }
    }
    if let Some(tags) = map.get("tags").filter(|v| !v.is_null()) {
        if !is_text_or_list(tags) {
            errors.push("tags must be a string or list".to_string());
        }
    }
    if let Some(value) = map.get("retry_count").filter(|v| !v.is_null()) {
        match as_integer(value) {
            Some(n) if n < 0 => errors.push("retry_count cannot be negative".to_string()),
            Some(n) if u32::try_from(n).is_err() => {
                errors.push("retry_count is too large".to_string())
            }
            Some(_) => {}
            None => errors.push("retry_count must be an integer".to_string()),
        }
    }
    if let Some(value) = map
        .get("timeout_seconds")
        .or_else(|| map.get("timeout"))
        .filter(|v| !v.is_null())
    {
        if let Err(message) = timeout_value(value) {
            errors.push(message.to_string());
        }
    }
    if let Some(value) = map.get("priority").filter(|v| !v.is_null()) {
        match as_integer(value) {
            Some(n) if !(1..=10).contains(&n) => {
                errors.push("priority must be between 1 and 10".to_string())
            }
            Some(_) => {}
            None => errors.push("priority must be an integer".to_string()),
        }
    }
    errors
}

fn is_yaml(path: &Path) -> bool {
    matches!(extension(path).as_deref(), Some("yaml") | Some("yml"))
}

fn has_task_extension(path: &Path) -> bool {
    extension(path).is_some_and(|ext| TASK_EXTENSIONS.contains(&ext.as_str()))
}

fn extension(path: &Path) -> Option<String> {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
}

/// Null, empty strings and empty lists count as absent.
fn present(value: Option<&Value>) -> Option<&Value> {
    value.filter(|value| match value {
        Value::Null => false,
        Value::String(s) => !s.trim().is_empty(),
        Value::Array(items) => !items.is_empty(),
        _ => true,
    })
}

fn is_text_or_list(value: &Value) -> bool {
    matches!(value, Value::String(_) | Value::Array(_))
}

fn scalar_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn string_list(
    task_id: &str,
    field: &'static str,
    value: Option<&Value>,
) -> Result<Vec<String>, TaskLoadError> {
    match value {
        None => Ok(Vec::new()),
        Some(Value::String(s)) => Ok(vec![s.clone()]),
        Some(Value::Array(items)) => Ok(items.iter().map(scalar_string).collect()),
        Some(_) => Err(TaskLoadError::invalid(
            task_id,
            field,
            "expected a string or a list",
        )),
    }
}

fn as_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_float(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// A per-case timeout in seconds. Zero means no timeout.
fn timeout_value(value: &Value) -> Result<Option<f64>, &'static str> {
    let Some(secs) = as_float(value) else {
        return Err("timeout_seconds must be a number");
    };
    if secs == 0.0 {
        return Ok(None);
    }
    if !secs.is_finite() || secs < 0.0 {
        return Err("timeout_seconds must be a positive number");
    }
    if secs > MAX_TIMEOUT_SECONDS {
        return Err("timeout_seconds must be at most 86400");
    }
    Ok(Some(secs))
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => matches!(s.trim().to_ascii_lowercase().as_str(), "true" | "yes" | "1"),
        _ => false,
    }
}
