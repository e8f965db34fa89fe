use std::fs;
use std::path::Path;

use e2e_pilot::{discover_tasks, TaskFilter, TaskLoadError};

fn write(dir: &Path, name: &str, body: &str) {
    fs::write(dir.join(name), body).unwrap();
}

fn task_yaml(id: &str, extra: &str) -> String {
    format!(
        "id: {id}\nobjective: Exercise {id}\nsteps:\n  - Open the page\npass:\n  - Page shows \"Done\"\nfail:\n  - Page shows \"Error\"\n{extra}"
    )
}

fn fixture() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "b_search.yaml", &task_yaml("search", "tags: [smoke]\npriority: 3\n"));
    write(dir.path(), "a_login.yml", &task_yaml("login", "tags: [smoke, auth]\npriority: 7\n"));
    write(
        dir.path(),
        "c_checkout.json",
        r#"{
            "objective": "Buy a hat",
            "objective_steps": ["Add to cart", "Pay"],
            "pass_criteria": "Order confirmed",
            "fail_criteria": ["Payment declined"],
            "credentials": {"pin": 1234},
            "tags": "payments",
            "retry_count": 2,
            "timeout_seconds": 90
        }"#,
    );
    write(dir.path(), "d_flaky.yaml", &task_yaml("flaky", "skip: true\nskip_reason: upstream outage\n"));
    write(dir.path(), "notes.txt", "not a task");
    dir
}

fn ids(cases: &[pilot_core_types::TestCase]) -> Vec<&str> {
    cases.iter().map(|case| case.id.as_str()).collect()
}

#[test]
fn discovers_tasks_in_file_name_order() {
    let dir = fixture();
    let cases = discover_tasks(dir.path(), &TaskFilter::default()).unwrap();
    assert_eq!(ids(&cases), ["login", "search", "c_checkout"]);

    let checkout = &cases[2];
    assert_eq!(checkout.objective_steps, ["Add to cart", "Pay"]);
    assert_eq!(checkout.pass_criteria, ["Order confirmed"]);
    assert_eq!(checkout.credentials.get("pin").map(String::as_str), Some("1234"));
    assert!(checkout.has_tag("payments"));
    assert_eq!(checkout.retry_count, 2);
    assert_eq!(checkout.timeout_seconds, Some(90.0));
    assert_eq!(checkout.priority, pilot_core_types::DEFAULT_PRIORITY);
}

#[test]
fn skipped_tasks_are_opt_in() {
    let dir = fixture();
    let filter = TaskFilter {
        include_skipped: true,
        ..TaskFilter::default()
    };
    let cases = discover_tasks(dir.path(), &filter).unwrap();
    assert_eq!(ids(&cases), ["login", "search", "c_checkout", "flaky"]);
    assert!(cases[3].skip);
    assert_eq!(cases[3].skip_reason.as_deref(), Some("upstream outage"));
}

#[test]
fn tag_filters_include_then_exclude() {
    let dir = fixture();
    let filter = TaskFilter {
        include_tags: ["smoke".to_string()].into(),
        exclude_tags: ["auth".to_string()].into(),
        ..TaskFilter::default()
    };
    let cases = discover_tasks(dir.path(), &filter).unwrap();
    assert_eq!(ids(&cases), ["search"]);
}

#[test]
fn priority_sort_puts_urgent_first() {
    let dir = fixture();
    let filter = TaskFilter {
        sort_by_priority: true,
        ..TaskFilter::default()
    };
    let cases = discover_tasks(dir.path(), &filter).unwrap();
    assert_eq!(ids(&cases), ["search", "c_checkout", "login"]);
    assert_eq!(cases[0].priority, 3);
}

#[test]
fn id_selection_reports_unknown_ids() {
    let dir = fixture();
    let filter = TaskFilter {
        ids: vec!["search".into()],
        ..TaskFilter::default()
    };
    assert_eq!(ids(&discover_tasks(dir.path(), &filter).unwrap()), ["search"]);

    let filter = TaskFilter {
        ids: vec!["search".into(), "zeta".into(), "alpha".into()],
        ..TaskFilter::default()
    };
    match discover_tasks(dir.path(), &filter) {
        Err(err @ TaskLoadError::UnknownIds(_)) => {
            assert_eq!(err.to_string(), "Tasks not found: alpha, zeta");
        }
        other => panic!("expected unknown ids, got {other:?}"),
    }
}

#[test]
fn missing_directory_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("nope");
    let err = discover_tasks(&missing, &TaskFilter::default()).unwrap_err();
    assert!(matches!(err, TaskLoadError::MissingDirectory(_)));
    assert!(err.to_string().starts_with("Tasks directory does not exist"));
}

#[test]
fn invalid_task_aborts_discovery() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "broken.yaml", "objective: No criteria here\n");
    let err = discover_tasks(dir.path(), &TaskFilter::default()).unwrap_err();
    match err {
        TaskLoadError::Validation { task_id, field, .. } => {
            assert_eq!(task_id, "broken");
            assert_eq!(field, "pass_criteria");
        }
        other => panic!("expected validation error, got {other:?}"),
    }
}
