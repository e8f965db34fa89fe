//! One-directional verdict heuristics.
//!
//! Failure checks may end a run early; the pass check only fires when every
//! piece of corroborating evidence is present. Missing evidence is always
//! "no verdict", never a guess.

use pilot_core_types::TestCase;

use crate::evidence::{Transition, TransitionLog, VerifiedExpectations};
use crate::expectations::{
    click_targets, final_url_from_criteria, pass_criteria_pairs, scoped_expectations_for_url,
};
use crate::urls::normalize_for_compare;

/// Terms that mark a URL or title as an error page.
pub const ERROR_TERMS: [&str; 7] = ["404", "not-found", "not found", "error", "fail", "oops", "uh-oh"];

const BODY_ERROR_TERMS: [&str; 2] = ["404", "not found"];

/// Terminal outcome decided without the model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub passed: bool,
    pub reason: String,
}

impl Verdict {
    pub fn pass(reason: impl Into<String>) -> Self {
        Self {
            passed: true,
            reason: reason.into(),
        }
    }

    pub fn fail(reason: impl Into<String>) -> Self {
        Self {
            passed: false,
            reason: reason.into(),
        }
    }
}

/// Error-page heuristic, including the stuck-on-login rule.
pub fn check_error_page(tc: &TestCase, url: &str, title: &str, body: &str) -> Option<Verdict> {
    let url_lower = url.to_lowercase();
    let title_lower = title.to_lowercase();
    if ERROR_TERMS
        .iter()
        .any(|term| url_lower.contains(term) || title_lower.contains(term))
    {
        return Some(Verdict::fail("Landed on an error/404 page."));
    }

    let body_lower = body.to_lowercase();
    if BODY_ERROR_TERMS.iter().any(|term| body_lower.contains(term)) {
        return Some(Verdict::fail("Page body shows 404/not found."));
    }

    if still_on_login(tc, url) {
        return Some(Verdict::fail(
            "Still on login page; fail criteria mention login.",
        ));
    }
    None
}

fn still_on_login(tc: &TestCase, url: &str) -> bool {
    let Some(start) = tc.start_url.as_deref().filter(|s| !s.trim().is_empty()) else {
        return false;
    };
    let mentions_login = tc
        .fail_criteria
        .iter()
        .any(|criterion| criterion.to_lowercase().contains("login"));
    mentions_login
        && url.to_lowercase().contains("login")
        && normalize_for_compare(url) == normalize_for_compare(start)
}

/// First expectation not present (case-insensitively) in `body`.
pub fn first_missing_expectation<'a>(expectations: &'a [String], body: &str) -> Option<&'a str> {
    let body_lower = body.to_lowercase();
    expectations
        .iter()
        .find(|expected| !body_lower.contains(&expected.to_lowercase()))
        .map(String::as_str)
}

/// Scoped text for `url` that is missing from `body`, if any.
pub fn missing_scoped_text(tc: &TestCase, url: &str, body: &str) -> Option<String> {
    let expectations = scoped_expectations_for_url(tc, url);
    first_missing_expectation(&expectations, body).map(str::to_string)
}

/// Scoped-text-missing failure. Only meaningful right after a navigation.
pub fn check_scoped_text_missing(tc: &TestCase, url: &str, body: &str) -> Option<Verdict> {
    missing_scoped_text(tc, url, body).map(|expected| {
        Verdict::fail(format!(
            "Expected text \"{expected}\" not found on {}.",
            normalize_for_compare(url)
        ))
    })
}

/// Everything the auto-pass rule looks at.
#[derive(Debug, Clone, Copy)]
pub struct AutoPassInputs<'a> {
    pub tc: &'a TestCase,
    pub url: &'a str,
    pub body: &'a str,
    pub verified: &'a VerifiedExpectations,
    pub transitions: &'a TransitionLog,
    /// Accept any click transition to the final URL when the steps name no
    /// click target.
    pub allow_click_fallback: bool,
}

/// Criteria-satisfied plus evidenced-transition pass.
pub fn check_auto_pass(inputs: AutoPassInputs<'_>) -> Option<Verdict> {
    let pairs = pass_criteria_pairs(inputs.tc);
    if pairs.is_empty() {
        return None;
    }
    let final_url = final_url_from_criteria(inputs.tc)?;
    let current = normalize_for_compare(inputs.url);
    if current != final_url {
        return None;
    }

    let body_lower = inputs.body.to_lowercase();
    let all_satisfied = pairs.iter().all(|pair| {
        inputs.verified.contains(pair)
            || (pair.url == current && body_lower.contains(&pair.text.to_lowercase()))
    });
    if !all_satisfied {
        return None;
    }

    let (transition, matched_text) = click_evidence(&inputs, &final_url)?;
    let criteria = pairs
        .iter()
        .map(|pair| format!("\"{}\" on {}", pair.text, pair.url))
        .collect::<Vec<_>>()
        .join(", ");
    let click = match matched_text {
        Some(text) => format!("clicking \"{text}\""),
        None => format!(
            "a click on \"{}\"",
            transition.clicked_text.as_deref().unwrap_or("an element")
        ),
    };
    Some(Verdict::pass(format!(
        "Pass criteria satisfied ({criteria}); reached {final_url} after {click}."
    )))
}

fn click_evidence<'a>(
    inputs: &'a AutoPassInputs<'_>,
    final_url: &str,
) -> Option<(&'a Transition, Option<String>)> {
    let targets = click_targets(inputs.tc);
    let landing = || {
        inputs
            .transitions
            .iter()
            .rev()
            .filter(move |t| t.is_click() && t.to == final_url)
    };

    for transition in landing() {
        if let Some(target) = targets.iter().find(|target| transition.clicked(target)) {
            return Some((transition, Some(target.clone())));
        }
    }

    if inputs.allow_click_fallback && targets.is_empty() {
        return landing().next().map(|t| (t, None));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expectations::ExpectationPair;

    fn checkout_case() -> TestCase {
        TestCase::new("checkout", "Confirm the order")
            .with_steps(["Click \"Confirm\""])
            .with_pass_criteria(["Page contains \"Welcome\" at https://x/done"])
            .with_fail_criteria(["Error shown"])
    }

    fn confirm_transition(text: Option<&str>) -> Transition {
        Transition {
            from: normalize_for_compare("https://x/cart"),
            to: normalize_for_compare("https://x/done"),
            action: "left_click".into(),
            clicked_text: text.map(str::to_string),
        }
    }

    #[test]
    fn error_terms_in_url_or_title_fail() {
        let tc = checkout_case();
        let verdict = check_error_page(&tc, "https://x/404", "Shop", "").unwrap();
        assert_eq!(verdict, Verdict::fail("Landed on an error/404 page."));
        let verdict = check_error_page(&tc, "https://x/ok", "Server Error", "").unwrap();
        assert!(!verdict.passed);
        assert!(check_error_page(&tc, "https://x/ok", "Shop", "All good").is_none());
    }

    #[test]
    fn body_not_found_fails() {
        let tc = checkout_case();
        let verdict = check_error_page(&tc, "https://x/ok", "Shop", "Page Not Found");
        assert_eq!(verdict, Some(Verdict::fail("Page body shows 404/not found.")));
    }

    #[test]
    fn stuck_on_login_start_page_fails() {
        let tc = TestCase::new("login", "Log in")
            .with_start_url("https://x/login")
            .with_fail_criteria(["Still on login page"]);
        let verdict = check_error_page(&tc, "https://x/login", "Sign in", "").unwrap();
        assert_eq!(verdict.reason, "Still on login page; fail criteria mention login.");
        assert!(check_error_page(&tc, "https://x/login/", "Sign in", "").is_some());
        assert!(check_error_page(&tc, "https://x/home", "Home", "").is_none());

        let unrelated = TestCase::new("login", "Log in")
            .with_start_url("https://x/login")
            .with_fail_criteria(["Error banner shown"]);
        assert!(check_error_page(&unrelated, "https://x/login", "Sign in", "").is_none());
    }

    #[test]
    fn scoped_text_missing_names_first_expectation() {
        let tc = checkout_case();
        let verdict = check_scoped_text_missing(&tc, "https://x/done", "Thanks").unwrap();
        assert_eq!(
            verdict.reason,
            "Expected text \"Welcome\" not found on https://x/done."
        );
        assert!(check_scoped_text_missing(&tc, "https://x/done", "welcome back").is_none());
        assert!(check_scoped_text_missing(&tc, "https://x/other", "").is_none());
    }

    #[test]
    fn auto_pass_fires_with_full_evidence() {
        let tc = checkout_case();
        let mut verified = VerifiedExpectations::new();
        verified.record(ExpectationPair::new("https://x/done", "Welcome"));
        let mut transitions = TransitionLog::default();
        transitions.push(confirm_transition(Some("Confirm")));

        let verdict = check_auto_pass(AutoPassInputs {
            tc: &tc,
            url: "https://x/done",
            body: "",
            verified: &verified,
            transitions: &transitions,
            allow_click_fallback: false,
        })
        .unwrap();
        assert!(verdict.passed);
        assert!(verdict.reason.contains("\"Welcome\" on https://x/done"));
        assert!(verdict.reason.contains("clicking \"Confirm\""));
    }

    #[test]
    fn auto_pass_withheld_without_verification() {
        let tc = checkout_case();
        let verified = VerifiedExpectations::new();
        let mut transitions = TransitionLog::default();
        transitions.push(confirm_transition(Some("Confirm")));

        assert!(check_auto_pass(AutoPassInputs {
            tc: &tc,
            url: "https://x/done",
            body: "Order placed",
            verified: &verified,
            transitions: &transitions,
            allow_click_fallback: false,
        })
        .is_none());
    }

    #[test]
    fn auto_pass_withheld_on_other_url_or_without_click() {
        let tc = checkout_case();
        let mut verified = VerifiedExpectations::new();
        verified.record(ExpectationPair::new("https://x/done", "Welcome"));

        let empty = TransitionLog::default();
        assert!(check_auto_pass(AutoPassInputs {
            tc: &tc,
            url: "https://x/done",
            body: "",
            verified: &verified,
            transitions: &empty,
            allow_click_fallback: false,
        })
        .is_none());

        let mut transitions = TransitionLog::default();
        transitions.push(confirm_transition(Some("Confirm")));
        assert!(check_auto_pass(AutoPassInputs {
            tc: &tc,
            url: "https://x/cart",
            body: "",
            verified: &verified,
            transitions: &transitions,
            allow_click_fallback: false,
        })
        .is_none());
    }

    #[test]
    fn click_fallback_is_opt_in_and_needs_no_targets() {
        let tc = TestCase::new("t", "Finish the wizard")
            .with_steps(["Finish the wizard"])
            .with_pass_criteria(["Page contains \"Welcome\" at https://x/done"]);
        let mut verified = VerifiedExpectations::new();
        verified.record(ExpectationPair::new("https://x/done", "Welcome"));
        let mut transitions = TransitionLog::default();
        transitions.push(confirm_transition(Some("Next")));

        let mut inputs = AutoPassInputs {
            tc: &tc,
            url: "https://x/done",
            body: "",
            verified: &verified,
            transitions: &transitions,
            allow_click_fallback: false,
        };
        assert!(check_auto_pass(inputs).is_none());
        inputs.allow_click_fallback = true;
        let verdict = check_auto_pass(inputs).unwrap();
        assert!(verdict.reason.contains("a click on \"Next\""));
    }

    #[test]
    fn no_pairs_means_no_pass() {
        let tc = TestCase::new("t", "o").with_pass_criteria(["The browser is at https://x/done"]);
        let verified = VerifiedExpectations::new();
        let transitions = TransitionLog::default();
        assert!(check_auto_pass(AutoPassInputs {
            tc: &tc,
            url: "https://x/done",
            body: "",
            verified: &verified,
            transitions: &transitions,
            allow_click_fallback: true,
        })
        .is_none());
    }
}
