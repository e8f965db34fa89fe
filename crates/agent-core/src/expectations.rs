//! Natural-language expectation extraction.
//!
//! Every rule here is a heuristic over free text written by test authors.
//! The functions are pure so each rule can be pinned down by unit tests.

use once_cell::sync::Lazy;
use pilot_core_types::TestCase;
use regex::Regex;
use serde::Serialize;

use crate::urls::{looks_like_url, normalize_for_compare, urls_in};

static DOUBLE_QUOTED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#""([^"]+)""#).expect("valid double quote pattern"));

static CURLY_QUOTED: Lazy<Regex> =
    Lazy::new(|| Regex::new("\u{201c}([^\u{201d}]+)\u{201d}").expect("valid curly quote pattern"));

// Word-bounded so apostrophes in "don't" or "user's" do not open a quote.
static SINGLE_QUOTED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:^|[^\w])'([^']+)'(?:[^\w]|$)").expect("valid single quote pattern"));

static URL_ANCHOR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:on|open|opens|visit|visits|at|navigate to|go to)\s+https?://")
        .expect("valid anchor pattern")
});

static VERIFY_WORD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:verify|verifies|assert|asserts|confirm|confirms|check|checks|ensure|ensures|validate|validates|expect|expects)\b")
        .expect("valid verification pattern")
});

static CONTENT_WORD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:contain|contains|show|shows|visible|text|label|heading)\b")
        .expect("valid content pattern")
});

static FINAL_URL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)\b(?:browser is at|is at|returns to|return to|redirected to|redirects to|lands on|land on|at)\s+["'\x{201c}]?(https?://[^\s<>"'\x{201d}]+)"#)
        .expect("valid final url pattern")
});

static CLICK_VERB: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:click|clicks|tap|taps|press|presses|select|selects)\b")
        .expect("valid click verb pattern")
});

const URL_IDENTITY_PHRASES: [&str; 2] = ["browser is at", "url is"];

/// A quoted expectation tied to a normalized URL.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ExpectationPair {
    pub url: String,
    pub text: String,
}

impl ExpectationPair {
    pub fn new(url: &str, text: impl Into<String>) -> Self {
        Self {
            url: normalize_for_compare(url),
            text: text.into(),
        }
    }
}

/// First quoted substring of `step`: double, curly or single quotes,
/// whichever opens earliest. Blank quotes count as none.
pub fn expected_text_for(step: &str) -> Option<String> {
    [&*DOUBLE_QUOTED, &*CURLY_QUOTED, &*SINGLE_QUOTED]
        .into_iter()
        .filter_map(|pattern| {
            pattern
                .captures_iter(step)
                .filter_map(|caps| caps.get(1))
                .find(|m| !m.as_str().trim().is_empty())
        })
        .min_by_key(|m| m.start())
        .map(|m| m.as_str().trim().to_string())
}

/// Quoted text of `step` that is not itself a URL.
fn content_expectation(step: &str) -> Option<String> {
    expected_text_for(step).filter(|text| !looks_like_url(text))
}

/// True when every URL mentioned in `step` normalizes to `target`, and
/// there is at least one.
fn tied_only_to(step: &str, target: &str) -> bool {
    let urls = urls_in(step);
    !urls.is_empty() && urls.iter().all(|url| normalize_for_compare(url) == target)
}

fn is_scoped_content_check(step: &str) -> bool {
    let lowered = step.to_lowercase();
    URL_ANCHOR.is_match(step)
        && VERIFY_WORD.is_match(step)
        && CONTENT_WORD.is_match(step)
        && !URL_IDENTITY_PHRASES
            .iter()
            .any(|phrase| lowered.contains(phrase))
}

/// Quoted expectations explicitly tied to `url`, de-duplicated, in the order
/// they appear across objective steps then pass criteria.
///
/// A step qualifies when it anchors the URL with a navigation phrase and is
/// worded as a content verification; a pass criterion qualifies by simply
/// embedding the URL. Steps that mention any other URL never qualify.
pub fn scoped_expectations_for_url(tc: &TestCase, url: &str) -> Vec<String> {
    let target = normalize_for_compare(url);
    let steps = tc.objective_steps.iter().map(|s| (s, false));
    let criteria = tc.pass_criteria.iter().map(|s| (s, true));

    let mut found: Vec<String> = Vec::new();
    for (text, is_criterion) in steps.chain(criteria) {
        if !tied_only_to(text, &target) {
            continue;
        }
        if !is_criterion && !is_scoped_content_check(text) {
            continue;
        }
        if let Some(expected) = content_expectation(text) {
            if !found.contains(&expected) {
                found.push(expected);
            }
        }
    }
    found
}

/// `(url, text)` pairs embedded in the pass criteria. Uses the first URL of
/// each criterion.
pub fn pass_criteria_pairs(tc: &TestCase) -> Vec<ExpectationPair> {
    let mut pairs: Vec<ExpectationPair> = Vec::new();
    for criterion in &tc.pass_criteria {
        let Some(url) = urls_in(criterion).into_iter().next() else {
            continue;
        };
        let Some(text) = content_expectation(criterion) else {
            continue;
        };
        let pair = ExpectationPair::new(&url, text);
        if !pairs.contains(&pair) {
            pairs.push(pair);
        }
    }
    pairs
}

/// The URL the pass criteria say the browser should end on, normalized.
/// When several criteria name one, the last wins.
pub fn final_url_from_criteria(tc: &TestCase) -> Option<String> {
    tc.pass_criteria
        .iter()
        .flat_map(|criterion| FINAL_URL.captures_iter(criterion))
        .filter_map(|caps| caps.get(1))
        .last()
        .map(|m| normalize_for_compare(crate::urls::trim_trailing_punctuation(m.as_str())))
}

/// Quoted click targets named by objective steps ("Click \"Confirm\"").
pub fn click_targets(tc: &TestCase) -> Vec<String> {
    let mut targets: Vec<String> = Vec::new();
    for step in &tc.objective_steps {
        if !CLICK_VERB.is_match(step) {
            continue;
        }
        if let Some(text) = content_expectation(step) {
            if !targets.contains(&text) {
                targets.push(text);
            }
        }
    }
    targets
}

#[cfg(test)]
mod tests {
    use super::*;

    fn case(steps: &[&str], pass: &[&str]) -> TestCase {
        TestCase::new("t", "objective")
            .with_steps(steps.iter().copied())
            .with_pass_criteria(pass.iter().copied())
    }

    #[test]
    fn quoted_text_variants() {
        assert_eq!(expected_text_for(r#"Page shows "Welcome""#).as_deref(), Some("Welcome"));
        assert_eq!(expected_text_for("Heading reads 'Sign in'").as_deref(), Some("Sign in"));
        assert_eq!(
            expected_text_for("Label \u{201c}Saved\u{201d} appears").as_deref(),
            Some("Saved")
        );
        assert_eq!(expected_text_for("no quotes here"), None);
        assert_eq!(expected_text_for(r#"empty "  " quote"#), None);
    }

    #[test]
    fn earliest_quote_wins() {
        assert_eq!(
            expected_text_for(r#"Click 'Next' then verify "Done""#).as_deref(),
            Some("Next")
        );
    }

    #[test]
    fn apostrophes_do_not_open_quotes() {
        assert_eq!(expected_text_for("Don't click the user's avatar"), None);
    }

    #[test]
    fn scoped_step_requires_anchor_verification_and_content() {
        let tc = case(
            &[
                r#"On https://x.test/done verify the heading shows "Welcome""#,
                r#"Visit https://x.test/done and click "Logout""#,
                r#"Click "Confirm" and verify the browser returns to https://x.test/done"#,
            ],
            &[],
        );
        assert_eq!(
            scoped_expectations_for_url(&tc, "https://x.test/done/"),
            vec!["Welcome".to_string()]
        );
    }

    #[test]
    fn url_identity_phrases_are_excluded() {
        let tc = case(
            &[r#"Verify the browser is at https://x.test/done and shows text "Hi""#],
            &[],
        );
        assert!(scoped_expectations_for_url(&tc, "https://x.test/done").is_empty());
    }

    #[test]
    fn pass_criterion_embedding_url_is_scoped() {
        let tc = case(&[], &[r#"Page contains "Welcome" at https://x/done"#]);
        assert_eq!(scoped_expectations_for_url(&tc, "https://x/done"), vec!["Welcome"]);
        assert!(scoped_expectations_for_url(&tc, "https://x/other").is_empty());
    }

    #[test]
    fn steps_naming_another_url_never_leak() {
        let tc = case(
            &[r#"On https://x.test/a verify the text "A" is visible, then open https://x.test/b"#],
            &[r#"Page at https://x.test/b contains "B" after https://x.test/a"#],
        );
        assert!(scoped_expectations_for_url(&tc, "https://x.test/a").is_empty());
        assert!(scoped_expectations_for_url(&tc, "https://x.test/b").is_empty());
    }

    #[test]
    fn scoped_results_are_deduplicated() {
        let tc = case(
            &[r#"On https://x/done verify text "Welcome" is visible"#],
            &[
                r#"Page contains "Welcome" at https://x/done"#,
                r#"https://x/done shows "Welcome""#,
            ],
        );
        assert_eq!(scoped_expectations_for_url(&tc, "https://x/done"), vec!["Welcome"]);
    }

    #[test]
    fn quoted_urls_are_not_content() {
        let tc = case(&[], &[r#"Browser is at "https://x/done""#]);
        assert!(scoped_expectations_for_url(&tc, "https://x/done").is_empty());
        assert!(pass_criteria_pairs(&tc).is_empty());
    }

    #[test]
    fn criteria_pairs_and_final_url() {
        let tc = case(
            &[],
            &[
                r#"Page contains "Welcome" at https://x/done"#,
                "The browser returns to https://x/home.",
            ],
        );
        assert_eq!(
            pass_criteria_pairs(&tc),
            vec![ExpectationPair::new("https://x/done", "Welcome")]
        );
        assert_eq!(final_url_from_criteria(&tc).as_deref(), Some("https://x/home"));
    }

    #[test]
    fn final_url_may_be_quoted() {
        let tc = case(&[], &[r#"Browser is at "https://x/done""#]);
        assert_eq!(final_url_from_criteria(&tc).as_deref(), Some("https://x/done"));
    }

    #[test]
    fn final_url_absent_without_phrase() {
        let tc = case(&[], &[r#"Heading "Welcome" visible (see https://x/done)"#]);
        assert_eq!(final_url_from_criteria(&tc), None);
    }

    #[test]
    fn click_targets_come_from_click_steps() {
        let tc = case(
            &[
                r#"Type "alice" into the username field"#,
                r#"Click "Confirm""#,
                r#"Press 'Continue' to finish"#,
                r#"Click "Confirm" again"#,
            ],
            &[],
        );
        assert_eq!(click_targets(&tc), vec!["Confirm", "Continue"]);
    }
}
