//! URL helpers shared by the loop detector, expectation extractor and executor.

use once_cell::sync::Lazy;
use regex::Regex;
use url::{form_urlencoded, Url};

/// Normalized URLs are truncated to this many characters before comparison.
pub const MAX_COMPARE_LEN: usize = 300;

const SEARCH_ENDPOINT: &str = "https://www.bing.com/search";

static URL_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)\bhttps?://[^\s"'<>()\[\]{}]+"#).expect("valid url pattern")
});

/// Comparison key for a URL: fragment dropped, trailing slashes stripped,
/// capped at [`MAX_COMPARE_LEN`] characters, lower-cased.
pub fn normalize_for_compare(raw: &str) -> String {
    let trimmed = raw.trim();
    let mut text = match Url::parse(trimmed) {
        Ok(mut parsed) => {
            parsed.set_fragment(None);
            parsed.to_string()
        }
        Err(_) => trimmed
            .split_once('#')
            .map(|(head, _)| head)
            .unwrap_or(trimmed)
            .to_string(),
    };
    while text.ends_with('/') {
        text.pop();
    }
    text.chars()
        .take(MAX_COMPARE_LEN)
        .collect::<String>()
        .to_lowercase()
}

/// Every http(s) URL embedded in free text, in order of appearance, with
/// trailing sentence punctuation removed.
pub fn urls_in(text: &str) -> Vec<String> {
    URL_PATTERN
        .find_iter(text)
        .map(|m| trim_trailing_punctuation(m.as_str()).to_string())
        .filter(|url| !url.is_empty())
        .collect()
}

pub fn looks_like_url(text: &str) -> bool {
    let lowered = text.trim().to_ascii_lowercase();
    lowered.starts_with("http://")
        || lowered.starts_with("https://")
        || lowered.starts_with("www.")
}

pub(crate) fn trim_trailing_punctuation(raw: &str) -> &str {
    raw.trim_end_matches(['.', ',', ';', ':', '!', '?'])
}

/// Resolve a `visit_url` argument into something the browser can load.
pub fn navigation_target(raw: &str) -> String {
    let raw = raw.trim();
    if ["https://", "http://", "file://", "about:"]
        .iter()
        .any(|prefix| raw.starts_with(prefix))
    {
        return raw.to_string();
    }
    if raw.contains(' ') {
        return search_url(raw);
    }
    format!("https://{raw}")
}

pub fn search_url(query: &str) -> String {
    let encoded: String = form_urlencoded::byte_serialize(query.trim().as_bytes()).collect();
    format!("{SEARCH_ENDPOINT}?q={encoded}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalization_ignores_fragment_case_and_trailing_slash() {
        assert_eq!(
            normalize_for_compare(" https://Example.com/Done/#top "),
            "https://example.com/done"
        );
        assert_eq!(
            normalize_for_compare("https://example.com"),
            normalize_for_compare("https://example.com/")
        );
        assert_eq!(normalize_for_compare("about:blank"), "about:blank");
    }

    #[test]
    fn normalization_caps_length() {
        let long = format!("https://example.com/{}", "a".repeat(400));
        assert_eq!(normalize_for_compare(&long).chars().count(), MAX_COMPARE_LEN);
    }

    #[test]
    fn extracts_urls_without_trailing_punctuation() {
        let found = urls_in("Open https://x.test/login, then verify https://x.test/done.");
        assert_eq!(found, vec!["https://x.test/login", "https://x.test/done"]);
    }

    #[test]
    fn navigation_target_rules() {
        assert_eq!(navigation_target("https://a.test"), "https://a.test");
        assert_eq!(navigation_target("about:blank"), "about:blank");
        assert_eq!(navigation_target("a.test/path"), "https://a.test/path");
        assert_eq!(
            navigation_target("rust borrow checker"),
            "https://www.bing.com/search?q=rust+borrow+checker"
        );
    }

    #[test]
    fn url_detection() {
        assert!(looks_like_url("https://x.test"));
        assert!(looks_like_url("www.x.test"));
        assert!(!looks_like_url("Welcome back"));
    }
}
