//! Repeat/loop detection.
//!
//! Thresholds are fixed policy and not configurable per test. The detector
//! only ever produces a reason to stop, never a reason to succeed.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use crate::coords::Point;

/// Grid size, in viewport pixels, used to absorb coordinate jitter.
pub const BUCKET_SIZE: f64 = 20.0;
/// Identical consecutive signatures that abort the run.
pub const STREAK_LIMIT: u32 = 3;
/// Clicks on one bucket that abort the run.
pub const CLICK_LIMIT: u32 = 4;
/// Type actions on one bucket that abort the run.
pub const TYPE_LIMIT: u32 = 3;
/// Visits to one URL after which missing scoped text aborts the run.
pub const VISIT_LIMIT: u32 = 3;

const WARN_AT: u32 = 2;
const ESCALATE_AT: u32 = 3;

pub type Bucket = (i64, i64);

/// Snap a viewport point onto the detector grid.
pub fn bucket(point: Point) -> Bucket {
    (
        (point.x / BUCKET_SIZE).floor() as i64,
        (point.y / BUCKET_SIZE).floor() as i64,
    )
}

fn bucket_origin((bx, by): Bucket) -> (i64, i64) {
    (bx * BUCKET_SIZE as i64, by * BUCKET_SIZE as i64)
}

/// Identity of one round's action for streak counting.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionSignature {
    action: String,
    url: String,
    bucket: Option<Bucket>,
    pixels: Option<f64>,
}

impl ActionSignature {
    pub fn new(
        action: impl Into<String>,
        normalized_url: impl Into<String>,
        bucket: Option<Bucket>,
        pixels: Option<f64>,
    ) -> Self {
        Self {
            action: action.into(),
            url: normalized_url.into(),
            bucket,
            pixels,
        }
    }
}

impl fmt::Display for ActionSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}|", self.action, self.url)?;
        match self.bucket {
            Some((x, y)) => write!(f, "{x},{y}|")?,
            None => f.write_str("-|")?,
        }
        match self.pixels {
            Some(pixels) => write!(f, "{pixels}"),
            None => f.write_str("-"),
        }
    }
}

/// Why the detector stopped a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopAbort {
    RepeatedAction,
    ClickRegion { bucket: Bucket },
    TypeField { bucket: Bucket },
    RevisitMissingText { url: String, expected: String },
}

impl fmt::Display for LoopAbort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoopAbort::RepeatedAction => write!(
                f,
                "Loop detected: repeated the same action {STREAK_LIMIT} times in a row without progress."
            ),
            LoopAbort::ClickRegion { bucket } => {
                let (x, y) = bucket_origin(*bucket);
                write!(
                    f,
                    "Loop detected: clicked the same region {CLICK_LIMIT}+ times without progress (near {x},{y})."
                )
            }
            LoopAbort::TypeField { bucket } => {
                let (x, y) = bucket_origin(*bucket);
                write!(
                    f,
                    "Loop detected: typed in the same field {TYPE_LIMIT}+ times without progress (near {x},{y})."
                )
            }
            LoopAbort::RevisitMissingText { url, expected } => write!(
                f,
                "Loop detected: visited {url} {VISIT_LIMIT}+ times but \"{expected}\" is still missing."
            ),
        }
    }
}

/// Per-run repeat counters. Constructed fresh for every test case.
#[derive(Debug, Default)]
pub struct LoopDetector {
    clicks: BTreeMap<Bucket, u32>,
    types: BTreeMap<Bucket, u32>,
    visits: HashMap<String, u32>,
    last_signature: Option<ActionSignature>,
    streak: u32,
}

impl LoopDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget click/type regions. Called whenever the page changed.
    pub fn clear_regions(&mut self) {
        self.clicks.clear();
        self.types.clear();
    }

    /// Count a positional interaction. Only clicks and typing are tracked.
    pub fn record_interaction(&mut self, action: &str, point: Point) {
        let counters = match action {
            "left_click" => &mut self.clicks,
            "type" => &mut self.types,
            _ => return,
        };
        *counters.entry(bucket(point)).or_insert(0) += 1;
    }

    /// Update the streak and return its new length.
    pub fn record_signature(&mut self, signature: ActionSignature) -> u32 {
        if self.last_signature.as_ref() == Some(&signature) {
            self.streak += 1;
        } else {
            self.streak = 1;
            self.last_signature = Some(signature);
        }
        self.streak
    }

    /// Count a visit to a normalized URL and return the running total.
    pub fn record_visit(&mut self, normalized_url: &str) -> u32 {
        let count = self.visits.entry(normalized_url.to_string()).or_insert(0);
        *count += 1;
        *count
    }

    pub fn visits(&self, normalized_url: &str) -> u32 {
        self.visits.get(normalized_url).copied().unwrap_or(0)
    }

    pub fn streak(&self) -> u32 {
        self.streak
    }

    pub fn check_streak(&self) -> Option<LoopAbort> {
        (self.streak >= STREAK_LIMIT).then_some(LoopAbort::RepeatedAction)
    }

    pub fn check_regions(&self) -> Option<LoopAbort> {
        if let Some((bucket, _)) = self.clicks.iter().find(|(_, n)| **n >= CLICK_LIMIT) {
            return Some(LoopAbort::ClickRegion { bucket: *bucket });
        }
        self.types
            .iter()
            .find(|(_, n)| **n >= TYPE_LIMIT)
            .map(|(bucket, _)| LoopAbort::TypeField { bucket: *bucket })
    }

    /// Abort when `url` has been visited often enough and still lacks
    /// `missing` scoped text.
    pub fn check_revisit(&self, normalized_url: &str, missing: Option<&str>) -> Option<LoopAbort> {
        let expected = missing?;
        (self.visits(normalized_url) >= VISIT_LIMIT).then(|| LoopAbort::RevisitMissingText {
            url: normalized_url.to_string(),
            expected: expected.to_string(),
        })
    }

    /// Advisory lines for the model about regions it keeps hitting.
    pub fn repeat_warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        for (bucket, count) in &self.clicks {
            if *count >= WARN_AT {
                let (x, y) = bucket_origin(*bucket);
                warnings.push(escalate(
                    format!("- Clicked near ({x},{y}) {count} times; avoid unless visibly unchecked."),
                    *count,
                ));
            }
        }
        for (bucket, count) in &self.types {
            if *count >= WARN_AT {
                let (x, y) = bucket_origin(*bucket);
                warnings.push(escalate(
                    format!("- Typed near ({x},{y}) {count} times; avoid unless an error is visible."),
                    *count,
                ));
            }
        }
        warnings
    }
}

fn escalate(mut line: String, count: u32) -> String {
    if count >= ESCALATE_AT {
        line.push_str(" Change approach or terminate failure.");
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jittered_clicks_share_a_bucket() {
        assert_eq!(bucket(Point::new(101.0, 205.0)), bucket(Point::new(119.9, 219.0)));
        assert_ne!(bucket(Point::new(119.0, 205.0)), bucket(Point::new(121.0, 205.0)));
    }

    #[test]
    fn four_clicks_in_one_bucket_abort() {
        let mut detector = LoopDetector::new();
        let points = [(101.0, 201.0), (104.0, 203.0), (110.0, 210.0), (115.0, 218.0)];
        for (i, (x, y)) in points.into_iter().enumerate() {
            detector.record_interaction("left_click", Point::new(x, y));
            let abort = detector.check_regions();
            if i < 3 {
                assert!(abort.is_none());
            } else {
                let abort = abort.unwrap();
                assert!(abort
                    .to_string()
                    .contains("clicked the same region 4+ times without progress"));
            }
        }
    }

    #[test]
    fn three_types_in_one_field_abort() {
        let mut detector = LoopDetector::new();
        for _ in 0..3 {
            detector.record_interaction("type", Point::new(50.0, 50.0));
        }
        assert!(matches!(
            detector.check_regions(),
            Some(LoopAbort::TypeField { .. })
        ));
    }

    #[test]
    fn clearing_regions_keeps_visits_and_streak() {
        let mut detector = LoopDetector::new();
        detector.record_interaction("left_click", Point::new(1.0, 1.0));
        detector.record_visit("https://x.test");
        detector.record_signature(ActionSignature::new("wait", "https://x.test", None, None));
        detector.clear_regions();
        assert!(detector.repeat_warnings().is_empty());
        assert_eq!(detector.visits("https://x.test"), 1);
        assert_eq!(detector.streak(), 1);
    }

    #[test]
    fn streak_resets_on_any_change() {
        let mut detector = LoopDetector::new();
        let sig = || ActionSignature::new("scroll", "https://x.test", None, Some(-300.0));
        assert_eq!(detector.record_signature(sig()), 1);
        assert_eq!(detector.record_signature(sig()), 2);
        assert_eq!(
            detector.record_signature(ActionSignature::new("scroll", "https://x.test", None, Some(300.0))),
            1
        );
        detector.record_signature(ActionSignature::new("scroll", "https://x.test", None, Some(300.0)));
        detector.record_signature(ActionSignature::new("scroll", "https://x.test", None, Some(300.0)));
        assert_eq!(detector.check_streak(), Some(LoopAbort::RepeatedAction));
    }

    #[test]
    fn signature_format() {
        let sig = ActionSignature::new("left_click", "https://x.test", Some((5, 10)), None);
        assert_eq!(sig.to_string(), "left_click|https://x.test|5,10|-");
        let sig = ActionSignature::new("scroll", "https://x.test", None, Some(-500.0));
        assert_eq!(sig.to_string(), "scroll|https://x.test|-|-500");
    }

    #[test]
    fn revisit_needs_missing_text_and_enough_visits() {
        let mut detector = LoopDetector::new();
        let url = "https://x.test/done";
        detector.record_visit(url);
        detector.record_visit(url);
        assert!(detector.check_revisit(url, Some("Welcome")).is_none());
        detector.record_visit(url);
        assert!(detector.check_revisit(url, None).is_none());
        let abort = detector.check_revisit(url, Some("Welcome")).unwrap();
        assert_eq!(
            abort.to_string(),
            "Loop detected: visited https://x.test/done 3+ times but \"Welcome\" is still missing."
        );
    }

    #[test]
    fn warnings_escalate() {
        let mut detector = LoopDetector::new();
        detector.record_interaction("left_click", Point::new(45.0, 65.0));
        assert!(detector.repeat_warnings().is_empty());
        detector.record_interaction("left_click", Point::new(45.0, 65.0));
        assert_eq!(
            detector.repeat_warnings(),
            vec!["- Clicked near (40,60) 2 times; avoid unless visibly unchecked.".to_string()]
        );
        detector.record_interaction("left_click", Point::new(45.0, 65.0));
        assert!(detector.repeat_warnings()[0].ends_with("Change approach or terminate failure."));
    }
}
