//! Action envelope parsing.
//!
//! Models are instructed to answer with
//!
//! ```text
//! <tool_call>
//! {"name": "computer_use", "arguments": {"action": "left_click", "coordinate": [100, 200]}}
//! </tool_call>
//! ```
//!
//! [`parse_envelope`] recovers the loosely shaped request from raw text and
//! [`ActionRequest::from_raw`] validates it against an [`ActionAllowList`]
//! and turns it into a closed, typed action.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::coords::Point;
use crate::errors::ProtocolError;

/// Tool name wrapping every action.
pub const TOOL_NAME: &str = "computer_use";

const DELIMITERS: [(&str, &str); 2] = [
    ("<tool_call>", "</tool_call>"),
    ("<function_call>", "</function_call>"),
];

/// Actions offered to the model by default.
pub const CURATED_ACTIONS: [&str; 10] = [
    "key",
    "type",
    "mouse_move",
    "left_click",
    "scroll",
    "visit_url",
    "web_search",
    "history_back",
    "wait",
    "terminate",
];

/// Additional actions unlocked by `AgentLoopConfig::extended_actions`.
pub const EXTENDED_ACTIONS: [&str; 7] = [
    "double_click",
    "right_click",
    "history_forward",
    "reload",
    "select_option",
    "file_upload",
    "pause_and_memorize_fact",
];

/// Action name plus its untyped arguments, as emitted by the model.
#[derive(Debug, Clone, PartialEq)]
pub struct RawAction {
    /// Canonical (alias-resolved) action name.
    pub name: String,
    /// Full argument object, including the original `action` key.
    pub arguments: Map<String, Value>,
}

impl RawAction {
    pub fn arguments_value(&self) -> Value {
        Value::Object(self.arguments.clone())
    }
}

/// Extract an action request from raw model output.
///
/// Tries the primary `<tool_call>` block, then the alternate
/// `<function_call>` block, then the widest `{...}` span of the whole reply.
/// A missing closing tag means "until end of text" (stop sequences usually
/// swallow it). Never panics; `None` means no actionable intent.
pub fn parse_envelope(text: &str) -> Option<RawAction> {
    for (open, close) in DELIMITERS {
        if let Some(block) = tagged_block(text, open, close) {
            let candidate = accept(block).or_else(|| widest_brace_span(block).and_then(accept));
            if candidate.is_some() {
                return candidate;
            }
        }
    }
    widest_brace_span(text).and_then(accept)
}

/// Resolve the action aliases models commonly produce.
pub fn canonical_action_name(name: &str) -> String {
    let lowered = name.trim().to_ascii_lowercase();
    match lowered.as_str() {
        "click" => "left_click".to_string(),
        "input_text" => "type".to_string(),
        "hover" => "mouse_move".to_string(),
        "keypress" => "key".to_string(),
        _ => lowered,
    }
}

fn tagged_block<'a>(text: &'a str, open: &str, close: &str) -> Option<&'a str> {
    let start = text.find(open)? + open.len();
    let rest = &text[start..];
    let end = rest.find(close).unwrap_or(rest.len());
    Some(strip_code_fence(&rest[..end]))
}

fn strip_code_fence(block: &str) -> &str {
    let trimmed = block.trim();
    let Some(inner) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let inner = inner.trim_start_matches(|c: char| c.is_ascii_alphanumeric());
    inner.strip_suffix("```").unwrap_or(inner).trim()
}

fn widest_brace_span(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

fn accept(candidate: &str) -> Option<RawAction> {
    let Value::Object(mut object) = serde_json::from_str::<Value>(candidate).ok()? else {
        return None;
    };

    let arguments = if object.get("name").and_then(Value::as_str) == Some(TOOL_NAME) {
        match object.remove("arguments")? {
            Value::Object(map) => map,
            // Some servers return function arguments as an encoded string.
            Value::String(encoded) => match serde_json::from_str::<Value>(&encoded).ok()? {
                Value::Object(map) => map,
                _ => return None,
            },
            _ => return None,
        }
    } else {
        object
    };

    let name = arguments.get("action")?.as_str()?.trim();
    if name.is_empty() {
        return None;
    }
    Some(RawAction {
        name: canonical_action_name(name),
        arguments,
    })
}

/// Fixed set of action names the controller accepts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionAllowList {
    names: Vec<&'static str>,
}

impl ActionAllowList {
    pub fn curated() -> Self {
        Self {
            names: CURATED_ACTIONS.to_vec(),
        }
    }

    pub fn extended() -> Self {
        let mut names = CURATED_ACTIONS.to_vec();
        names.extend(EXTENDED_ACTIONS);
        Self { names }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.iter().any(|allowed| *allowed == name)
    }

    pub fn is_allowed(&self, raw: &RawAction) -> bool {
        self.contains(&raw.name)
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.names.iter().copied()
    }

    pub fn joined(&self) -> String {
        self.names.join(", ")
    }
}

impl Default for ActionAllowList {
    fn default() -> Self {
        Self::curated()
    }
}

/// Validated browser action. One variant per allowed action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ActionRequest {
    Key {
        #[serde(alias = "key", deserialize_with = "one_or_many")]
        keys: Vec<String>,
    },
    Type {
        #[serde(default)]
        coordinate: Option<Point>,
        #[serde(default)]
        text: String,
        #[serde(default)]
        press_enter: bool,
        #[serde(default, alias = "delete_existing_text")]
        clear: bool,
    },
    MouseMove {
        coordinate: Point,
    },
    LeftClick {
        coordinate: Point,
        #[serde(default)]
        label: Option<String>,
    },
    DoubleClick {
        coordinate: Point,
    },
    RightClick {
        coordinate: Point,
    },
    /// Positive pixels scroll up, negative scroll down.
    Scroll {
        #[serde(default)]
        pixels: f64,
        #[serde(default)]
        coordinate: Option<Point>,
    },
    VisitUrl {
        url: String,
    },
    WebSearch {
        query: String,
    },
    HistoryBack,
    HistoryForward,
    Reload,
    Wait {
        #[serde(default, alias = "duration")]
        time: Option<f64>,
    },
    SelectOption {
        coordinate: Point,
        #[serde(default)]
        value: Option<String>,
        #[serde(default)]
        label: Option<String>,
        #[serde(default)]
        index: Option<u32>,
    },
    FileUpload {
        coordinate: Point,
        #[serde(deserialize_with = "one_or_many")]
        files: Vec<String>,
    },
    PauseAndMemorizeFact {
        #[serde(default)]
        fact: String,
    },
    Terminate {
        #[serde(default)]
        status: Option<String>,
        #[serde(default, alias = "message")]
        reason: Option<String>,
    },
}

impl ActionRequest {
    /// Validate `raw` against `allow` and decode its arguments.
    pub fn from_raw(raw: &RawAction, allow: &ActionAllowList) -> Result<Self, ProtocolError> {
        if !allow.is_allowed(raw) {
            return Err(ProtocolError::Disallowed(raw.name.clone()));
        }
        let mut arguments = raw.arguments.clone();
        arguments.insert("action".to_string(), Value::String(raw.name.clone()));
        serde_json::from_value(Value::Object(arguments)).map_err(|err| {
            ProtocolError::InvalidArguments {
                action: raw.name.clone(),
                message: err.to_string(),
            }
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            ActionRequest::Key { .. } => "key",
            ActionRequest::Type { .. } => "type",
            ActionRequest::MouseMove { .. } => "mouse_move",
            ActionRequest::LeftClick { .. } => "left_click",
            ActionRequest::DoubleClick { .. } => "double_click",
            ActionRequest::RightClick { .. } => "right_click",
            ActionRequest::Scroll { .. } => "scroll",
            ActionRequest::VisitUrl { .. } => "visit_url",
            ActionRequest::WebSearch { .. } => "web_search",
            ActionRequest::HistoryBack => "history_back",
            ActionRequest::HistoryForward => "history_forward",
            ActionRequest::Reload => "reload",
            ActionRequest::Wait { .. } => "wait",
            ActionRequest::SelectOption { .. } => "select_option",
            ActionRequest::FileUpload { .. } => "file_upload",
            ActionRequest::PauseAndMemorizeFact { .. } => "pause_and_memorize_fact",
            ActionRequest::Terminate { .. } => "terminate",
        }
    }

    /// Coordinate in prompt-image space, if the action targets a position.
    pub fn coordinate(&self) -> Option<Point> {
        match self {
            ActionRequest::Type { coordinate, .. } | ActionRequest::Scroll { coordinate, .. } => {
                *coordinate
            }
            ActionRequest::MouseMove { coordinate }
            | ActionRequest::LeftClick { coordinate, .. }
            | ActionRequest::DoubleClick { coordinate }
            | ActionRequest::RightClick { coordinate }
            | ActionRequest::SelectOption { coordinate, .. }
            | ActionRequest::FileUpload { coordinate, .. } => Some(*coordinate),
            _ => None,
        }
    }

    pub fn scroll_pixels(&self) -> Option<f64> {
        match self {
            ActionRequest::Scroll { pixels, .. } => Some(*pixels),
            _ => None,
        }
    }

    /// Actions that load a new document even when the URL stays the same.
    pub fn is_navigation(&self) -> bool {
        matches!(
            self,
            ActionRequest::VisitUrl { .. }
                | ActionRequest::WebSearch { .. }
                | ActionRequest::HistoryBack
                | ActionRequest::HistoryForward
                | ActionRequest::Reload
        )
    }
}

/// Lower-cased terminate status; anything missing or blank means failure.
pub fn terminate_status(status: Option<&str>) -> String {
    match status.map(str::trim).filter(|s| !s.is_empty()) {
        Some(status) => status.to_lowercase(),
        None => "failure".to_string(),
    }
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(value) => vec![value],
        OneOrMany::Many(values) => values,
    })
}
