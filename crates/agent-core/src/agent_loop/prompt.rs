//! Prompt text for the round controller.
//!
//! The system prompt and task brief are built once per run; only the round
//! context changes between rounds, which keeps each request small.

use pilot_core_types::TestCase;

use crate::coords::ImageSize;
use crate::envelope::{ActionAllowList, TOOL_NAME};
use crate::expectations::ExpectationPair;

const ROLE: &str = "You are a meticulous QA end-to-end tester operating a real browser.";

const TESTING_RULES: &str = "\
Testing rules:
- PASS only when the page you can see clearly satisfies the pass criteria. If you are unsure, blocked, or see errors or a missing redirect, choose FAIL.
- Take the fewest actions that reach the goal. Do not repeat clicks, refill forms or scroll back and forth.
- If the page shows a 404, not found or error page instead of the expected destination, terminate with failure and name the error.
- After submitting a form or navigating, evaluate the new page before doing anything else. Do not restart the flow unless an error message requires it.
- Never claim success for something you did not see.";

const CONTROL_TIPS: &str = "\
Browser tips:
- Look at the screenshot before pointing; aim at the centre of visible targets.
- Move over a scrollable region before scrolling. Close stubborn popups with the Escape key.
- For search boxes with suggestions, type with press_enter false and then click the search button.
- Nudge coordinates slightly if a click has no effect.";

fn describe_action(name: &str) -> &'static str {
    match name {
        "key" => "Press keys in order, e.g. [\"Enter\"], [\"Tab\"], [\"Control\", \"a\"].",
        "type" => "Type `text`. Optional `coordinate` to focus first, `press_enter`, `delete_existing_text`.",
        "mouse_move" => "Move the cursor to `coordinate` without clicking.",
        "left_click" => "Left click at `coordinate`.",
        "double_click" => "Double click at `coordinate`.",
        "right_click" => "Right click at `coordinate`.",
        "scroll" => "Scroll by `pixels` (positive scrolls up, negative scrolls down).",
        "visit_url" => "Open `url`. https:// is added when missing; plain words become a search.",
        "web_search" => "Search the web for `query`.",
        "history_back" => "Go back one page.",
        "history_forward" => "Go forward one page.",
        "reload" => "Reload the page.",
        "wait" => "Wait `time` seconds.",
        "select_option" => "Choose an option of the dropdown at `coordinate` by `value`, `label` or `index`.",
        "file_upload" => "Attach `files` to the file input at `coordinate`.",
        "pause_and_memorize_fact" => "Remember `fact` for later rounds.",
        "terminate" => "Finish with `status` \"success\" or \"failure\" and a short `reason`.",
        _ => "",
    }
}

/// System prompt: role, rules, the resized screen resolution and the
/// allowed actions.
pub fn format_system_prompt(image_size: Option<ImageSize>, allow: &ActionAllowList) -> String {
    let mut sections = vec![ROLE.to_string()];
    if let Some(size) = image_size {
        sections.push(format!(
            "The screen's resolution is {}x{} pixels.",
            size.width, size.height
        ));
    }
    sections.push(TESTING_RULES.to_string());
    sections.push(CONTROL_TIPS.to_string());

    let actions = allow
        .names()
        .map(|name| format!("- `{name}`: {}", describe_action(name)))
        .collect::<Vec<_>>()
        .join("\n");
    sections.push(format!("Available actions:\n{actions}"));
    sections.push(format!(
        "Reply with exactly one tool call:\n<tool_call>\n{{\"name\": \"{TOOL_NAME}\", \"arguments\": {{\"action\": \"ACTION_NAME\", ...}}}}\n</tool_call>\n\nExamples:\n<tool_call>\n{{\"name\": \"{TOOL_NAME}\", \"arguments\": {{\"action\": \"left_click\", \"coordinate\": [100, 200]}}}}\n</tool_call>\n<tool_call>\n{{\"name\": \"{TOOL_NAME}\", \"arguments\": {{\"action\": \"terminate\", \"status\": \"success\", \"reason\": \"Dashboard shown after sign in.\"}}}}\n</tool_call>"
    ));
    sections.push("You are executing an end-to-end test case. Be decisive and avoid loops.".into());
    sections.join("\n\n")
}

/// Static task brief, sent once per run.
pub fn format_task_brief(tc: &TestCase) -> String {
    let mut lines = vec![format!("Objective: {}", tc.objective)];
    if let Some(start) = &tc.start_url {
        lines.push(format!("Start URL: {start}"));
    }
    push_list(&mut lines, "Steps:", &tc.objective_steps, true);
    push_list(&mut lines, "PASS criteria:", &tc.pass_criteria, false);
    push_list(&mut lines, "FAIL criteria:", &tc.fail_criteria, false);
    if !tc.credentials.is_empty() {
        lines.push(String::new());
        lines.push("Credentials:".into());
        lines.extend(tc.credentials.iter().map(|(k, v)| format!("- {k}: {v}")));
    }
    if let Some(notes) = tc.notes.as_deref().filter(|n| !n.trim().is_empty()) {
        lines.push(String::new());
        lines.push(format!("Notes: {notes}"));
    }
    lines.join("\n")
}

fn push_list(lines: &mut Vec<String>, heading: &str, items: &[String], numbered: bool) {
    if items.is_empty() {
        return;
    }
    lines.push(String::new());
    lines.push(heading.to_string());
    for (i, item) in items.iter().enumerate() {
        if numbered {
            lines.push(format!("{}. {item}", i + 1));
        } else {
            lines.push(format!("- {item}"));
        }
    }
}

/// Everything that varies between rounds.
#[derive(Debug, Clone, Default)]
pub struct RoundContext<'a> {
    pub url: &'a str,
    pub rounds_left: u32,
    pub page_changed: bool,
    pub just_submitted: bool,
    pub left_start: bool,
    pub click_hint: Option<String>,
    pub verified: &'a [ExpectationPair],
    pub recent_actions: &'a [String],
    pub warnings: Vec<String>,
    pub facts: &'a [String],
    /// Latest `Scroll position: ...` line, if the run has scrolled.
    pub scroll_position: Option<String>,
    pub scroll_oscillating: bool,
    pub title: &'a str,
    pub snippet: String,
}

pub fn format_round_context(ctx: &RoundContext<'_>) -> String {
    let mut lines = vec![
        format!("Current URL: {}", ctx.url),
        format!("Rounds left: {}", ctx.rounds_left),
    ];

    if ctx.left_start {
        lines.push(String::new());
        lines.push("You have left the starting page. Do NOT restart or refill the form unless an error requires it.".into());
    }
    if ctx.page_changed {
        lines.push(String::new());
        lines.push("The page changed. Evaluate PASS/FAIL now; do not redo earlier steps.".into());
    }
    if ctx.just_submitted {
        lines.push(String::new());
        lines.push("You just submitted. Do NOT refill the form. Evaluate and terminate.".into());
    }
    if let Some(target) = &ctx.click_hint {
        lines.push(String::new());
        lines.push(format!("If \"{target}\" is visible, click it next."));
    }
    if !ctx.verified.is_empty() {
        lines.push(String::new());
        lines.push("Verified so far:".into());
        lines.extend(
            ctx.verified
                .iter()
                .map(|pair| format!("- \"{}\" seen on {}", pair.text, pair.url)),
        );
    }
    if !ctx.facts.is_empty() {
        lines.push(String::new());
        lines.push("Remembered facts:".into());
        lines.extend(ctx.facts.iter().map(|fact| format!("- {fact}")));
    }
    if !ctx.recent_actions.is_empty() {
        lines.push(String::new());
        lines.push("Recent actions:".into());
        lines.extend(ctx.recent_actions.iter().cloned());
    }
    if !ctx.warnings.is_empty() {
        lines.push(String::new());
        lines.push("Avoid redundant actions:".into());
        lines.extend(ctx.warnings.iter().cloned());
    }
    if let Some(position) = &ctx.scroll_position {
        lines.push(String::new());
        lines.push(position.clone());
    }
    if ctx.scroll_oscillating {
        lines.push("Loop warning: Scrolling up/down repeatedly. Click a result instead.".into());
    }

    lines.push(String::new());
    lines.push(format!("Page title: {}", ctx.title));
    lines.push(format!("Page text snippet: {}", ctx.snippet));
    lines.push(String::new());
    lines.push("When confident, call terminate with status 'success' or 'failure' and a reason.".into());
    lines.join("\n")
}

/// First click target from the steps that has not been clicked yet and is
/// present in the page text.
pub fn click_hint(targets: &[String], clicked: &[String], body: &str) -> Option<String> {
    let body = body.to_lowercase();
    targets
        .iter()
        .filter(|target| {
            !clicked
                .iter()
                .any(|done| done.to_lowercase().contains(&target.to_lowercase()))
        })
        .find(|target| body.contains(&target.to_lowercase()))
        .cloned()
}

/// Follow-up turn after an unusable reply.
pub fn format_repair_prompt(allow: &ActionAllowList, problem: &str, excerpt: &str) -> String {
    format!(
        "Your previous reply could not be used ({problem}).\n\
         Previous reply: {excerpt}\n\n\
         Return ONLY one tagged tool call, no prose:\n\
         <tool_call>\n{{\"name\": \"{TOOL_NAME}\", \"arguments\": {{\"action\": \"...\"}}}}\n</tool_call>\n\
         Allowed actions: {}.",
        allow.joined()
    )
}

/// First `max` characters of `text` with whitespace collapsed.
pub fn snippet(text: &str, max: usize) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed.chars().take(max).collect()
}
