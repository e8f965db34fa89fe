//! Page scripts evaluated through `Runtime.evaluate`.

use agent_core::OptionChoice;
use serde_json::json;

/// `document.body.innerText`, truncated in the page.
pub fn body_text(max_len: usize) -> String {
    format!("(document.body ? document.body.innerText : '').slice(0, {max_len})")
}

/// Scroll offset plus document and viewport extents.
pub const SCROLL_POSITION: &str = r#"(() => {
  const body = document.body || {};
  const root = document.documentElement || {};
  return {
    x: window.scrollX,
    y: window.scrollY,
    scrollHeight: Math.max(body.scrollHeight || 0, root.scrollHeight || 0),
    scrollWidth: Math.max(body.scrollWidth || 0, root.scrollWidth || 0),
    viewportH: window.innerHeight,
    viewportW: window.innerWidth,
  };
})()"#;

/// Describe the element under a viewport point in `ElementInfo` shape.
pub fn inspect_point(x: f64, y: f64) -> String {
    format!(
        r#"(() => {{
  const el = document.elementFromPoint({x}, {y});
  if (!el) {{ return {{ found: false }}; }}
  const isButtonInput = el.tagName === 'INPUT' && /^(submit|button|reset)$/i.test(el.type || '');
  const labelled = el.labels && el.labels.length ? el.labels[0].innerText : null;
  const text = (el.innerText || (isButtonInput ? el.value : '') || el.getAttribute('aria-label') || '').trim();
  return {{
    found: true,
    tag: el.tagName.toLowerCase(),
    type: el.getAttribute('type'),
    role: el.getAttribute('role'),
    text: text.slice(0, 100),
    ariaChecked: el.getAttribute('aria-checked'),
    checked: typeof el.checked === 'boolean' ? el.checked : null,
    label: el.getAttribute('aria-label') || labelled || (isButtonInput ? el.value : null),
  }};
}})()"#
    )
}

/// Pick an option of the `<select>` at a point, firing input/change events.
pub fn select_option(x: f64, y: f64, choice: &OptionChoice) -> String {
    let want = json!({
        "value": choice.value,
        "label": choice.label,
        "index": choice.index,
    });
    format!(
        r#"(() => {{
  const hit = document.elementFromPoint({x}, {y});
  let el = hit ? hit.closest('select') : null;
  if (!el && hit) {{
    const label = hit.closest('label');
    if (label && label.control && label.control.tagName === 'SELECT') {{ el = label.control; }}
  }}
  if (!el) {{ return {{ ok: false, reason: 'no_select' }}; }}
  const want = {want};
  const options = Array.from(el.options);
  let match = null;
  if (want.value != null) {{ match = options.find((o) => o.value === want.value); }}
  if (!match && want.label != null) {{
    const label = String(want.label).trim().toLowerCase();
    match = options.find((o) => o.label.trim().toLowerCase() === label)
      || options.find((o) => o.text.trim().toLowerCase().includes(label));
  }}
  if (!match && want.index != null) {{ match = options[want.index] || null; }}
  if (!match) {{ return {{ ok: false, reason: 'no_option', available: options.map((o) => o.label) }}; }}
  el.value = match.value;
  match.selected = true;
  el.dispatchEvent(new Event('input', {{ bubbles: true }}));
  el.dispatchEvent(new Event('change', {{ bubbles: true }}));
  return {{ ok: true, label: match.label || match.text || match.value }};
}})()"#
    )
}

/// The file input at a point: the element itself, the control of an
/// enclosing label, or the only file input inside the enclosing form.
pub fn file_input_at(x: f64, y: f64) -> String {
    format!(
        r#"(() => {{
  const hit = document.elementFromPoint({x}, {y});
  if (!hit) {{ return null; }}
  const isFile = (el) => el && el.tagName === 'INPUT' && el.type === 'file';
  if (isFile(hit)) {{ return hit; }}
  const label = hit.closest('label');
  if (label && isFile(label.control)) {{ return label.control; }}
  const scope = hit.closest('form') || hit.parentElement;
  const inputs = scope ? scope.querySelectorAll('input[type=file]') : [];
  return inputs.length === 1 ? inputs[0] : null;
}})()"#
    )
}
