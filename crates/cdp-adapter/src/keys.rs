//! Key names to `Input.dispatchKeyEvent` parameters.

/// `Input.dispatchKeyEvent` modifier bits.
pub const ALT: u32 = 1;
pub const CTRL: u32 = 2;
pub const META: u32 = 4;
pub const SHIFT: u32 = 8;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyDef {
    pub key: String,
    pub code: String,
    pub key_code: u32,
    /// Text inserted by the key, if it produces any.
    pub text: Option<String>,
}

impl KeyDef {
    fn named(key: &str, code: &str, key_code: u32) -> Self {
        Self {
            key: key.to_string(),
            code: code.to_string(),
            key_code,
            text: None,
        }
    }

    fn with_text(mut self, text: &str) -> Self {
        self.text = Some(text.to_string());
        self
    }
}

/// Resolve a key name as the model writes it ("Enter", "ctrl", "ArrowDown",
/// "a"). Unknown names are sent through as-is.
pub fn key_definition(name: &str) -> KeyDef {
    let mut chars = name.chars();
    if let (Some(c), None) = (chars.next(), chars.next()) {
        return char_key(c);
    }

    match name.to_ascii_lowercase().as_str() {
        "enter" | "return" => KeyDef::named("Enter", "Enter", 13).with_text("\r"),
        "tab" => KeyDef::named("Tab", "Tab", 9),
        "escape" | "esc" => KeyDef::named("Escape", "Escape", 27),
        "backspace" => KeyDef::named("Backspace", "Backspace", 8),
        "delete" | "del" => KeyDef::named("Delete", "Delete", 46),
        "space" => KeyDef::named(" ", "Space", 32).with_text(" "),
        "arrowup" | "up" => KeyDef::named("ArrowUp", "ArrowUp", 38),
        "arrowdown" | "down" => KeyDef::named("ArrowDown", "ArrowDown", 40),
        "arrowleft" | "left" => KeyDef::named("ArrowLeft", "ArrowLeft", 37),
        "arrowright" | "right" => KeyDef::named("ArrowRight", "ArrowRight", 39),
        "home" => KeyDef::named("Home", "Home", 36),
        "end" => KeyDef::named("End", "End", 35),
        "pageup" => KeyDef::named("PageUp", "PageUp", 33),
        "pagedown" => KeyDef::named("PageDown", "PageDown", 34),
        "control" | "ctrl" => KeyDef::named("Control", "ControlLeft", 17),
        "shift" => KeyDef::named("Shift", "ShiftLeft", 16),
        "alt" | "option" => KeyDef::named("Alt", "AltLeft", 18),
        "meta" | "cmd" | "command" | "super" => KeyDef::named("Meta", "MetaLeft", 91),
        lower => match lower.strip_prefix('f').and_then(|n| n.parse::<u32>().ok()) {
            Some(n @ 1..=12) => {
                let key = format!("F{n}");
                KeyDef::named(&key, &key, 111 + n)
            }
            _ => KeyDef::named(name, name, 0),
        },
    }
}

fn char_key(c: char) -> KeyDef {
    let upper = c.to_ascii_uppercase();
    let (code, key_code) = if c.is_ascii_alphabetic() {
        (format!("Key{upper}"), upper as u32)
    } else if c.is_ascii_digit() {
        (format!("Digit{c}"), c as u32)
    } else if c == ' ' {
        ("Space".to_string(), 32)
    } else {
        (String::new(), 0)
    };
    KeyDef {
        key: c.to_string(),
        code,
        key_code,
        text: Some(c.to_string()),
    }
}

/// Modifier bit for modifier key names.
pub fn modifier_bit(name: &str) -> Option<u32> {
    match name.to_ascii_lowercase().as_str() {
        "alt" | "option" => Some(ALT),
        "control" | "ctrl" => Some(CTRL),
        "meta" | "cmd" | "command" | "super" => Some(META),
        "shift" => Some(SHIFT),
        _ => None,
    }
}

/// Platform shortcut modifier for "select all".
pub fn select_all_modifier() -> u32 {
    if cfg!(target_os = "macos") {
        META
    } else {
        CTRL
    }
}
