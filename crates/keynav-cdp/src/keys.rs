//! Key notation parsing and key event dispatch.
//!
//! Extension commands are bound to key sequences written in the
//! extension's own notation: plain characters (`j`, `G`, `$`, `<<`) and
//! bracketed groups with modifiers (`<Ctrl-c>`, `<Alt-m>`, `<Esc>`). This
//! module turns that notation into [`KeyStroke`]s and replays each one as
//! the `Input.dispatchKeyEvent` sequence a real keyboard produces:
//! `keyDown`, `char` for printable input, `keyUp`.

use crate::client::CdpClient;
use crate::error::{HarnessError, Result};
use serde_json::{Value, json};
use std::fmt;
use std::time::Duration;
use tracing::debug;

/// Modifier bitmask as used by `Input.dispatchKeyEvent`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Modifiers(u8);

impl Modifiers {
    /// No modifiers.
    pub const NONE: Modifiers = Modifiers(0);
    /// Alt.
    pub const ALT: Modifiers = Modifiers(1);
    /// Control.
    pub const CTRL: Modifiers = Modifiers(2);
    /// Meta / Command.
    pub const META: Modifiers = Modifiers(4);
    /// Shift.
    pub const SHIFT: Modifiers = Modifiers(8);

    /// Raw protocol value.
    #[must_use]
    pub fn bits(self) -> u8 {
        self.0
    }

    /// True if every bit in `other` is set.
    #[must_use]
    pub fn contains(self, other: Modifiers) -> bool {
        self.0 & other.0 == other.0
    }

    /// True if Ctrl, Alt or Meta is held. Such chords never produce text.
    #[must_use]
    pub fn is_command_chord(self) -> bool {
        self.0 & (Self::ALT.0 | Self::CTRL.0 | Self::META.0) != 0
    }

    fn from_name(name: &str) -> Option<Modifiers> {
        match name.to_ascii_lowercase().as_str() {
            "ctrl" | "control" => Some(Self::CTRL),
            "alt" | "option" => Some(Self::ALT),
            "meta" | "cmd" | "command" => Some(Self::META),
            "shift" => Some(Self::SHIFT),
            _ => None,
        }
    }
}

impl std::ops::BitOr for Modifiers {
    type Output = Modifiers;

    fn bitor(self, rhs: Modifiers) -> Modifiers {
        Modifiers(self.0 | rhs.0)
    }
}

impl std::ops::BitOrAssign for Modifiers {
    fn bitor_assign(&mut self, rhs: Modifiers) {
        self.0 |= rhs.0;
    }
}

/// One key press.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyStroke {
    /// DOM `KeyboardEvent.key`, e.g. `j`, `G`, `Escape`.
    pub key: String,
    /// DOM `KeyboardEvent.code`, e.g. `KeyJ`, `Digit4`, `Escape`.
    pub code: String,
    /// Windows virtual key code.
    pub key_code: u32,
    /// Text the key inserts, if any.
    pub text: Option<String>,
    /// Held modifiers.
    pub modifiers: Modifiers,
}

impl KeyStroke {
    fn new(key: impl Into<String>, code: impl Into<String>, key_code: u32) -> Self {
        Self {
            key: key.into(),
            code: code.into(),
            key_code,
            text: None,
            modifiers: Modifiers::NONE,
        }
    }

    fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    fn with_modifiers(mut self, modifiers: Modifiers) -> Self {
        self.modifiers |= modifiers;
        self
    }

    /// Builds the stroke for a single typed character.
    #[must_use]
    pub fn from_char(c: char) -> Self {
        char_stroke(c)
    }

    /// True if dispatch should include a `char` event.
    #[must_use]
    pub fn emits_char(&self) -> bool {
        self.text.is_some() && !self.modifiers.is_command_chord()
    }

    /// The `Input.dispatchKeyEvent` parameter objects for this stroke, in
    /// order. `commands` are editor commands (e.g. `paste`) attached to the
    /// key down event.
    #[must_use]
    pub fn events(&self, commands: &[&str]) -> Vec<Value> {
        let modifiers = self.modifiers.bits();
        let mut down = json!({
            "type": "keyDown",
            "key": self.key,
            "code": self.code,
            "windowsVirtualKeyCode": self.key_code,
            "nativeVirtualKeyCode": self.key_code,
            "modifiers": modifiers,
        });
        if !commands.is_empty() {
            down["commands"] = json!(commands);
        }

        let mut events = vec![down];

        if self.emits_char() {
            let text = self.text.as_deref().unwrap_or_default();
            events.push(json!({
                "type": "char",
                "key": self.key,
                "text": text,
                "unmodifiedText": text,
                "modifiers": modifiers,
            }));
        }

        events.push(json!({
            "type": "keyUp",
            "key": self.key,
            "code": self.code,
            "windowsVirtualKeyCode": self.key_code,
            "nativeVirtualKeyCode": self.key_code,
            "modifiers": modifiers,
        }));

        events
    }
}

impl fmt::Display for KeyStroke {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let named = self.key.chars().count() > 1;
        let chord = self.modifiers.is_command_chord();
        if !named && !chord {
            return f.write_str(&self.key);
        }

        f.write_str("<")?;
        for (bit, name) in [
            (Modifiers::CTRL, "Ctrl"),
            (Modifiers::ALT, "Alt"),
            (Modifiers::META, "Meta"),
        ] {
            if self.modifiers.contains(bit) {
                write!(f, "{name}-")?;
            }
        }
        // Shift is implied by an upper-case or shifted character.
        if self.modifiers.contains(Modifiers::SHIFT) && named {
            f.write_str("Shift-")?;
        }
        write!(f, "{}>", self.key)
    }
}

const SHIFTED_DIGITS: [(char, char); 10] = [
    (')', '0'),
    ('!', '1'),
    ('@', '2'),
    ('#', '3'),
    ('$', '4'),
    ('%', '5'),
    ('^', '6'),
    ('&', '7'),
    ('*', '8'),
    ('(', '9'),
];

/// (unshifted, shifted, code, virtual key code)
const PUNCTUATION: [(char, char, &str, u32); 11] = [
    (';', ':', "Semicolon", 186),
    ('=', '+', "Equal", 187),
    (',', '<', "Comma", 188),
    ('-', '_', "Minus", 189),
    ('.', '>', "Period", 190),
    ('/', '?', "Slash", 191),
    ('`', '~', "Backquote", 192),
    ('[', '{', "BracketLeft", 219),
    ('\\', '|', "Backslash", 220),
    (']', '}', "BracketRight", 221),
    ('\'', '"', "Quote", 222),
];

fn char_stroke(c: char) -> KeyStroke {
    let text = c.to_string();

    if c.is_ascii_lowercase() {
        let upper = c.to_ascii_uppercase();
        return KeyStroke::new(text.clone(), format!("Key{upper}"), u32::from(upper))
            .with_text(text);
    }
    if c.is_ascii_uppercase() {
        return KeyStroke::new(text.clone(), format!("Key{c}"), u32::from(c))
            .with_text(text)
            .with_modifiers(Modifiers::SHIFT);
    }
    if c.is_ascii_digit() {
        return KeyStroke::new(text.clone(), format!("Digit{c}"), u32::from(c)).with_text(text);
    }
    if c == ' ' {
        return KeyStroke::new(" ", "Space", 32).with_text(" ");
    }
    if let Some(&(_, digit)) = SHIFTED_DIGITS.iter().find(|(s, _)| *s == c) {
        return KeyStroke::new(text.clone(), format!("Digit{digit}"), u32::from(digit))
            .with_text(text)
            .with_modifiers(Modifiers::SHIFT);
    }
    if let Some(&(plain, _, code, key_code)) = PUNCTUATION
        .iter()
        .find(|(plain, shifted, _, _)| *plain == c || *shifted == c)
    {
        let stroke = KeyStroke::new(text.clone(), code, key_code).with_text(text);
        return if plain == c {
            stroke
        } else {
            stroke.with_modifiers(Modifiers::SHIFT)
        };
    }

    // Non-ASCII input: no physical key, text only.
    KeyStroke::new(text.clone(), "", 0).with_text(text)
}

fn named_stroke(name: &str) -> Option<KeyStroke> {
    let stroke = match name.to_ascii_lowercase().as_str() {
        "enter" | "cr" | "return" => KeyStroke::new("Enter", "Enter", 13).with_text("\r"),
        "esc" | "escape" => KeyStroke::new("Escape", "Escape", 27),
        "tab" => KeyStroke::new("Tab", "Tab", 9),
        "space" => KeyStroke::new(" ", "Space", 32).with_text(" "),
        "backspace" | "bs" => KeyStroke::new("Backspace", "Backspace", 8),
        "delete" | "del" => KeyStroke::new("Delete", "Delete", 46),
        "insert" => KeyStroke::new("Insert", "Insert", 45),
        "home" => KeyStroke::new("Home", "Home", 36),
        "end" => KeyStroke::new("End", "End", 35),
        "pageup" => KeyStroke::new("PageUp", "PageUp", 33),
        "pagedown" => KeyStroke::new("PageDown", "PageDown", 34),
        "arrowup" | "up" => KeyStroke::new("ArrowUp", "ArrowUp", 38),
        "arrowdown" | "down" => KeyStroke::new("ArrowDown", "ArrowDown", 40),
        "arrowleft" | "left" => KeyStroke::new("ArrowLeft", "ArrowLeft", 37),
        "arrowright" | "right" => KeyStroke::new("ArrowRight", "ArrowRight", 39),
        "lt" => char_stroke('<'),
        "gt" => char_stroke('>'),
        other => {
            let n: u32 = other.strip_prefix('f')?.parse().ok()?;
            if !(1..=12).contains(&n) {
                return None;
            }
            let key = format!("F{n}");
            KeyStroke::new(key.clone(), key, 111 + n)
        }
    };
    Some(stroke)
}

fn parse_group(notation: &str, content: &str) -> Result<KeyStroke> {
    let invalid = |reason: String| HarnessError::InvalidKey {
        notation: notation.to_string(),
        reason,
    };

    let (modifier_part, key_part) = if content.len() > 1 && content.ends_with("--") {
        (&content[..content.len() - 2], "-")
    } else {
        match content.rsplit_once('-') {
            Some((mods, key)) if !key.is_empty() => (mods, key),
            _ => ("", content),
        }
    };

    let mut modifiers = Modifiers::NONE;
    if !modifier_part.is_empty() {
        for name in modifier_part.split('-') {
            modifiers |= Modifiers::from_name(name)
                .ok_or_else(|| invalid(format!("unknown modifier '{name}'")))?;
        }
    }

    let mut chars = key_part.chars();
    let stroke = match (chars.next(), chars.next()) {
        (Some(c), None) => char_stroke(c),
        _ => named_stroke(key_part).ok_or_else(|| invalid(format!("unknown key '{key_part}'")))?,
    };

    Ok(stroke.with_modifiers(modifiers))
}

/// Parses key notation into strokes.
///
/// `<` opens a group only if a `>` follows before any other `<`; otherwise
/// it is the literal less-than key, so `<<` is two presses.
///
/// # Errors
///
/// Returns `InvalidKey` for empty notation, unknown modifiers or unknown
/// named keys.
pub fn parse_keys(notation: &str) -> Result<Vec<KeyStroke>> {
    if notation.is_empty() {
        return Err(HarnessError::InvalidKey {
            notation: String::new(),
            reason: "empty key sequence".to_string(),
        });
    }

    let mut strokes = Vec::new();
    let mut rest = notation;

    while let Some(c) = rest.chars().next() {
        if c == '<' {
            let after = &rest[1..];
            let close = after.find('>');
            let reopen = after.find('<');
            if let Some(end) = close.filter(|&end| end > 0 && reopen.is_none_or(|r| r > end)) {
                strokes.push(parse_group(notation, &after[..end])?);
                rest = &after[end + 1..];
                continue;
            }
        }
        strokes.push(char_stroke(c));
        rest = &rest[c.len_utf8()..];
    }

    Ok(strokes)
}

/// Dispatches one stroke.
///
/// # Errors
///
/// Returns an error if any of the key events is rejected.
pub async fn dispatch(client: &CdpClient, stroke: &KeyStroke) -> Result<()> {
    dispatch_with_commands(client, stroke, &[]).await
}

/// Dispatches one stroke with editor commands attached to its key down.
///
/// # Errors
///
/// Returns an error if any of the key events is rejected.
pub async fn dispatch_with_commands(
    client: &CdpClient,
    stroke: &KeyStroke,
    commands: &[&str],
) -> Result<()> {
    for event in stroke.events(commands) {
        client.send("Input.dispatchKeyEvent", event).await?;
    }
    Ok(())
}

/// Parses `notation` and dispatches every stroke, pausing `gap` between
/// strokes when non-zero.
///
/// # Errors
///
/// Returns `InvalidKey` for bad notation or the first dispatch error.
pub async fn send_keys(client: &CdpClient, notation: &str, gap: Duration) -> Result<()> {
    let strokes = parse_keys(notation)?;
    debug!(keys = notation, count = strokes.len(), "sending key sequence");

    for (i, stroke) in strokes.iter().enumerate() {
        if i > 0 && !gap.is_zero() {
            tokio::time::sleep(gap).await;
        }
        dispatch(client, stroke).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(notation: &str) -> Vec<String> {
        parse_keys(notation)
            .unwrap()
            .into_iter()
            .map(|s| s.key)
            .collect()
    }

    #[test]
    fn lower_case_letter() {
        let stroke = KeyStroke::from_char('j');
        assert_eq!(stroke.code, "KeyJ");
        assert_eq!(stroke.key_code, 74);
        assert_eq!(stroke.text.as_deref(), Some("j"));
        assert_eq!(stroke.modifiers, Modifiers::NONE);
    }

    #[test]
    fn upper_case_letter_implies_shift() {
        let stroke = KeyStroke::from_char('G');
        assert_eq!(stroke.code, "KeyG");
        assert_eq!(stroke.key_code, 71);
        assert!(stroke.modifiers.contains(Modifiers::SHIFT));
    }

    #[test]
    fn shifted_digit_and_punctuation() {
        let dollar = KeyStroke::from_char('$');
        assert_eq!(dollar.code, "Digit4");
        assert_eq!(dollar.key_code, u32::from('4'));
        assert!(dollar.modifiers.contains(Modifiers::SHIFT));

        let lt = KeyStroke::from_char('<');
        assert_eq!(lt.code, "Comma");
        assert_eq!(lt.key_code, 188);
        assert!(lt.modifiers.contains(Modifiers::SHIFT));

        let slash = KeyStroke::from_char('/');
        assert_eq!(slash.code, "Slash");
        assert_eq!(slash.modifiers, Modifiers::NONE);
    }

    #[test]
    fn plain_sequences() {
        assert_eq!(keys("gg"), vec!["g", "g"]);
        assert_eq!(keys("yt"), vec!["y", "t"]);
    }

    #[test]
    fn doubled_angle_brackets_are_literal() {
        assert_eq!(keys("<<"), vec!["<", "<"]);
        assert_eq!(keys(">>"), vec![">", ">"]);
        assert_eq!(keys("<>"), vec!["<", ">"]);
    }

    #[test]
    fn bracket_before_group_is_literal() {
        assert_eq!(keys("<<Esc>"), vec!["<", "Escape"]);
    }

    #[test]
    fn named_keys() {
        assert_eq!(keys("<Esc>"), vec!["Escape"]);
        assert_eq!(keys("<Enter>"), vec!["Enter"]);
        assert_eq!(keys("<ArrowDown><Down>"), vec!["ArrowDown", "ArrowDown"]);
        let f5 = &parse_keys("<F5>").unwrap()[0];
        assert_eq!(f5.key_code, 116);
    }

    #[test]
    fn modifier_chords() {
        let stroke = &parse_keys("<Alt-m>").unwrap()[0];
        assert_eq!(stroke.key, "m");
        assert_eq!(stroke.code, "KeyM");
        assert_eq!(stroke.modifiers, Modifiers::ALT);
        assert!(!stroke.emits_char());

        let stroke = &parse_keys("<Ctrl-Shift-Tab>").unwrap()[0];
        assert_eq!(stroke.key, "Tab");
        assert!(stroke.modifiers.contains(Modifiers::CTRL));
        assert!(stroke.modifiers.contains(Modifiers::SHIFT));
    }

    #[test]
    fn chord_on_minus() {
        let stroke = &parse_keys("<Ctrl-->").unwrap()[0];
        assert_eq!(stroke.key, "-");
        assert_eq!(stroke.modifiers, Modifiers::CTRL);
    }

    #[test]
    fn mixed_sequence() {
        assert_eq!(keys("t<Down><Enter>"), vec!["t", "ArrowDown", "Enter"]);
    }

    #[test]
    fn rejects_unknown_key_and_modifier() {
        assert!(matches!(
            parse_keys("<Hyper-x>"),
            Err(HarnessError::InvalidKey { reason, .. }) if reason.contains("Hyper")
        ));
        assert!(matches!(
            parse_keys("<Nope>"),
            Err(HarnessError::InvalidKey { reason, .. }) if reason.contains("Nope")
        ));
        assert!(parse_keys("").is_err());
    }

    #[test]
    fn events_for_printable_key() {
        let events = KeyStroke::from_char('t').events(&[]);
        assert_eq!(events.len(), 3);
        assert_eq!(events[0]["type"], "keyDown");
        assert_eq!(events[0]["windowsVirtualKeyCode"], 84);
        assert_eq!(events[0]["nativeVirtualKeyCode"], 84);
        assert_eq!(events[1]["type"], "char");
        assert_eq!(events[1]["text"], "t");
        assert_eq!(events[2]["type"], "keyUp");
        assert!(events[0].get("commands").is_none());
    }

    #[test]
    fn events_for_chord_skip_char() {
        let stroke = parse_keys("<Ctrl-v>").unwrap().remove(0);
        let events = stroke.events(&["paste"]);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0]["modifiers"], 2);
        assert_eq!(events[0]["commands"], json!(["paste"]));
        assert_eq!(events[1]["type"], "keyUp");
    }

    #[test]
    fn events_for_escape_have_no_char() {
        let stroke = parse_keys("<Esc>").unwrap().remove(0);
        let types: Vec<_> = stroke
            .events(&[])
            .into_iter()
            .map(|e| e["type"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(types, vec!["keyDown", "keyUp"]);
    }

    #[test]
    fn display_round_trips_common_notation() {
        for notation in ["j", "G", "<Alt-m>", "<Esc>", "<Ctrl-c>", "<Shift-Tab>"] {
            let stroke = parse_keys(notation).unwrap().remove(0);
            let shown = stroke.to_string();
            assert_eq!(parse_keys(&shown).unwrap()[0], stroke, "{notation} -> {shown}");
        }
    }
}
