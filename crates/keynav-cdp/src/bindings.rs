//! Extension commands exercised by the suite and the keys bound to them.
//!
//! Defaults follow the extension's stock key map. A `[keys]` table in the
//! configuration overrides individual bindings, so the suite can follow a
//! user's remapped keys without touching test code.

use crate::error::{HarnessError, Result};
use crate::keys::{KeyStroke, parse_keys};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// An extension command, named as in the `[keys]` config table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
#[allow(missing_docs)]
pub enum Command {
    ShowHints,
    ScrollDown,
    ScrollUp,
    ScrollLeft,
    ScrollRight,
    ScrollToTop,
    ScrollToBottom,
    HalfPageDown,
    HalfPageUp,
    NextTab,
    PreviousTab,
    CloseTab,
    RestoreTab,
    DuplicateTab,
    MoveTabLeft,
    MoveTabRight,
    MoveTabToNewWindow,
    ToggleMute,
    ZoomIn,
    ZoomOut,
    ZoomReset,
    CopyUrl,
    VisualMode,
    VisualForwardChar,
    VisualForwardWord,
    VisualYank,
    Escape,
}

impl Command {
    /// Every command, in declaration order.
    pub const ALL: [Command; 27] = [
        Command::ShowHints,
        Command::ScrollDown,
        Command::ScrollUp,
        Command::ScrollLeft,
        Command::ScrollRight,
        Command::ScrollToTop,
        Command::ScrollToBottom,
        Command::HalfPageDown,
        Command::HalfPageUp,
        Command::NextTab,
        Command::PreviousTab,
        Command::CloseTab,
        Command::RestoreTab,
        Command::DuplicateTab,
        Command::MoveTabLeft,
        Command::MoveTabRight,
        Command::MoveTabToNewWindow,
        Command::ToggleMute,
        Command::ZoomIn,
        Command::ZoomOut,
        Command::ZoomReset,
        Command::CopyUrl,
        Command::VisualMode,
        Command::VisualForwardChar,
        Command::VisualForwardWord,
        Command::VisualYank,
        Command::Escape,
    ];

    /// Stock key notation for this command.
    #[must_use]
    pub fn default_keys(self) -> &'static str {
        match self {
            Command::ShowHints => "f",
            Command::ScrollDown => "j",
            Command::ScrollUp => "k",
            Command::ScrollLeft => "h",
            Command::ScrollRight => "l",
            Command::ScrollToTop => "gg",
            Command::ScrollToBottom => "G",
            Command::HalfPageDown => "d",
            Command::HalfPageUp => "u",
            Command::NextTab => "R",
            Command::PreviousTab => "E",
            Command::CloseTab => "x",
            Command::RestoreTab => "X",
            Command::DuplicateTab => "yt",
            Command::MoveTabLeft => "<<",
            Command::MoveTabRight => ">>",
            Command::MoveTabToNewWindow => "W",
            Command::ToggleMute => "<Alt-m>",
            Command::ZoomIn => "zi",
            Command::ZoomOut => "zo",
            Command::ZoomReset => "zr",
            Command::CopyUrl => "yy",
            Command::VisualMode => "v",
            Command::VisualForwardChar => "l",
            Command::VisualForwardWord => "w",
            Command::VisualYank => "y",
            Command::Escape => "<Esc>",
        }
    }

    /// Config-table name, e.g. `scroll-down`.
    #[must_use]
    pub fn name(self) -> String {
        serde_json::to_value(self)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default()
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

impl FromStr for Command {
    type Err = HarnessError;

    fn from_str(s: &str) -> Result<Self> {
        serde_json::from_value(serde_json::Value::String(s.to_string()))
            .map_err(|_| HarnessError::Config(format!("unknown command '{s}' in [keys]")))
    }
}

/// Key bindings: stock defaults plus overrides.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeyBindings {
    overrides: HashMap<Command, String>,
}

impl KeyBindings {
    /// Bindings with only the stock defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Overrides one binding.
    #[must_use]
    pub fn with(mut self, command: Command, notation: impl Into<String>) -> Self {
        self.overrides.insert(command, notation.into());
        self
    }

    /// Notation bound to `command`.
    #[must_use]
    pub fn notation(&self, command: Command) -> &str {
        self.overrides
            .get(&command)
            .map_or_else(|| command.default_keys(), String::as_str)
    }

    /// Parsed strokes bound to `command`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidKey` if an override is not valid notation.
    pub fn strokes(&self, command: Command) -> Result<Vec<KeyStroke>> {
        parse_keys(self.notation(command))
    }

    /// Checks that every override parses.
    ///
    /// # Errors
    ///
    /// Returns the first `InvalidKey` error.
    pub fn validate(&self) -> Result<()> {
        for command in self.overrides.keys() {
            self.strokes(*command)?;
        }
        Ok(())
    }
}
