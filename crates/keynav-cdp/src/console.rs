//! Console message capture and filtering.
//!
//! Console output from pages and from the extension's background context is
//! the only window into the extension's own failures. `ConsoleCapture`
//! accumulates `Runtime.consoleAPICalled` and `Runtime.exceptionThrown`
//! events in arrival order so tests can assert that a run stayed clean, and
//! the CLI can tail them into a log file.
//!
//! # Design Rationale
//!
//! We use `Arc<Mutex<Vec<ConsoleMessage>>>` instead of channels because tests
//! query accumulated messages several times and ordering must be preserved.

use crate::client::CdpClient;
use crate::error::Result;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::{Arc, Mutex};
use std::time::SystemTime;
use tokio::task::JoinHandle;

/// The severity level of a console message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConsoleLevel {
    /// `console.log()`
    Log,
    /// `console.info()`
    Info,
    /// `console.warn()`
    Warning,
    /// `console.error()`
    Error,
    /// `console.debug()`
    Debug,
    /// An uncaught exception (`Runtime.exceptionThrown`)
    Exception,
    /// Catch-all for other console APIs (`table`, `trace`, ...)
    Other,
}

impl ConsoleLevel {
    /// Returns true for errors and uncaught exceptions.
    #[must_use]
    pub fn is_error(&self) -> bool {
        matches!(self, ConsoleLevel::Error | ConsoleLevel::Exception)
    }

    /// Returns true if this is a warning or worse.
    #[must_use]
    pub fn is_warning_or_error(&self) -> bool {
        self.is_error() || matches!(self, ConsoleLevel::Warning)
    }

    /// Upper-case label used in log lines.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            ConsoleLevel::Log => "LOG",
            ConsoleLevel::Info => "INFO",
            ConsoleLevel::Warning => "WARNING",
            ConsoleLevel::Error => "ERROR",
            ConsoleLevel::Debug => "DEBUG",
            ConsoleLevel::Exception => "EXCEPTION",
            ConsoleLevel::Other => "OTHER",
        }
    }
}

impl From<&str> for ConsoleLevel {
    fn from(s: &str) -> Self {
        match s {
            "log" => ConsoleLevel::Log,
            "info" => ConsoleLevel::Info,
            "warning" | "warn" => ConsoleLevel::Warning,
            "error" | "assert" => ConsoleLevel::Error,
            "debug" => ConsoleLevel::Debug,
            _ => ConsoleLevel::Other,
        }
    }
}

/// A captured console message with metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsoleMessage {
    /// Severity level (log, warn, error, etc.)
    pub level: ConsoleLevel,

    /// The formatted message text. Multiple arguments are joined with spaces.
    pub text: String,

    /// When the message was captured (system time, not page time).
    pub timestamp: SystemTime,

    /// Source location if available (e.g., "content.js:42:10").
    pub source: Option<String>,
}

impl ConsoleMessage {
    /// Creates a new console message.
    #[must_use]
    pub fn new(level: ConsoleLevel, text: String) -> Self {
        Self {
            level,
            text,
            timestamp: SystemTime::now(),
            source: None,
        }
    }

    /// Creates a message with source location.
    #[must_use]
    pub fn with_source(mut self, source: String) -> Self {
        self.source = Some(source);
        self
    }

    /// Formats `[timestamp] [title] LEVEL: text` for log files.
    #[must_use]
    pub fn log_line(&self, title: &str) -> String {
        let timestamp: DateTime<Local> = self.timestamp.into();
        format!(
            "[{}] [{}] {}: {}",
            timestamp.format("%Y-%m-%dT%H:%M:%S%.3f"),
            title,
            self.level.label(),
            self.text
        )
    }
}

/// Thread-safe console message accumulator.
///
/// Cheaply cloneable; the capture task and test code share one buffer.
#[derive(Debug, Clone, Default)]
pub struct ConsoleCapture {
    messages: Arc<Mutex<Vec<ConsoleMessage>>>,
}

impl ConsoleCapture {
    /// Creates a new, empty console capture.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a message to the capture buffer.
    ///
    /// A poisoned lock drops the message: the panic that poisoned it is the
    /// failure worth reporting.
    pub fn push(&self, message: ConsoleMessage) {
        if let Ok(mut messages) = self.messages.lock() {
            messages.push(message);
        }
    }

    /// Returns all captured messages as a snapshot.
    #[must_use]
    pub fn messages(&self) -> Vec<ConsoleMessage> {
        self.messages
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    /// Returns messages filtered by level.
    #[must_use]
    pub fn messages_with_level(&self, level: ConsoleLevel) -> Vec<ConsoleMessage> {
        self.messages()
            .into_iter()
            .filter(|m| m.level == level)
            .collect()
    }

    /// Returns all error-level messages and exceptions.
    #[must_use]
    pub fn errors(&self) -> Vec<ConsoleMessage> {
        self.messages()
            .into_iter()
            .filter(|m| m.level.is_error())
            .collect()
    }

    /// Returns all warning-level messages.
    #[must_use]
    pub fn warnings(&self) -> Vec<ConsoleMessage> {
        self.messages_with_level(ConsoleLevel::Warning)
    }

    /// Returns the count of errors and exceptions.
    #[must_use]
    pub fn error_count(&self) -> usize {
        self.messages
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .iter()
            .filter(|m| m.level.is_error())
            .count()
    }

    /// Returns true if any error messages were captured.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.error_count() > 0
    }

    /// Clears all captured messages.
    pub fn clear(&self) {
        if let Ok(mut messages) = self.messages.lock() {
            messages.clear();
        }
    }

    /// Returns the total number of messages captured.
    #[must_use]
    pub fn len(&self) -> usize {
        self.messages
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }

    /// Returns true if no messages have been captured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn format_argument(arg: &Value) -> String {
    match arg.get("value") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => arg
            .get("description")
            .and_then(Value::as_str)
            .or_else(|| arg.get("type").and_then(Value::as_str).filter(|t| *t == "undefined"))
            .unwrap_or("<object>")
            .to_string(),
        Some(other) => other.to_string(),
    }
}

fn top_frame(stack_trace: Option<&Value>) -> Option<String> {
    let frame = stack_trace?.get("callFrames")?.as_array()?.first()?;
    Some(format!(
        "{}:{}:{}",
        frame.get("url")?.as_str()?,
        frame.get("lineNumber")?.as_u64()?,
        frame.get("columnNumber")?.as_u64()?
    ))
}

/// Parses `Runtime.consoleAPICalled` params into a message.
#[must_use]
pub fn parse_console_event(params: &Value) -> ConsoleMessage {
    let level = params
        .get("type")
        .and_then(Value::as_str)
        .map_or(ConsoleLevel::Other, ConsoleLevel::from);

    let text = params
        .get("args")
        .and_then(Value::as_array)
        .map(|args| args.iter().map(format_argument).collect::<Vec<_>>().join(" "))
        .unwrap_or_default();

    let message = ConsoleMessage::new(level, text);
    match top_frame(params.get("stackTrace")) {
        Some(source) => message.with_source(source),
        None => message,
    }
}

/// Parses `Runtime.exceptionThrown` params into a message.
#[must_use]
pub fn parse_exception_event(params: &Value) -> ConsoleMessage {
    let details = params.get("exceptionDetails").unwrap_or(&Value::Null);
    let text = details
        .pointer("/exception/description")
        .and_then(Value::as_str)
        .or_else(|| details.get("text").and_then(Value::as_str))
        .unwrap_or("Unknown error")
        .to_string();

    let message = ConsoleMessage::new(ConsoleLevel::Exception, text);
    match top_frame(details.get("stackTrace")) {
        Some(source) => message.with_source(source),
        None => message,
    }
}

/// Enables `Runtime` on `client` and feeds its console events into
/// `capture` until the connection closes.
///
/// # Errors
///
/// Returns an error if `Runtime.enable` fails.
pub async fn spawn_capture(client: &CdpClient, capture: ConsoleCapture) -> Result<JoinHandle<()>> {
    let mut calls = client.subscribe("Runtime.consoleAPICalled").await;
    let mut exceptions = client.subscribe("Runtime.exceptionThrown").await;
    client.enable("Runtime").await?;

    Ok(tokio::spawn(async move {
        loop {
            let message = tokio::select! {
                Some(params) = calls.recv() => parse_console_event(&params),
                Some(params) = exceptions.recv() => parse_exception_event(&params),
                else => break,
            };
            capture.push(message);
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn console_level_classification() {
        assert!(ConsoleLevel::Error.is_error());
        assert!(ConsoleLevel::Exception.is_error());
        assert!(!ConsoleLevel::Warning.is_error());
        assert!(ConsoleLevel::Warning.is_warning_or_error());
        assert!(!ConsoleLevel::Log.is_warning_or_error());
        assert_eq!(ConsoleLevel::from("warn"), ConsoleLevel::Warning);
        assert_eq!(ConsoleLevel::from("table"), ConsoleLevel::Other);
    }

    #[test]
    fn console_capture_accumulation() {
        let capture = ConsoleCapture::new();

        capture.push(ConsoleMessage::new(ConsoleLevel::Log, "info".into()));
        capture.push(ConsoleMessage::new(ConsoleLevel::Error, "bad".into()));
        capture.push(ConsoleMessage::new(ConsoleLevel::Exception, "boom".into()));
        capture.push(ConsoleMessage::new(ConsoleLevel::Warning, "warn".into()));

        assert_eq!(capture.len(), 4);
        assert_eq!(capture.error_count(), 2);
        assert_eq!(capture.errors().len(), 2);
        assert_eq!(capture.warnings().len(), 1);
        assert!(capture.has_errors());

        capture.clear();
        assert!(capture.is_empty());
    }

    #[test]
    fn parses_console_api_call() {
        let params = json!({
            "type": "warning",
            "args": [
                {"type": "string", "value": "hints:"},
                {"type": "number", "value": 12},
                {"type": "object", "className": "Object", "description": "Object"},
                {"type": "undefined"}
            ],
            "stackTrace": {
                "callFrames": [
                    {"url": "chrome-extension://abc/content.js", "lineNumber": 41, "columnNumber": 9}
                ]
            }
        });

        let message = parse_console_event(&params);
        assert_eq!(message.level, ConsoleLevel::Warning);
        assert_eq!(message.text, "hints: 12 Object undefined");
        assert_eq!(
            message.source.as_deref(),
            Some("chrome-extension://abc/content.js:41:9")
        );
    }

    #[test]
    fn parses_exception() {
        let params = json!({
            "timestamp": 1.0,
            "exceptionDetails": {
                "text": "Uncaught",
                "exception": {"description": "TypeError: x is undefined"}
            }
        });
        let message = parse_exception_event(&params);
        assert_eq!(message.level, ConsoleLevel::Exception);
        assert_eq!(message.text, "TypeError: x is undefined");
        assert!(message.source.is_none());
    }

    #[test]
    fn log_line_format() {
        let message = ConsoleMessage::new(ConsoleLevel::Error, "failed".into());
        let line = message.log_line("Surfingkeys");
        assert!(line.starts_with('['));
        assert!(line.ends_with("] [Surfingkeys] ERROR: failed"), "{line}");
    }
}
