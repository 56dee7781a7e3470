//! Error types for harness operations.
//!
//! One enum covers every failure the harness can report: launching the
//! browser, talking to a debugging target, running injected scripts, waiting
//! for browser state, and loading configuration. Each variant carries enough
//! context to read a failing test log without rerunning it.

use std::time::Duration;
use thiserror::Error;

/// The main error type for all harness operations.
#[derive(Debug, Error)]
pub enum HarnessError {
    /// Failed to launch the browser process.
    ///
    /// This typically occurs when Chrome/Chromium is not installed, or when
    /// the unpacked extension directory does not exist.
    #[error("failed to launch browser: {reason}")]
    LaunchFailed {
        /// Human-readable reason for the launch failure
        reason: String,
        /// Optional underlying error that caused the failure
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The WebSocket handshake with a debugging target failed.
    #[error("CDP connection to '{url}' failed: {reason}")]
    ConnectionFailed {
        /// WebSocket URL of the target
        url: String,
        /// Reason reported by the transport
        reason: String,
    },

    /// The debugging target closed the connection.
    #[error("CDP connection closed")]
    ConnectionClosed,

    /// The browser answered a command with a protocol error.
    #[error("CDP method '{method}' failed ({code}): {message}")]
    Protocol {
        /// Method that was called
        method: String,
        /// Protocol error code
        code: i64,
        /// Protocol error message
        message: String,
    },

    /// A command got no response within the command timeout.
    #[error("CDP method '{method}' got no response within {timeout:?}")]
    CommandTimeout {
        /// Method that was called
        method: String,
        /// How long we waited
        timeout: Duration,
    },

    /// Navigation to a URL failed.
    #[error("navigation to '{url}' failed: {reason}")]
    NavigationFailed {
        /// The URL that failed to load
        url: String,
        /// Reason for the navigation failure
        reason: String,
    },

    /// A wait condition was not satisfied within the timeout.
    #[error("wait condition '{condition}' timed out after {timeout:?}")]
    WaitTimeout {
        /// Description of the condition that timed out
        condition: String,
        /// How long we waited before timing out
        timeout: Duration,
    },

    /// JavaScript execution in a target failed or threw.
    #[error("JavaScript execution failed: {0}")]
    ScriptExecutionFailed(String),

    /// No debugging target matched a lookup.
    #[error("no debugging target matches {0}")]
    TargetNotFound(String),

    /// Key notation could not be parsed.
    #[error("invalid key notation '{notation}': {reason}")]
    InvalidKey {
        /// The notation as written
        notation: String,
        /// What was wrong with it
        reason: String,
    },

    /// The HTTP bridge got no answer from the extension in time.
    #[error("extension did not respond to '{command}' within {timeout:?}")]
    BridgeTimeout {
        /// Bridge command name
        command: String,
        /// How long we waited
        timeout: Duration,
    },

    /// The extension answered a bridge command with a failure.
    #[error("extension failed '{command}': {reason}")]
    BridgeFailed {
        /// Bridge command name
        command: String,
        /// Error reported by the extension
        reason: String,
    },

    /// Configuration could not be loaded or is inconsistent.
    #[error("configuration error: {0}")]
    Config(String),

    /// An operation was attempted on a closed browser instance.
    #[error("browser instance is already closed")]
    AlreadyClosed,

    /// Wraps errors from the chromiumoxide library.
    #[error("chromiumoxide error: {0}")]
    ChromiumOxide(#[from] chromiumoxide::error::CdpError),

    /// HTTP errors talking to `/json` endpoints or fixture servers.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Malformed JSON on the wire or in a script result.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic I/O errors (file access, sockets, etc.).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for HarnessError {
    fn from(err: figment::Error) -> Self {
        HarnessError::Config(err.to_string())
    }
}

/// A specialized Result type for harness operations.
pub type Result<T> = std::result::Result<T, HarnessError>;
