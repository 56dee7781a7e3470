//! CLI errors and their rendering.
//!
//! Commands return `anyhow::Result` with context attached at each step.
//! Failures the user can fix get a `CliError` at the root so
//! [`to_miette`] can add a hint.

use keynav_cdp::HarnessError;
use thiserror::Error;

/// Failures specific to CLI usage.
#[derive(Debug, Error)]
pub enum CliError {
    /// Nothing answered on the debugging port.
    #[error("no browser on port {port}")]
    NoBrowser {
        /// Port that was tried
        port: u16,
    },

    /// No page target matched the TARGET argument.
    #[error("no page target matches '{query}'")]
    NoMatchingTarget {
        /// What the user typed
        query: String,
        /// Targets that exist, for the hint
        available: Vec<String>,
    },

    /// More than one page target matched the TARGET argument.
    #[error("'{query}' matches {} page targets", .matches.len())]
    AmbiguousTarget {
        /// What the user typed
        query: String,
        /// The matching targets
        matches: Vec<String>,
    },
}

impl CliError {
    fn hint(&self) -> String {
        match self {
            Self::NoBrowser { port } => format!(
                "Start Chromium with --remote-debugging-port={port}, or pass --port"
            ),
            Self::NoMatchingTarget { available, .. } if available.is_empty() => {
                "The browser has no page targets open".to_string()
            }
            Self::NoMatchingTarget { available, .. } => {
                format!("Open targets:\n  {}", available.join("\n  "))
            }
            Self::AmbiguousTarget { matches, .. } => format!(
                "Use a target id or a longer substring:\n  {}",
                matches.join("\n  ")
            ),
        }
    }
}

/// Converts a command error into a miette report, keeping the context
/// chain and adding a hint when one applies.
#[must_use]
pub fn to_miette(err: anyhow::Error) -> miette::Report {
    if let Some(cli) = err.downcast_ref::<CliError>() {
        return miette::miette!(help = cli.hint(), "{err:#}");
    }
    match err.downcast_ref::<HarnessError>() {
        Some(HarnessError::Config(_)) => miette::miette!(
            help = "Check keynav.toml and KEYNAV_* environment variables",
            "{err:#}"
        ),
        Some(HarnessError::InvalidKey { .. }) => miette::miette!(
            help = "Named keys look like <Esc>, <Enter>, <Ctrl-c>, <Alt-m>",
            "{err:#}"
        ),
        _ => miette::miette!("{err:#}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;
    use miette::Diagnostic as _;

    #[test]
    fn hint_lists_available_targets() {
        let err = CliError::NoMatchingTarget {
            query: "nope".to_string(),
            available: vec!["A (http://a/)".to_string(), "B (http://b/)".to_string()],
        };
        assert_eq!(err.to_string(), "no page target matches 'nope'");
        assert!(err.hint().contains("A (http://a/)\n  B (http://b/)"));
    }

    #[test]
    fn report_keeps_context_chain() {
        let err = Err::<(), _>(CliError::NoBrowser { port: 9222 })
            .context("listing targets")
            .unwrap_err();
        let report = to_miette(err);
        let text = format!("{report}");
        assert!(text.contains("listing targets"), "{text}");
        assert!(text.contains("no browser on port 9222"), "{text}");
        let help = report.help().map(|h| h.to_string()).unwrap_or_default();
        assert!(help.contains("--remote-debugging-port=9222"), "{help}");
    }

    #[test]
    fn harness_key_errors_get_a_hint() {
        let err = anyhow::Error::new(HarnessError::InvalidKey {
            notation: "<Nope>".to_string(),
            reason: "unknown key".to_string(),
        });
        assert!(to_miette(err).help().is_some());
    }
}
