//! Status lines on stderr.

use owo_colors::OwoColorize;
use std::sync::atomic::{AtomicBool, Ordering};

static COLORS: AtomicBool = AtomicBool::new(true);

/// Applies `--no-color` and the `NO_COLOR`/`FORCE_COLOR` conventions.
pub fn init_colors(no_color: bool) {
    let enabled = !no_color && crate::logger::should_use_colors();
    COLORS.store(enabled, Ordering::Relaxed);
    console::set_colors_enabled(enabled);
    console::set_colors_enabled_stderr(enabled);
}

/// Whether status lines are colored.
#[must_use]
pub fn colors_enabled() -> bool {
    COLORS.load(Ordering::Relaxed)
}

fn line(icon: &str, colored_icon: String, message: &str, colored_message: Option<String>) {
    if colors_enabled() {
        eprintln!(
            "{colored_icon} {}",
            colored_message.as_deref().unwrap_or(message)
        );
    } else {
        eprintln!("{icon} {message}");
    }
}

/// Prints a success line.
pub fn success(message: &str) {
    line("✓", "✓".green().bold().to_string(), message, None);
}

/// Prints an info line.
pub fn info(message: &str) {
    line("ℹ", "ℹ".blue().bold().to_string(), message, None);
}

/// Prints a warning line.
pub fn warning(message: &str) {
    line(
        "⚠",
        "⚠".yellow().bold().to_string(),
        message,
        Some(message.yellow().to_string()),
    );
}

/// Prints an error line.
pub fn error(message: &str) {
    line(
        "✗",
        "✗".red().bold().to_string(),
        message,
        Some(message.red().to_string()),
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_color_flag_disables_colors() {
        init_colors(true);
        assert!(!colors_enabled());
        success("ok");
        info("info");
        warning("careful");
        error("failed");
    }
}
