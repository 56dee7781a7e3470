//! Logging setup for the keynav CLI.
//!
//! Verbosity is chosen in this order:
//! 1. `--verbose`: debug for keynav crates
//! 2. `--quiet`: errors only
//! 3. `RUST_LOG`
//! 4. info for keynav crates

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

const VERBOSE_FILTER: &str = "keynav=debug,keynav_cli=debug,keynav_cdp=debug,keynav_e2e=debug";
const QUIET_FILTER: &str = "error";
const DEFAULT_FILTER: &str = "keynav=info,keynav_cli=info,keynav_cdp=info";

/// Picks the filter for the given flags.
#[must_use]
pub fn filter_for(verbose: bool, quiet: bool) -> EnvFilter {
    if verbose {
        EnvFilter::new(VERBOSE_FILTER)
    } else if quiet {
        EnvFilter::new(QUIET_FILTER)
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
    }
}

/// Installs the global tracing subscriber. Call once, before any logging.
///
/// Logs go to stderr so command output on stdout stays pipeable.
pub fn init_logger(verbose: bool, quiet: bool, no_color: bool) {
    let fmt_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_level(true)
        .with_ansi(!no_color && should_use_colors())
        .compact();

    // A second init (tests calling into the library) is harmless.
    let _ = tracing_subscriber::registry()
        .with(filter_for(verbose, quiet))
        .with(fmt_layer)
        .try_init();
}

/// Whether stderr should get ANSI colors.
///
/// `NO_COLOR` wins over `FORCE_COLOR`; otherwise terminal detection decides.
#[must_use]
pub fn should_use_colors() -> bool {
    if std::env::var_os("NO_COLOR").is_some() {
        return false;
    }
    if std::env::var_os("FORCE_COLOR").is_some() {
        return true;
    }
    console::Term::stderr().features().colors_supported()
}
