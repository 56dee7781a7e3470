//! # keynav-e2e
//!
//! End-to-end suite for the keyboard-navigation extension. Each file under
//! `tests/` covers one command family; all of them build on [`Session`],
//! which gets a browser (launched or attached), serves the HTML fixtures,
//! resets tabs to a known state and attaches to the fixture page.
//!
//! Every browser test is `#[ignore]` and `#[serial]`:
//!
//! ```text
//! KEYNAV_EXTENSION_PATH=../surfingkeys/dist cargo test -p keynav-e2e -- --ignored
//! ```
//!
//! Tests return early with a warning when their environment can't support
//! them (no extension configured, no browser to attach to, no audio).

pub mod dom;
pub mod session;

pub use dom::{hint_labels, selection_type};
pub use session::Session;

use std::path::PathBuf;
use std::sync::Once;
use tracing_subscriber::EnvFilter;

static TRACING: Once = Once::new();

/// Installs a test-writer subscriber once per test binary.
///
/// `RUST_LOG` overrides the default `info` level for the keynav crates.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("keynav_cdp=info,keynav_e2e=info"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_target(false)
            .compact()
            .try_init();
    });
}

/// The fixtures shipped with this crate.
#[must_use]
pub fn fixtures_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("fixtures")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bundled_fixtures_exist() {
        let dir = fixtures_dir();
        for name in [
            "index.html",
            "hints-test.html",
            "scroll-test.html",
            "visual-test.html",
            "tabs-test.html",
            "clipboard-test.html",
            "audio-test.html",
        ] {
            assert!(dir.join(name).is_file(), "missing fixture {name}");
        }
    }

    #[test]
    fn init_tracing_is_idempotent() {
        init_tracing();
        init_tracing();
    }
}
