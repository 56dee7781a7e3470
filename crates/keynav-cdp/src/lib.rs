//! # keynav-cdp
//!
//! Chrome DevTools Protocol harness for end-to-end testing of a
//! keyboard-navigation browser extension.
//!
//! The extension is a black box. Tests reach it the way a user does (key
//! presses into a page) and observe it through the DOM of that page and
//! through `chrome.tabs` / `chrome.windows` state read from the extension's
//! own background context.
//!
//! ## Architecture
//!
//! - **TestBrowser**: launches Chromium with the unpacked extension loaded
//! - **TargetDiscovery**: the `/json` endpoints of the debugging port
//! - **CdpClient**: one WebSocket per target, request/response by id plus events
//! - **Page**: a page target with navigation, key input and DOM reads
//! - **ExtensionApi**: `chrome.*` calls evaluated in the background target
//! - **ExtensionBridge**: HTTP command queue for builds without a debuggable background
//! - **FixtureServer**: static HTML fixtures over localhost HTTP
//! - **CoverageRecorder**: V8 call-count deltas around a test
//! - **ConsoleCapture**: console API calls and uncaught exceptions
//! - **HarnessConfig**: figment-layered settings
//!
//! ## Example Usage
//!
//! ```ignore
//! use keynav_cdp::{ExtensionApi, HarnessConfig, Page, WaitConfig};
//! use std::time::Duration;
//!
//! #[tokio::test]
//! #[ignore]
//! async fn next_tab() -> keynav_cdp::Result<()> {
//!     let config = HarnessConfig::load(None)?;
//!     let discovery = config.discovery();
//!     let ext = ExtensionApi::connect(&discovery, None, WaitConfig::default()).await?;
//!
//!     let page = Page::open(&discovery, "http://127.0.0.1:9873/tabs-test.html", config.wait_config()).await?;
//!     page.bring_to_front().await?;
//!     page.send_keys("R", Duration::ZERO).await?;
//!
//!     let active = ext.active_tab().await?;
//!     assert_ne!(active.url(), "http://127.0.0.1:9873/tabs-test.html");
//!     Ok(())
//! }
//! ```
//!
//! ## Testing Strategy
//!
//! 1. **Unit tests**: browser-free logic (key parsing, coverage diffs,
//!    target classification, config layering, bridge queue, waits)
//! 2. **Integration tests**: real browser tests (require Chrome and the
//!    extension), marked `#[ignore]`
//!
//! Run with `cargo test` (unit) or `cargo test -- --ignored` (integration).

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod bindings;
pub mod bridge;
pub mod browser;
pub mod client;
pub mod config;
pub mod console;
pub mod coverage;
pub mod discovery;
pub mod error;
pub mod extension;
pub mod keys;
pub mod page;
pub mod server;
pub mod wait;

// Re-export main types for convenience
pub use bindings::{Command, KeyBindings};
pub use bridge::ExtensionBridge;
pub use browser::{TestBrowser, TestBrowserConfig};
pub use client::CdpClient;
pub use config::{BrowserMode, HarnessConfig, TabSource};
pub use console::{ConsoleCapture, ConsoleLevel, ConsoleMessage};
pub use coverage::{CoverageDelta, CoverageRecorder, CoverageSnapshot};
pub use discovery::{TargetDiscovery, TargetInfo, TargetKind};
pub use error::{HarnessError, Result};
pub use extension::{ExtensionApi, Tab, TabQuery, Window};
pub use keys::{KeyStroke, Modifiers, parse_keys, send_keys};
pub use page::{Page, ScrollPosition};
pub use server::{DevServer, FixtureServer, StaticUrlServer};
pub use wait::{DEFAULT_POLL_INTERVAL, DEFAULT_TIMEOUT, WaitConfig, wait_for, wait_for_value};
