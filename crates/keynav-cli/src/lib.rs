//! keynav CLI - operator tooling for writing extension e2e tests.
//!
//! While writing a test you usually want to poke the running browser by
//! hand: see which targets exist, send the exact key sequence the test will
//! send, evaluate an expression, or tail console output from every
//! page and the extension background at once. This crate wraps
//! `keynav-cdp` for that.
//!
//! # Modules
//!
//! - [`cli`] - clap argument definitions
//! - [`commands`] - one module per subcommand
//! - [`error`] - CLI errors and miette rendering
//! - [`logger`] - tracing subscriber setup
//! - [`ui`] - status lines on stderr

pub mod cli;
pub mod commands;
pub mod error;
pub mod logger;
pub mod ui;

pub use error::CliError;
