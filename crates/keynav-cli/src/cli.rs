//! Command-line interface definition.
//!
//! - `keynav targets` - list debugging targets
//! - `keynav keys` - send a key sequence to a page
//! - `keynav eval` - evaluate JavaScript in a target
//! - `keynav console` - tail console output from every target
//! - `keynav active-tab` - print the active tab as the extension sees it
//! - `keynav serve` - serve the test fixtures

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Drive a Chromium debugging port the way the e2e suite does.
#[derive(Parser, Debug)]
#[command(
    name = "keynav",
    version,
    about = "Poke a running Chromium the way the keynav e2e suite does",
    long_about = "Tools for writing keyboard-navigation extension tests.\n\
                  Connects to a Chromium started with --remote-debugging-port\n\
                  and sends keys, evaluates scripts, or logs console output."
)]
pub struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Only show errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    /// Config file (defaults to the nearest keynav.toml)
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Remote debugging port, overriding the config
    #[arg(short, long, global = true, value_name = "PORT")]
    pub port: Option<u16>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// List debugging targets
    Targets(TargetsArgs),

    /// Bring a page to the front and send a key sequence
    ///
    /// Notation: plain characters, plus `<Esc>`, `<Enter>`, `<Ctrl-c>`,
    /// `<Alt-m>`, `<Shift-Tab>` and similar named keys.
    ///
    /// Examples:
    ///   keynav keys active f
    ///   keynav keys tabs-test "gg"
    Keys(KeysArgs),

    /// Evaluate JavaScript in a target and print the JSON result
    Eval(EvalArgs),

    /// Log console output from every page and background target
    Console(ConsoleArgs),

    /// Print the active tab as reported by the extension
    ActiveTab(ActiveTabArgs),

    /// Serve the fixtures directory over HTTP
    Serve(ServeArgs),
}

/// Arguments for `targets`.
#[derive(Args, Debug)]
pub struct TargetsArgs {
    /// Print the raw `/json/list` entries as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for `keys`.
#[derive(Args, Debug)]
pub struct KeysArgs {
    /// Target id, a title/URL substring, or `active`
    #[arg(value_name = "TARGET")]
    pub target: String,

    /// Key notation to send
    #[arg(value_name = "NOTATION")]
    pub notation: String,

    /// Pause between keys in milliseconds
    #[arg(long, default_value_t = 30, value_name = "MS")]
    pub gap_ms: u64,
}

/// Arguments for `eval`.
#[derive(Args, Debug)]
pub struct EvalArgs {
    /// Target id, a title/URL substring, or `active`
    #[arg(value_name = "TARGET")]
    pub target: String,

    /// Expression; promises are awaited
    #[arg(value_name = "EXPR")]
    pub expression: String,
}

/// Arguments for `console`.
#[derive(Args, Debug)]
pub struct ConsoleArgs {
    /// Append lines to this file as well as stdout
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Only log warnings and errors
    #[arg(long)]
    pub errors_only: bool,
}

/// Arguments for `active-tab`.
#[derive(Args, Debug)]
pub struct ActiveTabArgs {
    /// Extension id, when several extensions have a background target
    #[arg(long, value_name = "ID", conflicts_with = "bridge")]
    pub extension_id: Option<String>,

    /// Ask the extension's HTTP bridge poller instead of the background
    #[arg(long)]
    pub bridge: bool,

    /// Bridge port (defaults to `bridge_port`)
    #[arg(long, value_name = "PORT", requires = "bridge")]
    pub bridge_port: Option<u16>,
}

/// Arguments for `serve`.
#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Port to listen on (defaults to `fixture_port`)
    #[arg(long = "listen", value_name = "PORT")]
    pub listen: Option<u16>,

    /// Directory to serve (defaults to the bundled fixtures)
    #[arg(long, value_name = "DIR")]
    pub dir: Option<PathBuf>,
}
