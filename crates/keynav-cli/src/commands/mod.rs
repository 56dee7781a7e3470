//! Subcommand implementations.
//!
//! Each module exposes an `execute` taking its parsed arguments and a
//! [`Context`] built from the global flags.

pub mod active_tab;
pub mod console;
pub mod eval;
pub mod keys;
pub mod serve;
pub mod targets;

use crate::cli::{Cli, Command};
use crate::error::CliError;
use anyhow::{Context as _, Result};
use keynav_cdp::{HarnessConfig, HarnessError, TargetDiscovery, TargetInfo, TargetKind};
use std::path::Path;
use tracing::debug;

/// Configuration and discovery shared by every subcommand.
#[derive(Debug)]
pub struct Context {
    /// Loaded configuration with `--port` applied.
    pub config: HarnessConfig,
    /// `/json` client for the debugging port.
    pub discovery: TargetDiscovery,
}

impl Context {
    /// Loads configuration. The CLI only attaches to a running browser, so
    /// launch-only settings are not validated.
    ///
    /// # Errors
    ///
    /// Fails if the config file is missing (when given explicitly) or
    /// malformed.
    pub fn load(config_path: Option<&Path>, port: Option<u16>) -> Result<Self> {
        if let Some(path) = config_path {
            if !path.is_file() {
                return Err(HarnessError::Config(format!(
                    "config file '{}' not found",
                    path.display()
                ))
                .into());
            }
        }
        let mut config: HarnessConfig = HarnessConfig::figment(config_path)
            .extract()
            .map_err(HarnessError::from)
            .context("loading configuration")?;
        if let Some(port) = port {
            config.cdp_port = port;
        }
        debug!(port = config.cdp_port, "configuration loaded");

        let discovery = config.discovery();
        Ok(Self { config, discovery })
    }

    /// Lists targets, turning an unreachable port into [`CliError::NoBrowser`].
    ///
    /// # Errors
    ///
    /// Fails when nothing answers on the debugging port.
    pub async fn targets(&self) -> Result<Vec<TargetInfo>> {
        match self.discovery.list().await {
            Ok(targets) => Ok(targets),
            Err(HarnessError::Http(e)) => {
                debug!("listing targets failed: {e}");
                Err(CliError::NoBrowser {
                    port: self.config.cdp_port,
                }
                .into())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Resolves a TARGET argument to one page target.
    ///
    /// # Errors
    ///
    /// Fails when no page or several pages match.
    pub async fn resolve_page(&self, query: &str) -> Result<TargetInfo> {
        let pages: Vec<TargetInfo> = self
            .targets()
            .await?
            .into_iter()
            .filter(|t| t.kind == TargetKind::Page)
            .collect();
        select_page(pages, query)
    }
}

/// Picks the page a TARGET argument names.
///
/// An exact id wins. `active` is the first page in `/json/list`, which
/// Chrome orders most recently focused first. Otherwise the query is a
/// case-insensitive title/URL substring that must match exactly one page.
///
/// # Errors
///
/// Returns [`CliError::NoMatchingTarget`] or [`CliError::AmbiguousTarget`].
pub fn select_page(pages: Vec<TargetInfo>, query: &str) -> Result<TargetInfo> {
    if let Some(exact) = pages.iter().find(|t| t.id == query) {
        return Ok(exact.clone());
    }
    if query == "active" {
        if let Some(first) = pages.into_iter().next() {
            return Ok(first);
        }
        return Err(CliError::NoMatchingTarget {
            query: query.to_string(),
            available: Vec::new(),
        }
        .into());
    }

    let describe = |t: &TargetInfo| format!("{} {} ({})", t.id, t.title, t.url);
    let (mut matches, rest): (Vec<_>, Vec<_>) = pages.into_iter().partition(|t| t.matches(query));
    match matches.len() {
        1 => Ok(matches.remove(0)),
        0 => Err(CliError::NoMatchingTarget {
            query: query.to_string(),
            available: rest.iter().map(describe).collect(),
        }
        .into()),
        _ => Err(CliError::AmbiguousTarget {
            query: query.to_string(),
            matches: matches.iter().map(describe).collect(),
        }
        .into()),
    }
}

/// Runs the parsed command line.
///
/// # Errors
///
/// Returns whatever the subcommand fails with.
pub async fn execute(cli: Cli) -> Result<()> {
    let ctx = Context::load(cli.config.as_deref(), cli.port)?;
    match cli.command {
        Command::Targets(args) => targets::execute(args, &ctx).await,
        Command::Keys(args) => keys::execute(args, &ctx).await,
        Command::Eval(args) => eval::execute(args, &ctx).await,
        Command::Console(args) => console::execute(args, &ctx).await,
        Command::ActiveTab(args) => active_tab::execute(args, &ctx).await,
        Command::Serve(args) => serve::execute(args, &ctx).await,
    }
}
