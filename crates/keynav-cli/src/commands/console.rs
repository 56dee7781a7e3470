//! `keynav console`: tail console output from every target.
//!
//! Attaches to each page and extension background target present at start,
//! enables `Runtime`, and prints one line per console API call or uncaught
//! exception. Runs until Ctrl-C or until every target has closed.

use super::Context;
use crate::cli::ConsoleArgs;
use crate::ui;
use anyhow::{Context as _, Result};
use keynav_cdp::console::{parse_console_event, parse_exception_event};
use keynav_cdp::{CdpClient, ConsoleMessage, TargetInfo};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Targets worth listening to: pages and extension backgrounds.
#[must_use]
pub fn should_attach(target: &TargetInfo) -> bool {
    target.web_socket_debugger_url.is_some()
        && (target.kind == keynav_cdp::TargetKind::Page || target.kind.is_background())
}

/// Label used in log lines: the title, or the URL for untitled workers.
#[must_use]
pub fn target_label(target: &TargetInfo) -> String {
    if target.title.is_empty() {
        target.url.clone()
    } else {
        target.title.clone()
    }
}

/// Connects to `target` and forwards its console messages to `tx`.
async fn attach(
    target: &TargetInfo,
    tx: mpsc::UnboundedSender<(String, ConsoleMessage)>,
) -> Result<CdpClient> {
    let client = CdpClient::connect(target.ws_url()?).await?;
    let mut calls = client.subscribe("Runtime.consoleAPICalled").await;
    let mut exceptions = client.subscribe("Runtime.exceptionThrown").await;
    client.enable("Runtime").await?;

    let label = target_label(target);
    tokio::spawn(async move {
        loop {
            let message = tokio::select! {
                Some(params) = calls.recv() => parse_console_event(&params),
                Some(params) = exceptions.recv() => parse_exception_event(&params),
                else => break,
            };
            if tx.send((label.clone(), message)).is_err() {
                break;
            }
        }
        debug!(source = %label, "console stream ended");
    });
    Ok(client)
}

/// Logs console output until interrupted.
///
/// # Errors
///
/// Fails when the debugging port is unreachable or the output file can't be
/// opened. Targets that refuse a connection are skipped with a warning.
pub async fn execute(args: ConsoleArgs, ctx: &Context) -> Result<()> {
    let mut file = match &args.output {
        Some(path) => Some(
            tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .await
                .with_context(|| format!("opening {}", path.display()))?,
        ),
        None => None,
    };

    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut clients = Vec::new();
    for target in ctx.targets().await?.iter().filter(|t| should_attach(t)) {
        match attach(target, tx.clone()).await {
            Ok(client) => {
                ui::info(&format!("listening to {}", target_label(target)));
                clients.push(client);
            }
            Err(e) => warn!(id = %target.id, url = %target.url, "skipping: {e:#}"),
        }
    }
    drop(tx);

    if clients.is_empty() {
        ui::warning("no page or background targets to listen to");
        return Ok(());
    }

    loop {
        let (label, message) = tokio::select! {
            received = rx.recv() => match received {
                Some(entry) => entry,
                None => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        };
        if args.errors_only && !message.level.is_warning_or_error() {
            continue;
        }

        let line = message.log_line(&label);
        println!("{line}");
        if let Some(file) = file.as_mut() {
            file.write_all(format!("{line}\n").as_bytes()).await?;
            file.flush().await?;
        }
    }

    for client in clients {
        client.close().await;
    }
    ui::info("stopped");
    Ok(())
}
