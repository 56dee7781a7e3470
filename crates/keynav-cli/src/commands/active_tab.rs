//! `keynav active-tab`: the active tab as the extension sees it.

use super::Context;
use crate::cli::ActiveTabArgs;
use crate::ui;
use anyhow::{Context as _, Result};
use keynav_cdp::{ExtensionApi, ExtensionBridge, Tab};

/// Prints `chrome.tabs` state for the active tab of the focused window,
/// read from the extension background or, with `--bridge`, from the
/// extension's HTTP bridge poller.
///
/// # Errors
///
/// Fails when no extension background target is found, the bridge port is
/// taken or nothing answers on the bridge, or the query fails.
pub async fn execute(args: ActiveTabArgs, ctx: &Context) -> Result<()> {
    let tab = if args.bridge {
        over_bridge(args.bridge_port.unwrap_or(ctx.config.bridge_port)).await?
    } else {
        let extension_id = args
            .extension_id
            .as_deref()
            .or(ctx.config.extension_id.as_deref());
        let ext = ExtensionApi::connect(&ctx.discovery, extension_id, ctx.config.wait_config())
            .await
            .context("connecting to the extension background")?;
        ext.active_tab().await?
    };

    println!("{}", serde_json::to_string_pretty(&tab)?);
    Ok(())
}

async fn over_bridge(port: u16) -> Result<Tab> {
    let bridge = ExtensionBridge::start(port)
        .await
        .with_context(|| format!("starting the bridge on port {port}"))?;
    ui::info(&format!("waiting for the extension to poll {}", bridge.base_url()));
    bridge
        .active_tab()
        .await
        .context("asking the extension over the bridge")
}
