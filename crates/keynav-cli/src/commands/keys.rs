//! `keynav keys`: send a key sequence to a page.

use super::Context;
use crate::cli::KeysArgs;
use crate::ui;
use anyhow::{Context as _, Result};
use keynav_cdp::{Page, parse_keys};
use std::time::Duration;

/// Brings the target to the front and types `args.notation` into it.
///
/// The notation is parsed before connecting so typos fail fast.
///
/// # Errors
///
/// Fails on bad notation, an unknown target, or a dispatch error.
pub async fn execute(args: KeysArgs, ctx: &Context) -> Result<()> {
    let strokes = parse_keys(&args.notation)?;
    let target = ctx.resolve_page(&args.target).await?;
    let label = format!("{} ({})", target.title, target.url);

    let page = Page::attach(target)
        .await
        .with_context(|| format!("attaching to {label}"))?;
    page.bring_to_front().await?;
    page.send_keys(&args.notation, Duration::from_millis(args.gap_ms))
        .await
        .with_context(|| format!("sending '{}'", args.notation))?;

    ui::success(&format!("sent {} key(s) to {label}", strokes.len()));
    Ok(())
}
