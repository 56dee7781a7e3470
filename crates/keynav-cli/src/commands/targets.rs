//! `keynav targets`: list debugging targets.

use super::Context;
use crate::cli::TargetsArgs;
use anyhow::Result;
use console::style;
use keynav_cdp::{TargetInfo, TargetKind};

fn kind_label(kind: TargetKind) -> &'static str {
    match kind {
        TargetKind::Page => "page",
        TargetKind::BackgroundPage => "background_page",
        TargetKind::ServiceWorker => "service_worker",
        TargetKind::Iframe => "iframe",
        TargetKind::Worker => "worker",
        TargetKind::Other => "other",
    }
}

/// One aligned line per target.
#[must_use]
pub fn format_row(target: &TargetInfo) -> String {
    let title = if target.title.is_empty() {
        "-"
    } else {
        target.title.as_str()
    };
    format!(
        "{:<32}  {:<15}  {}  {}",
        target.id,
        kind_label(target.kind),
        title,
        style(&target.url).dim()
    )
}

/// Prints targets as a table, or as JSON with `--json`.
///
/// # Errors
///
/// Fails when the debugging port is unreachable.
pub async fn execute(args: TargetsArgs, ctx: &Context) -> Result<()> {
    let targets = ctx.targets().await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&targets)?);
        return Ok(());
    }

    if targets.is_empty() {
        crate::ui::warning("no targets");
        return Ok(());
    }
    for target in &targets {
        println!("{}", format_row(target));
    }
    Ok(())
}
