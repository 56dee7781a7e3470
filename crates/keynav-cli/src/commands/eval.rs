//! `keynav eval`: evaluate JavaScript in a page.

use super::Context;
use crate::cli::EvalArgs;
use anyhow::{Context as _, Result};
use keynav_cdp::CdpClient;

/// Evaluates `args.expression` in the target and prints the result as JSON.
///
/// Thrown exceptions surface as errors with the exception description.
///
/// # Errors
///
/// Fails on an unknown target, a connection error, or a script exception.
pub async fn execute(args: EvalArgs, ctx: &Context) -> Result<()> {
    let target = ctx.resolve_page(&args.target).await?;
    let client = CdpClient::connect(target.ws_url()?)
        .await
        .with_context(|| format!("connecting to {}", target.url))?;

    let value = client
        .evaluate(&args.expression)
        .await
        .with_context(|| format!("evaluating in {}", target.url))?;
    println!("{}", serde_json::to_string_pretty(&value)?);

    client.close().await;
    Ok(())
}
