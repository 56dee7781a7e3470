//! `keynav serve`: serve the test fixtures.

use super::Context;
use crate::cli::ServeArgs;
use crate::ui;
use anyhow::{Context as _, Result};
use keynav_cdp::{DevServer, FixtureServer};

/// Serves the fixtures directory until Ctrl-C.
///
/// # Errors
///
/// Fails if the directory is missing or the port is taken.
pub async fn execute(args: ServeArgs, ctx: &Context) -> Result<()> {
    let root = args
        .dir
        .unwrap_or_else(|| ctx.config.fixtures_dir_or(&keynav_e2e::fixtures_dir()));
    let port = args.listen.unwrap_or(ctx.config.fixture_port);

    let server = FixtureServer::start(&root, port)
        .await
        .with_context(|| format!("serving {}", root.display()))?;
    ui::info(&format!(
        "serving {} at {}",
        root.display(),
        server.base_url()
    ));

    tokio::select! {
        result = server.run_forever() => result?,
        _ = tokio::signal::ctrl_c() => ui::info("stopped"),
    }
    Ok(())
}
