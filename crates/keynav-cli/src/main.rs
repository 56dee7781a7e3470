//! keynav CLI entry point: parse arguments, set up logging, dispatch.

use clap::Parser;
use keynav_cli::{cli, commands, error, logger, ui};
use miette::Result;

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Cli::parse();

    logger::init_logger(args.verbose, args.quiet, args.no_color);
    ui::init_colors(args.no_color);

    let result = commands::execute(args).await;

    result.map_err(error::to_miette)
}
