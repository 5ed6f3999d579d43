//! Thin binary entry point: parse arguments, initialize logging, dispatch.

use clap::Parser;
use persist_lite::cli::{self, Cli};

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    persist_lite::logging::init_logging(cli.verbose, cli.quiet, None)?;
    cli::run(&cli)?;
    Ok(())
}
