//! subharvest CLI: harvest proxy subscription entries into per-protocol files.
//!
//! Fetches every configured source, validates and deduplicates the entries,
//! and writes one artifact per protocol plus a Markdown summary.

mod commands;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    commands::run(cli).await
}
