//! WikiHarvest CLI — resumable wiki space harvester with LLM enrichment.
//!
//! Enumerates a wiki space, runs every page through a fixed enrichment
//! pipeline, and keeps a checkpoint so interrupted runs pick up where they
//! left off.

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
