//! AIBridge CLI: resumable batch translation through AI providers.
//!
//! Reads a source table, sends unprocessed rows to a provider in numbered
//! batches, and checkpoints every batch so an interrupted run picks up where
//! it stopped.

mod commands;
mod progress;

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
