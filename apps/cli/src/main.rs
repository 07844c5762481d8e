//! AfriVerse CLI: runs the cultural-knowledge ingestion pipeline.
//!
//! Starts the pipeline workers, pushes submissions through them, and
//! answers knowledge-base queries.

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
