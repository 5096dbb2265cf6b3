//! docpipe CLI: drives the API documentation harvesting pipeline.
//!
//! Sends a documentation URL through the processing service's three stages
//! and downloads the merged dataset and document archive.

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
