//! AgentSync CLI: classifies repeat listing owners as agencies.
//!
//! Maintains the agent registry from the listings index and flags the
//! listings of detected agencies.

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
