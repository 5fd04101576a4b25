//! Tracegraph CLI main entry point

use anyhow::Result;
use clap::Parser;
use tracegraph_cli::commands::{Cli, CommandExecutor};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let mut executor = CommandExecutor::from_cli(&cli)?;
    let result = executor.execute(cli.command).await?;

    println!("{}", result.message);
    if result.success {
        std::process::exit(0);
    } else {
        std::process::exit(1);
    }
}
