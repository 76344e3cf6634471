//! dyk - DYK Insights CLI
//!
//! Generates cohort-targeted "Did you know" health insights and filters them
//! through validation, deduplication and scoring.

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

mod cli;
mod commands;
mod config;
mod output;

use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so `--json` output stays clean
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(
            EnvFilter::from_default_env()
                .add_directive("dyk=info".parse()?)
                .add_directive("dyk_core=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run(args) => {
            let config = config::Config::load(cli.config.as_deref())?;
            commands::run::execute(args, config).await
        }
        Commands::Validate(args) => {
            let config = config::Config::load(cli.config.as_deref())?;
            commands::validate::execute(args, config).await
        }
        Commands::Similarity(args) => commands::similarity::execute(args),
        Commands::Version => {
            println!("dyk {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}
