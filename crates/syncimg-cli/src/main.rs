//! syncimg - cloud image catalog sync CLI

use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use syncimg_cli::cmd;
use syncimg_cli::{Cli, Commands};

fn main() -> Result<ExitCode> {
    // Logs go to stderr so listings on stdout stay pipeable
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Sync(args) => cmd::sync::sync(&args),
        Commands::Files(args) => cmd::files::files(&args).map(|()| ExitCode::SUCCESS),
        Commands::Regs(args) => cmd::regs::regs(&args).map(|()| ExitCode::SUCCESS),
        Commands::Ledger { config } => {
            cmd::ledger::ledger(config.as_deref()).map(|()| ExitCode::SUCCESS)
        }
        Commands::DefaultConfig => {
            cmd::default_config::default_config();
            Ok(ExitCode::SUCCESS)
        }
    }
}
