//! ferry - offline mirror CLI

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use ferry_cli::{Cli, Commands, cmd};
use ferry_core::{Context, LogReporter};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // RUST_LOG wins over -v/-q. Logs go to stderr so listings stay clean.
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(cli.log_level()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    if let Err(e) = run(cli).await {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupted; waiting for running transfers");
            on_interrupt.cancel();
        }
    });

    let ctx = Context::from_settings(cli.jobs(), cli.timeout, cancel, Arc::new(LogReporter))?;

    match cli.command {
        Commands::Crate(args) => cmd::crates::run(ctx, args).await,
        Commands::Toolchain(args) => cmd::toolchain::run(ctx, args).await,
        Commands::Rustup(args) => cmd::rustup::run(ctx, args).await,
        Commands::Completions { shell } => {
            cmd::completions::completions(shell);
            Ok(())
        }
    }
}
