//! flotilla - launch fleets of coding agents on ephemeral instances.
//!
//! A voyage is one storage instance holding the shared checkout plus N ships,
//! each running an agent in a tmux window the operator can attach to.

use anyhow::Result;
use clap::Parser;
use tracing::warn;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod commands;
mod config;
mod error;
mod output;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json());

    // Ctrl-C interrupts any in-flight readiness wait.
    let (cancel, signal) = flotilla_provider::cancellation();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling");
            cancel.cancel();
        }
    });

    if let Err(e) = cli.run(signal).await {
        error::print_error(&e);
        std::process::exit(1);
    }

    Ok(())
}

/// Logs go to stderr so command output on stdout stays parseable.
fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    let registry = tracing_subscriber::registry().with(filter);

    if json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}
