//! `flotilla abandon` and `flotilla sink`: tear voyages down.

use std::io::{BufRead, IsTerminal, Write};

use anyhow::Result;
use clap::Args;
use flotilla_id::VoyageId;
use serde_json::json;
use tracing::debug;

use crate::error::CliError;
use crate::output::{print_single, print_success, OutputFormat};

use super::{parse_voyage_id, CommandContext, Fleet};

/// Phrase the operator types to confirm `sink --all`.
const CONFIRM_PHRASE: &str = "sink all";

#[derive(Debug, Args)]
pub struct AbandonCommand {
    /// Voyage ID.
    voyage: String,
}

#[derive(Debug, Args)]
pub struct SinkCommand {
    /// Voyage ID.
    #[arg(required_unless_present = "all", conflicts_with = "all")]
    voyage: Option<String>,

    /// Sink every voyage.
    #[arg(long)]
    all: bool,

    /// Skip the confirmation prompt for --all.
    #[arg(long, requires = "all")]
    yes: bool,
}

impl AbandonCommand {
    pub async fn run(self, ctx: CommandContext) -> Result<()> {
        let id = parse_voyage_id(&self.voyage)?;
        let fleet = ctx.fleet().await?;

        kill_session(&ctx, &fleet, &id).await;
        let count = fleet.orchestrator.abandon(&id).await?;

        report(&ctx, "abandon", Some(&id), count);
        Ok(())
    }
}

impl SinkCommand {
    pub async fn run(self, ctx: CommandContext) -> Result<()> {
        let fleet = ctx.fleet().await?;

        let Some(voyage) = self.voyage.as_deref() else {
            if !self.yes && !confirm()? {
                return Err(CliError::NotConfirmed.into());
            }
            for id in fleet.orchestrator.voyages().await? {
                kill_session(&ctx, &fleet, &id).await;
            }
            let count = fleet.orchestrator.sink_all().await?;
            report(&ctx, "sink", None, count);
            return Ok(());
        };

        let id = parse_voyage_id(voyage)?;
        kill_session(&ctx, &fleet, &id).await;
        let count = fleet.orchestrator.sink(&id).await?;

        report(&ctx, "sink", Some(&id), count);
        Ok(())
    }
}

/// Best effort: a voyage without storage or session is still torn down.
async fn kill_session(ctx: &CommandContext, fleet: &Fleet, id: &VoyageId) {
    let storage = match fleet.orchestrator.storage(id).await {
        Ok(storage) => storage,
        Err(err) => {
            debug!(voyage_id = %id, error = %err, "Skipping session teardown");
            return;
        }
    };
    match ctx.session_launcher(fleet, storage) {
        Ok(launcher) => launcher.kill(id).await,
        Err(err) => debug!(voyage_id = %id, error = %err, "Skipping session teardown"),
    }
}

/// Ask for the confirmation phrase on an interactive terminal.
fn confirm() -> Result<bool> {
    let stdin = std::io::stdin();
    if !stdin.is_terminal() {
        return Ok(false);
    }

    print!("This destroys every voyage instance. Type '{CONFIRM_PHRASE}' to continue: ");
    std::io::stdout().flush()?;

    let mut answer = String::new();
    stdin.lock().read_line(&mut answer)?;
    Ok(is_confirmation(&answer))
}

fn is_confirmation(answer: &str) -> bool {
    answer.trim() == CONFIRM_PHRASE
}

fn report(ctx: &CommandContext, action: &str, id: Option<&VoyageId>, count: usize) {
    match ctx.format {
        OutputFormat::Json => print_single(&json!({
            "action": action,
            "voyage_id": id.map(ToString::to_string),
            "destroyed": count,
        })),
        OutputFormat::Table => {
            let scope = id.map_or_else(|| "all voyages".to_string(), ToString::to_string);
            print_success(&format!("{action}: destroyed {count} instance(s) of {scope}"));
        }
    }
}
