//! `flotilla attach`: join a voyage's tmux session.

use anyhow::{Context, Result};
use clap::Args;
use tokio::process::Command;
use tracing::debug;

use crate::error::CliError;

use super::{parse_voyage_id, CommandContext};

#[derive(Debug, Args)]
pub struct AttachCommand {
    /// Voyage ID.
    voyage: String,

    /// Focus this ship's window.
    #[arg(long)]
    ship: Option<usize>,
}

impl AttachCommand {
    pub async fn run(self, ctx: CommandContext) -> Result<()> {
        let id = parse_voyage_id(&self.voyage)?;
        let fleet = ctx.fleet().await?;
        let storage = fleet.orchestrator.storage(&id).await?;
        let launcher = ctx.session_launcher(&fleet, storage)?;

        let argv = launcher.attach_command(&id, self.ship);
        let Some((program, args)) = argv.split_first() else {
            return Ok(());
        };
        debug!(program = %program, "Attaching to session");

        // The terminal is handed over until the operator detaches.
        let status = Command::new(program)
            .args(args)
            .status()
            .await
            .with_context(|| format!("Failed to start `{program}`"))?;

        if !status.success() {
            return Err(CliError::Subprocess {
                program: program.clone(),
                status: status.code().unwrap_or(-1),
            }
            .into());
        }
        Ok(())
    }
}
