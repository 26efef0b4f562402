//! `flotilla sail`: launch a voyage.

use anyhow::{Context, Result};
use clap::Args;
use flotilla_voyage::{Credentials, ShipFailure};
use serde::Serialize;

use crate::output::{print_info, print_single, print_success, print_warning, OutputFormat};

use super::CommandContext;

#[derive(Debug, Args)]
pub struct SailCommand {
    /// The objective every ship works towards.
    prompt: String,

    /// GitHub repository as owner/name.
    #[arg(long)]
    repo: String,

    /// Number of ships (defaults to the configured count).
    #[arg(long)]
    ships: Option<usize>,

    /// Provision only; do not start the tmux session.
    #[arg(long)]
    no_launch: bool,
}

#[derive(Debug, Serialize)]
struct SailReceipt {
    voyage_id: String,
    branch: String,
    ships_requested: usize,
    ships_launched: usize,
    failures: Vec<ShipFailure>,
    session_started: bool,
    attach: Vec<String>,
}

impl SailCommand {
    pub async fn run(self, ctx: CommandContext) -> Result<()> {
        let credentials = Credentials::from_env()?;
        let ship_count = self.ships.unwrap_or(ctx.config.settings.ships);
        let fleet = ctx.fleet().await?;

        let sailed = fleet
            .orchestrator
            .sail(&self.prompt, &self.repo, ship_count, &credentials)
            .await?;
        let voyage = sailed.voyage;
        let ships = fleet.orchestrator.fleet(&voyage).await?;

        let mut attach = Vec::new();
        if !self.no_launch {
            let storage = fleet.orchestrator.storage(&voyage.id).await?;
            let launcher = ctx.session_launcher(&fleet, storage)?;
            launcher
                .launch(&voyage, &ships, &credentials.agent_token)
                .await
                .context("Voyage is up but its session failed to start")?;
            attach = launcher.attach_command(&voyage.id, None);
        }

        let receipt = SailReceipt {
            voyage_id: voyage.id.to_string(),
            branch: voyage.branch.clone(),
            ships_requested: ship_count,
            ships_launched: ships.len(),
            failures: sailed.failures,
            session_started: !self.no_launch,
            attach,
        };

        match ctx.format {
            OutputFormat::Json => print_single(&receipt),
            OutputFormat::Table => {
                print_success(&format!(
                    "Voyage {} sailed with {}/{} ships",
                    receipt.voyage_id, receipt.ships_launched, receipt.ships_requested
                ));
                for failure in &receipt.failures {
                    print_warning(&format!(
                        "ship-{} failed to launch: {}",
                        failure.index, failure.reason
                    ));
                }
                if receipt.session_started {
                    print_info(&format!("Attach: flotilla attach {}", receipt.voyage_id));
                } else {
                    print_info(&format!("Status: flotilla status {}", receipt.voyage_id));
                }
            }
        }
        Ok(())
    }
}
