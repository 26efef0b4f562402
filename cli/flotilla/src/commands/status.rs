//! `flotilla status`: show a voyage and its fleet.

use anyhow::Result;
use clap::Args;
use colored::Colorize;
use flotilla_voyage::Voyage;
use serde::Serialize;

use crate::output::{print_output, print_single, OutputFormat};

use super::ls::InstanceRow;
use super::{parse_voyage_id, CommandContext};

#[derive(Debug, Args)]
pub struct StatusCommand {
    /// Voyage ID.
    voyage: String,
}

#[derive(Debug, Serialize)]
struct VoyageStatus {
    voyage: Voyage,
    instances: Vec<InstanceRow>,
    ships_running: usize,
}

impl StatusCommand {
    pub async fn run(self, ctx: CommandContext) -> Result<()> {
        let id = parse_voyage_id(&self.voyage)?;
        let fleet = ctx.fleet().await?;

        let (voyage, storage) = fleet.orchestrator.load_voyage(&id).await?;
        let ships = fleet.orchestrator.fleet(&voyage).await?;

        let mut instances = vec![InstanceRow::from_vm(&storage)];
        instances.extend(ships.iter().map(|(_, vm)| InstanceRow::from_vm(vm)));
        let status = VoyageStatus {
            ships_running: ships.iter().filter(|(_, vm)| vm.is_running()).count(),
            voyage,
            instances,
        };

        match ctx.format {
            OutputFormat::Json => print_single(&status),
            OutputFormat::Table => {
                let v = &status.voyage;
                println!("{} {}", "Voyage:".bold(), v.id);
                println!("{} {}", "Repository:".bold(), v.repository);
                println!("{} {}", "Branch:".bold(), v.branch);
                println!("{} {}", "Created:".bold(), v.created_at.to_rfc3339());
                println!(
                    "{} {}/{} running",
                    "Ships:".bold(),
                    status.ships_running,
                    v.ship_count
                );
                println!("{} {}\n", "Objective:".bold(), v.prompt.trim());
                print_output(&status.instances, ctx.format);
            }
        }
        Ok(())
    }
}
