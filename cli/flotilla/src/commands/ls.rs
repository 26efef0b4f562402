//! `flotilla ls`: list voyage instances.

use anyhow::Result;
use clap::Args;
use flotilla_id::{window_name, VoyageId, STORAGE_SUFFIX};
use flotilla_provider::Vm;
use serde::Serialize;
use tabled::Tabled;

use crate::output::{display_option, print_output};

use super::{parse_voyage_id, CommandContext};

#[derive(Debug, Args)]
pub struct LsCommand {
    /// Only instances of this voyage.
    voyage: Option<String>,
}

/// One listed instance.
#[derive(Debug, Clone, Serialize, Tabled)]
pub struct InstanceRow {
    #[tabled(rename = "Name")]
    pub name: String,

    #[tabled(rename = "Voyage", display = "display_option")]
    pub voyage: Option<String>,

    #[tabled(rename = "Role")]
    pub role: String,

    #[tabled(rename = "Status")]
    pub status: String,

    #[tabled(rename = "Endpoint")]
    pub endpoint: String,
}

impl InstanceRow {
    pub fn from_vm(vm: &Vm) -> Self {
        let voyage = voyage_of(&vm.name);
        let role = match &voyage {
            Some(id) if vm.name == id.storage_name() => "storage".to_string(),
            Some(id) => id
                .ship_index(&vm.name)
                .map(window_name)
                .unwrap_or_else(|| "-".to_string()),
            None => "-".to_string(),
        };
        Self {
            name: vm.name.clone(),
            voyage: voyage.map(|id| id.to_string()),
            role,
            status: vm.status.to_string(),
            endpoint: vm.endpoint.to_string(),
        }
    }
}

/// The voyage an instance name belongs to, if it follows the convention.
fn voyage_of(name: &str) -> Option<VoyageId> {
    let id_len = VoyageId::PREFIX.len() + 12;
    let id = VoyageId::parse(name.get(..id_len)?).ok()?;
    let rest = &name[id_len..];
    (rest == STORAGE_SUFFIX || id.ship_index(name).is_some()).then_some(id)
}

impl LsCommand {
    pub async fn run(self, ctx: CommandContext) -> Result<()> {
        let prefix = match &self.voyage {
            Some(voyage) => parse_voyage_id(voyage)?.to_string(),
            None => VoyageId::PREFIX.to_string(),
        };

        let fleet = ctx.fleet().await?;
        let vms = fleet.backend.provider.list(Some(&prefix)).await?;
        let rows: Vec<InstanceRow> = vms.iter().map(InstanceRow::from_vm).collect();

        print_output(&rows, ctx.format);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use flotilla_provider::Endpoint;
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("voyage-3f9a0c11b2de-storage", Some("voyage-3f9a0c11b2de"), "storage")]
    #[case("voyage-3f9a0c11b2de-ship12", Some("voyage-3f9a0c11b2de"), "ship-12")]
    #[case("voyage-3f9a0c11b2de-ship01", None, "-")]
    #[case("voyage-scratch", None, "-")]
    fn test_row_roles(#[case] name: &str, #[case] voyage: Option<&str>, #[case] role: &str) {
        let vm = Vm::running(name, Endpoint::ssh(None, "10.0.0.1"));
        let row = InstanceRow::from_vm(&vm);
        assert_eq!(row.voyage.as_deref(), voyage);
        assert_eq!(row.role, role);
        assert_eq!(row.status, "running");
    }
}
