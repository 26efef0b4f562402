//! Voyage orchestration: one storage instance plus a fleet of ships.

use std::sync::Arc;

use flotilla_id::{VoyageId, SHIP_MARKER, STORAGE_SUFFIX};
use flotilla_provider::{
    quote, with_cleanup, AgentSettings, Backend, Connector, FleetError, Provider, Result,
    SshKeyPair, Vm,
};
use serde::Serialize;
use tracing::{info, warn};

use crate::credentials::Credentials;
use crate::layout::{
    task_dir, ARTIFACTS_DIR, DESCRIPTOR, LOGS_DIR, PROMPT, STOP_HOOK, WORKSPACE_DIR,
};
use crate::ship::{authenticate_source_control, install_key_pair};
use crate::templates::{render_ship_prompt, stop_hook};
use crate::voyage::Voyage;

/// A ship that could not be brought up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShipFailure {
    pub index: usize,
    pub reason: String,
}

/// A voyage that is underway, with the ships that failed to join it.
#[derive(Debug, Clone)]
pub struct Sailed {
    pub voyage: Voyage,
    pub failures: Vec<ShipFailure>,
}

impl Sailed {
    /// Number of ships that came up.
    pub fn launched(&self) -> usize {
        self.voyage.ship_count - self.failures.len()
    }
}

/// Drives a provider through the voyage lifecycle.
pub struct Orchestrator {
    pub(crate) provider: Arc<dyn Provider>,
    pub(crate) connector: Arc<dyn Connector>,
    pub(crate) keys: SshKeyPair,
    pub(crate) agent: AgentSettings,
}

impl Orchestrator {
    pub fn new(backend: &Backend, keys: SshKeyPair, agent: AgentSettings) -> Self {
        Self::with_parts(
            Arc::clone(&backend.provider),
            Arc::clone(&backend.connector),
            keys,
            agent,
        )
    }

    pub fn with_parts(
        provider: Arc<dyn Provider>,
        connector: Arc<dyn Connector>,
        keys: SshKeyPair,
        agent: AgentSettings,
    ) -> Self {
        Self {
            provider,
            connector,
            keys,
            agent,
        }
    }

    /// Provision storage, initialize it, then bring up `ship_count` ships.
    ///
    /// Ships are bootstrapped one after another. Individual ship failures are
    /// tolerated; the voyage fails only when storage fails or no ship comes up.
    pub async fn sail(
        &self,
        prompt: &str,
        repository: &str,
        ship_count: usize,
        credentials: &Credentials,
    ) -> Result<Sailed> {
        let voyage = Voyage::new(prompt, repository, ship_count)?;
        self.sail_voyage(voyage, credentials).await
    }

    /// [`sail`](Self::sail) for an already constructed voyage.
    pub async fn sail_voyage(&self, voyage: Voyage, credentials: &Credentials) -> Result<Sailed> {
        let ship_count = voyage.ship_count;
        info!(
            voyage_id = %voyage.id,
            repository = %voyage.repository,
            ships = ship_count,
            "Setting sail"
        );

        let storage_name = voyage.storage_name();
        let storage = self.provider.create(&storage_name, true).await?;
        info!(voyage_id = %voyage.id, endpoint = %storage.endpoint, "Storage is up");

        with_cleanup(
            &storage_name,
            self.init_storage(&voyage, &storage, credentials),
            || self.provider.destroy(&storage.id),
        )
        .await?;

        let mut failures = Vec::new();
        for index in 0..ship_count {
            if let Err(err) = self
                .bootstrap_ship(&voyage, index, &storage, credentials)
                .await
            {
                if err.is_cancelled() {
                    return Err(err);
                }
                warn!(voyage_id = %voyage.id, ship = index, error = %err, "Ship failed to launch");
                failures.push(ShipFailure {
                    index,
                    reason: err.to_string(),
                });
            }
        }

        if failures.len() == ship_count {
            return Err(FleetError::provision(format!(
                "all {ship_count} ships failed to launch: {}",
                summarize(&failures)
            )));
        }
        if !failures.is_empty() {
            warn!(
                voyage_id = %voyage.id,
                failed = failures.len(),
                launched = ship_count - failures.len(),
                "Voyage sailed short-handed: {}",
                summarize(&failures)
            );
        }

        info!(voyage_id = %voyage.id, "Voyage underway");
        Ok(Sailed { voyage, failures })
    }

    async fn init_storage(
        &self,
        voyage: &Voyage,
        storage: &Vm,
        credentials: &Credentials,
    ) -> Result<()> {
        let shell = self.connector.connect(storage)?;

        shell
            .run_checked(&format!(
                "mkdir -p {WORKSPACE_DIR} {ARTIFACTS_DIR} {LOGS_DIR} {}",
                task_dir(&self.agent.config_dir, &voyage.task_namespace_id)
            ))
            .await?;
        install_key_pair(shell.as_ref(), &self.keys).await?;
        authenticate_source_control(shell.as_ref(), credentials).await?;

        shell
            .run_checked(&format!(
                "git clone {} {WORKSPACE_DIR}",
                quote(&voyage.clone_url())
            ))
            .await?;
        // Ships push into this checkout.
        shell
            .run_checked(&format!(
                "cd {WORKSPACE_DIR} && git checkout -b {} && git config receive.denyCurrentBranch updateInstead",
                quote(&voyage.branch)
            ))
            .await?;

        shell.put(voyage.to_json()?.as_bytes(), DESCRIPTOR).await?;
        shell
            .put(render_ship_prompt(voyage).as_bytes(), PROMPT)
            .await?;
        shell.put(stop_hook().as_bytes(), STOP_HOOK).await?;
        shell.run_checked(&format!("chmod +x {STOP_HOOK}")).await?;

        info!(voyage_id = %voyage.id, "Storage initialized");
        Ok(())
    }

    /// The storage instance of voyage `id`.
    pub async fn storage(&self, id: &VoyageId) -> Result<Vm> {
        let storage_name = id.storage_name();
        self.provider
            .list(Some(&id.to_string()))
            .await?
            .into_iter()
            .find(|vm| vm.name == storage_name)
            .ok_or_else(|| FleetError::NotFound(format!("voyage {id} has no storage instance")))
    }

    /// The voyage descriptor and its storage instance.
    pub async fn load_voyage(&self, id: &VoyageId) -> Result<(Voyage, Vm)> {
        let storage = self.storage(id).await?;
        let shell = self.connector.connect(&storage)?;
        let output = shell.run_checked(&format!("cat {DESCRIPTOR}")).await?;
        let voyage = Voyage::from_json(&output.stdout)?;
        Ok((voyage, storage))
    }

    /// Ships registered for `voyage`, ordered by index.
    pub async fn fleet(&self, voyage: &Voyage) -> Result<Vec<(usize, Vm)>> {
        let mut ships: Vec<(usize, Vm)> = self
            .provider
            .list(Some(&voyage.id.to_string()))
            .await?
            .into_iter()
            .filter_map(|vm| voyage.id.ship_index(&vm.name).map(|index| (index, vm)))
            .collect();
        ships.sort_by_key(|(index, _)| *index);
        Ok(ships)
    }

    /// Destroy the voyage's ships, keeping storage. Returns how many went.
    pub async fn abandon(&self, id: &VoyageId) -> Result<usize> {
        let storage_name = id.storage_name();
        let ships: Vec<Vm> = self
            .provider
            .list(Some(&id.to_string()))
            .await?
            .into_iter()
            .filter(|vm| vm.name.contains(SHIP_MARKER) && vm.name != storage_name)
            .collect();
        self.destroy_all(&ships).await
    }

    /// Destroy every instance of the voyage, storage included.
    pub async fn sink(&self, id: &VoyageId) -> Result<usize> {
        let vms = self.provider.list(Some(&id.to_string())).await?;
        self.destroy_all(&vms).await
    }

    /// Destroy every instance of every voyage.
    /// Voyages that still have a storage instance, in creation order.
    pub async fn voyages(&self) -> Result<Vec<VoyageId>> {
        Ok(self
            .provider
            .list(Some(VoyageId::PREFIX))
            .await?
            .iter()
            .filter_map(|vm| VoyageId::parse(vm.name.strip_suffix(STORAGE_SUFFIX)?).ok())
            .collect())
    }

    pub async fn sink_all(&self) -> Result<usize> {
        let vms = self.provider.list(Some(VoyageId::PREFIX)).await?;
        self.destroy_all(&vms).await
    }

    async fn destroy_all(&self, vms: &[Vm]) -> Result<usize> {
        for vm in vms {
            info!(name = %vm.name, "Destroying instance");
            self.provider.destroy(&vm.id).await?;
        }
        Ok(vms.len())
    }
}

fn summarize(failures: &[ShipFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("ship-{}: {}", f.index, f.reason))
        .collect::<Vec<_>>()
        .join("; ")
}
