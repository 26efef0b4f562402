//! SSH hosting gateway backend.
//!
//! The gateway exposes a small command set over SSH (`new`, `ls`, `rm`) and
//! names instances after the requested name. Instances come with a login
//! shell and public addressing, so only the hosted bootstrap plan runs.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::bootstrap::{BootstrapParams, BootstrapPlan};
use crate::cancel::CancelSignal;
use crate::cleanup::with_cleanup;
use crate::error::{FleetError, Result};
use crate::provider::{wait_for_shell, Backend, Provider, ProviderContext};
use crate::settings::ReadinessSettings;
use crate::shell::{quote, Connector, RemoteShell, DIAGNOSTIC_TAIL};
use crate::ssh::{SshConnector, SshKeyPair, SshOptions, SshShell};
use crate::vm::{Endpoint, Vm, VmStatus};

#[derive(Debug, Deserialize)]
struct GatewayVm {
    vm_name: String,
    ssh_dest: String,
    #[serde(default)]
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GatewayList {
    #[serde(default)]
    vms: Option<Vec<GatewayVm>>,
}

impl GatewayVm {
    fn into_vm(self) -> Result<Vm> {
        let endpoint: Endpoint = self.ssh_dest.parse()?;
        // Unrecognized states are treated as still coming up.
        let status = self
            .status
            .as_deref()
            .and_then(|s| s.parse().ok())
            .unwrap_or(VmStatus::Pending);
        Ok(Vm {
            id: self.vm_name.clone(),
            name: self.vm_name,
            endpoint,
            status,
        })
    }
}

/// Provider for instances on an SSH hosting gateway.
pub struct RemoteHostProvider {
    gateway_name: String,
    gateway: Arc<dyn RemoteShell>,
    connector: Arc<dyn Connector>,
    keys: SshKeyPair,
    agent_install_url: String,
    readiness: ReadinessSettings,
    cancel: CancelSignal,
}

impl RemoteHostProvider {
    pub const NAME: &'static str = "remote-host";

    /// A provider sending gateway commands through `gateway`.
    pub fn new(
        ctx: &ProviderContext,
        gateway: Arc<dyn RemoteShell>,
        connector: Arc<dyn Connector>,
    ) -> Self {
        Self {
            gateway_name: ctx.settings.remote_host.gateway.clone(),
            gateway,
            connector,
            keys: ctx.keys.clone(),
            agent_install_url: ctx.settings.agent.install_url.clone(),
            readiness: ctx.settings.readiness.clone(),
            cancel: ctx.cancel.clone(),
        }
    }

    /// Registry constructor.
    pub fn backend(ctx: &ProviderContext) -> Result<Backend> {
        let gateway = Arc::new(SshShell::gateway(
            ctx.settings.remote_host.gateway.clone(),
            SshOptions::default(),
        ));
        // Fresh instances only trust the operator's own keys until the
        // hosted plan installs the orchestrator pair.
        let connector: Arc<dyn Connector> = Arc::new(SshConnector::default());
        let provider = Arc::new(Self::new(ctx, gateway, Arc::clone(&connector)));
        Ok(Backend {
            name: Self::NAME,
            provider,
            connector,
        })
    }

    async fn gateway_command(&self, command: &str) -> Result<String> {
        let output = self.gateway.run(command).await?;
        if !output.success() {
            let verb = command.split_whitespace().next().unwrap_or_default();
            return Err(FleetError::Command {
                command: format!("{} {verb}", self.gateway_name),
                status: output.status,
                output: output.tail(DIAGNOSTIC_TAIL),
            });
        }
        Ok(output.stdout)
    }

    async fn provision(&self, vm: &Vm) -> Result<()> {
        let ready = self
            .wait_ready(vm, self.readiness.timeout(), self.readiness.interval())
            .await?;
        if !ready {
            return Err(FleetError::provision(format!(
                "{} did not become reachable over SSH",
                vm.name
            )));
        }

        let plan = BootstrapPlan::hosted(BootstrapParams {
            hostname: vm.name.clone(),
            public_key: self.keys.public_key.clone(),
            private_key: Some(self.keys.private_key().await?),
            overlay: None,
            gateway: Some(self.gateway_name.clone()),
            agent_install_url: self.agent_install_url.clone(),
        });

        info!(name = %vm.name, "Installing keys and agent");
        let shell = self.connector.connect(vm)?;
        let output = shell.run(&plan.render()).await?;
        if !output.success() {
            return Err(FleetError::provision_with(
                format!("bootstrap of {} exited with status {}", vm.name, output.status),
                output.tail(DIAGNOSTIC_TAIL),
            ));
        }
        info!(name = %vm.name, output = %output.tail(DIAGNOSTIC_TAIL), "Bootstrap output");
        Ok(())
    }
}

#[async_trait]
impl Provider for RemoteHostProvider {
    async fn create(&self, name: &str, wait: bool) -> Result<Vm> {
        let stdout = self
            .gateway_command(&format!("new --name={} --no-email --json", quote(name)))
            .await
            .map_err(|e| {
                FleetError::provision(format!("gateway refused to create {name}: {e}"))
            })?;
        let mut vm = serde_json::from_str::<GatewayVm>(&stdout)?.into_vm()?;
        info!(name = %vm.name, endpoint = %vm.endpoint, "Instance created");

        if !wait {
            return Ok(vm);
        }

        with_cleanup(name, self.provision(&vm), || self.destroy(&vm.id)).await?;
        vm.status = VmStatus::Running;
        Ok(vm)
    }

    async fn destroy(&self, id: &str) -> Result<()> {
        if self.get(id).await?.is_none() {
            debug!(id = %id, "Destroy of unknown instance ignored");
            return Ok(());
        }
        info!(id = %id, "Removing instance");
        self.gateway_command(&format!("rm {}", quote(id))).await?;
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Vm>> {
        Ok(self.list(None).await?.into_iter().find(|vm| vm.id == id))
    }

    async fn list(&self, prefix: Option<&str>) -> Result<Vec<Vm>> {
        let stdout = self.gateway_command("ls --json").await?;
        if stdout.trim().is_empty() || stdout.contains("No VMs found") {
            return Ok(Vec::new());
        }

        let listing: GatewayList = serde_json::from_str(&stdout)?;
        let mut vms = Vec::new();
        for entry in listing.vms.unwrap_or_default() {
            if prefix.is_some_and(|p| !entry.vm_name.starts_with(p)) {
                continue;
            }
            match entry.into_vm() {
                Ok(vm) => vms.push(vm),
                Err(e) => warn!(error = %e, "Skipping unparseable gateway entry"),
            }
        }
        Ok(vms)
    }

    async fn wait_ready(&self, vm: &Vm, timeout: Duration, interval: Duration) -> Result<bool> {
        wait_for_shell(self.connector.as_ref(), vm, timeout, interval, &self.cancel).await
    }
}
