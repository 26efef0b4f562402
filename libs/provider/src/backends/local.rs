//! Local sandbox engine backend.
//!
//! Sandboxes run on the operator's machine under a docker-compatible engine.
//! Bootstrap happens through the engine's exec; afterwards the instance is
//! reached over the overlay network like any other. Sandboxes outlive the
//! process that started them, so the engine's own listing is the registry.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, error, info, warn};

use crate::bootstrap::{
    overlay_ip_command, overlay_logout_command, overlay_status_command, parse_overlay_ip,
    BootstrapParams, BootstrapPlan, OverlayJoin, OPERATOR_USER,
};
use crate::cancel::CancelSignal;
use crate::cleanup::with_cleanup;
use crate::error::{FleetError, Result};
use crate::provider::{wait_for_shell, Backend, Provider, ProviderContext};
use crate::settings::{LocalSettings, ReadinessSettings};
use crate::shell::{run_process, CommandOutput, Connector, DIAGNOSTIC_TAIL};
use crate::ssh::{SshConnector, SshOptions, BOOTSTRAP_SSH_PORT};
use crate::vm::{Endpoint, Vm, VmStatus};

/// Label set on every sandbox this backend starts.
pub const SANDBOX_LABEL: &str = "dev.flotilla.sandbox";

/// A sandbox as the engine reports it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sandbox {
    pub handle: String,
    pub name: String,
    pub running: bool,
}

/// A sandbox engine able to start, exec into and stop sandboxes.
#[async_trait]
pub trait SandboxEngine: Send + Sync {
    /// Start a sandbox named `name`; returns the engine's handle for it.
    async fn start(&self, name: &str) -> Result<String>;

    /// Labelled sandboxes, oldest first, whichever process started them.
    async fn list(&self) -> Result<Vec<Sandbox>>;

    /// Run `script` through `bash -c` inside the sandbox.
    async fn exec(&self, handle: &str, script: &str) -> Result<CommandOutput>;

    /// Stop and remove the sandbox.
    async fn stop(&self, handle: &str) -> Result<()>;
}

/// Drives a docker-compatible CLI (`docker`, `podman`, ...).
#[derive(Debug, Clone)]
pub struct CliEngine {
    settings: LocalSettings,
}

impl CliEngine {
    pub fn new(settings: LocalSettings) -> Self {
        Self { settings }
    }

    /// Arguments for `run`.
    pub fn run_args(&self, name: &str) -> Vec<String> {
        let mut args = vec![
            "run".to_string(),
            "-d".to_string(),
            "--name".to_string(),
            name.to_string(),
            "--hostname".to_string(),
            name.to_string(),
            "--label".to_string(),
            format!("{SANDBOX_LABEL}=1"),
        ];
        if self.settings.disk_gb > 0 {
            args.push("--storage-opt".to_string());
            args.push(format!("size={}G", self.settings.disk_gb));
        }
        args.extend(self.settings.run_args.iter().cloned());
        args.push(self.settings.image.clone());
        args.push("sleep".to_string());
        args.push("infinity".to_string());
        args
    }

    /// Arguments for `ps`.
    pub fn list_args(&self) -> Vec<String> {
        vec![
            "ps".to_string(),
            "-a".to_string(),
            "--no-trunc".to_string(),
            "--filter".to_string(),
            format!("label={SANDBOX_LABEL}"),
            "--format".to_string(),
            "{{.ID}}\t{{.Names}}\t{{.State}}\t{{.CreatedAt}}".to_string(),
        ]
    }

    async fn engine(&self, args: &[String]) -> Result<CommandOutput> {
        let mut cmd = Command::new(&self.settings.engine);
        cmd.args(args);
        run_process(cmd).await
    }
}

#[async_trait]
impl SandboxEngine for CliEngine {
    async fn start(&self, name: &str) -> Result<String> {
        info!(name = %name, image = %self.settings.image, "Starting sandbox");
        let output = self.engine(&self.run_args(name)).await?;
        if !output.success() {
            return Err(FleetError::provision_with(
                format!("{} run failed for {name}", self.settings.engine),
                output.tail(DIAGNOSTIC_TAIL),
            ));
        }
        let handle = output.stdout.trim().to_string();
        if handle.is_empty() {
            return Err(FleetError::provision(format!(
                "{} run returned no sandbox id for {name}",
                self.settings.engine
            )));
        }
        Ok(handle)
    }

    async fn list(&self) -> Result<Vec<Sandbox>> {
        let output = self.engine(&self.list_args()).await?;
        if !output.success() {
            return Err(FleetError::Command {
                command: format!("{} ps", self.settings.engine),
                status: output.status,
                output: output.tail(DIAGNOSTIC_TAIL),
            });
        }
        Ok(parse_listing(&output.stdout))
    }

    async fn exec(&self, handle: &str, script: &str) -> Result<CommandOutput> {
        let args = [
            "exec".to_string(),
            handle.to_string(),
            "bash".to_string(),
            "-c".to_string(),
            script.to_string(),
        ];
        self.engine(&args).await
    }

    async fn stop(&self, handle: &str) -> Result<()> {
        debug!(handle = %handle, "Removing sandbox");
        let output = self
            .engine(&["rm".to_string(), "-f".to_string(), handle.to_string()])
            .await?;
        if !output.success() {
            return Err(FleetError::Command {
                command: format!("{} rm", self.settings.engine),
                status: output.status,
                output: output.tail(DIAGNOSTIC_TAIL),
            });
        }
        Ok(())
    }
}

/// Parse tab-separated `ps` output into sandboxes, oldest first.
///
/// The engine lists newest first; reversing keeps same-second creations in
/// order before the stable sort on the creation timestamp.
pub fn parse_listing(stdout: &str) -> Vec<Sandbox> {
    let mut rows: Vec<(String, Sandbox)> = stdout
        .lines()
        .filter_map(|line| {
            let mut fields = line.trim_end().split('\t');
            let handle = fields.next()?.trim();
            let name = fields.next()?.trim();
            let state = fields.next()?.trim();
            let created = fields.next().unwrap_or_default().trim();
            if handle.is_empty() || name.is_empty() {
                return None;
            }
            Some((
                created.to_string(),
                Sandbox {
                    handle: handle.to_string(),
                    name: name.trim_start_matches('/').to_string(),
                    running: state.eq_ignore_ascii_case("running"),
                },
            ))
        })
        .collect();
    rows.reverse();
    rows.sort_by(|a, b| a.0.cmp(&b.0));
    rows.into_iter().map(|(_, sandbox)| sandbox).collect()
}

/// Provider for local sandboxes.
pub struct LocalProvider {
    engine: Arc<dyn SandboxEngine>,
    connector: Arc<dyn Connector>,
    public_key: String,
    overlay: Option<OverlayJoin>,
    agent_install_url: String,
    readiness: ReadinessSettings,
    cancel: CancelSignal,
}

impl LocalProvider {
    pub const NAME: &'static str = "local";

    /// A local provider over `engine`, reaching instances through `connector`.
    pub fn new(
        ctx: &ProviderContext,
        engine: Arc<dyn SandboxEngine>,
        connector: Arc<dyn Connector>,
    ) -> Self {
        let settings = &ctx.settings;
        let overlay = settings.overlay.auth_key.clone().map(|secret| OverlayJoin {
            secret,
            tag: settings.overlay.ship_tag.clone(),
        });
        Self {
            engine,
            connector,
            public_key: ctx.keys.public_key.clone(),
            overlay,
            agent_install_url: settings.agent.install_url.clone(),
            readiness: settings.readiness.clone(),
            cancel: ctx.cancel.clone(),
        }
    }

    /// Registry constructor.
    pub fn backend(ctx: &ProviderContext) -> Result<Backend> {
        let connector: Arc<dyn Connector> = Arc::new(SshConnector::new(
            SshOptions::with_identity(&ctx.keys.private_key_path),
        ));
        let engine = Arc::new(CliEngine::new(ctx.settings.local.clone()));
        let provider = Arc::new(Self::new(ctx, engine, Arc::clone(&connector)));
        Ok(Backend {
            name: Self::NAME,
            provider,
            connector,
        })
    }

    async fn bootstrap(
        &self,
        name: &str,
        handle: &str,
        overlay: &OverlayJoin,
        wait: bool,
    ) -> Result<Vm> {
        let plan = BootstrapPlan::full(BootstrapParams {
            hostname: name.to_string(),
            public_key: self.public_key.clone(),
            private_key: None,
            overlay: Some(overlay.clone()),
            gateway: None,
            agent_install_url: self.agent_install_url.clone(),
        });

        info!(name = %name, "Bootstrapping sandbox");
        let output = self.engine.exec(handle, &plan.render()).await?;
        if !output.success() {
            let tail = output.tail(DIAGNOSTIC_TAIL);
            error!(name = %name, status = output.status, output = %tail, "Bootstrap failed");
            return Err(FleetError::provision_with(
                format!("bootstrap of {name} exited with status {}", output.status),
                tail,
            ));
        }
        info!(name = %name, output = %output.tail(DIAGNOSTIC_TAIL), "Bootstrap output");

        let status = self.engine.exec(handle, &overlay_status_command()).await?;
        info!(name = %name, status = %status.tail(DIAGNOSTIC_TAIL), "Overlay status");
        let ip_output = self.engine.exec(handle, &overlay_ip_command()).await?;
        let ip = parse_overlay_ip(&ip_output.stdout).ok_or_else(|| {
            FleetError::provision_with(
                format!("{name} has no overlay address"),
                status.tail(DIAGNOSTIC_TAIL),
            )
        })?;
        debug!(name = %name, ip = %ip, "Joined overlay");

        let vm = Vm::running(name, overlay_endpoint(ip.to_string()));

        if wait
            && !self
                .wait_ready(&vm, self.readiness.timeout(), self.readiness.interval())
                .await?
        {
            return Err(FleetError::provision_with(
                format!("{name} did not become reachable over SSH"),
                status.tail(DIAGNOSTIC_TAIL),
            ));
        }

        Ok(vm)
    }

    async fn find(&self, name: &str) -> Result<Option<Sandbox>> {
        Ok(self
            .engine
            .list()
            .await?
            .into_iter()
            .find(|sandbox| sandbox.name == name))
    }

    /// Rebuild the instance record, asking the sandbox for its overlay address.
    async fn describe(&self, sandbox: &Sandbox) -> Vm {
        let mut vm = Vm {
            id: sandbox.name.clone(),
            name: sandbox.name.clone(),
            endpoint: overlay_endpoint(sandbox.name.clone()),
            status: VmStatus::Terminated,
        };
        if !sandbox.running {
            return vm;
        }

        match self.engine.exec(&sandbox.handle, &overlay_ip_command()).await {
            Ok(output) => match parse_overlay_ip(&output.stdout) {
                Some(ip) => return Vm::running(&sandbox.name, overlay_endpoint(ip.to_string())),
                None => debug!(name = %sandbox.name, "Sandbox has no overlay address"),
            },
            Err(e) => debug!(name = %sandbox.name, error = %e, "Overlay address lookup failed"),
        }
        vm.status = VmStatus::Pending;
        vm
    }
}

fn overlay_endpoint(host: String) -> Endpoint {
    Endpoint::ssh_on(Some(OPERATOR_USER), host, BOOTSTRAP_SSH_PORT)
}

#[async_trait]
impl Provider for LocalProvider {
    async fn create(&self, name: &str, wait: bool) -> Result<Vm> {
        let overlay = self.overlay.as_ref().ok_or_else(|| {
            FleetError::Configuration(
                "overlay auth key is not set (FLOTILLA_OVERLAY_AUTH_KEY)".to_string(),
            )
        })?;

        if self.find(name).await?.is_some() {
            return Err(FleetError::provision(format!("{name} already exists")));
        }

        let handle = self.engine.start(name).await?;
        let vm = with_cleanup(
            name,
            self.bootstrap(name, &handle, overlay, wait),
            || self.engine.stop(&handle),
        )
        .await?;

        info!(name = %name, endpoint = %vm.endpoint, "Sandbox ready");
        Ok(vm)
    }

    async fn destroy(&self, id: &str) -> Result<()> {
        let Some(sandbox) = self.find(id).await? else {
            debug!(id = %id, "Destroy of unknown sandbox ignored");
            return Ok(());
        };

        if sandbox.running {
            match self.engine.exec(&sandbox.handle, &overlay_logout_command()).await {
                Ok(output) if output.success() => {}
                Ok(output) => {
                    warn!(id = %id, output = %output.tail(DIAGNOSTIC_TAIL), "Overlay logout failed")
                }
                Err(e) => warn!(id = %id, error = %e, "Overlay logout failed"),
            }
        }

        info!(id = %id, "Stopping sandbox");
        self.engine.stop(&sandbox.handle).await
    }

    async fn get(&self, id: &str) -> Result<Option<Vm>> {
        match self.find(id).await? {
            Some(sandbox) => Ok(Some(self.describe(&sandbox).await)),
            None => Ok(None),
        }
    }

    async fn list(&self, prefix: Option<&str>) -> Result<Vec<Vm>> {
        let mut vms = Vec::new();
        for sandbox in self.engine.list().await? {
            if prefix.is_none_or(|p| sandbox.name.starts_with(p)) {
                vms.push(self.describe(&sandbox).await);
            }
        }
        Ok(vms)
    }

    async fn wait_ready(&self, vm: &Vm, timeout: Duration, interval: Duration) -> Result<bool> {
        wait_for_shell(self.connector.as_ref(), vm, timeout, interval, &self.cancel).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_args() {
        let engine = CliEngine::new(LocalSettings {
            run_args: vec!["--runtime=runsc".to_string()],
            ..LocalSettings::default()
        });
        let args = engine.run_args("voyage-abc-ship0");

        assert_eq!(&args[..4], &["run", "-d", "--name", "voyage-abc-ship0"]);
        assert!(args.contains(&"size=10G".to_string()));
        assert!(args.contains(&"--runtime=runsc".to_string()));
        assert_eq!(&args[args.len() - 3..], &["ubuntu:22.04", "sleep", "infinity"]);
    }

    #[test]
    fn test_run_args_label_sandbox() {
        let engine = CliEngine::new(LocalSettings::default());
        let args = engine.run_args("voyage-abc-ship0");
        assert!(args.contains(&"dev.flotilla.sandbox=1".to_string()));
        assert!(engine
            .list_args()
            .contains(&"label=dev.flotilla.sandbox".to_string()));
    }

    #[test]
    fn test_parse_listing_oldest_first() {
        let stdout = "\
c3\tvoyage-abc-ship1\trunning\t2026-10-18 09:00:05 +0000 UTC
c2\tvoyage-abc-ship0\texited\t2026-10-18 09:00:05 +0000 UTC
c1\tvoyage-abc-storage\trunning\t2026-10-18 09:00:01 +0000 UTC

malformed
";
        let sandboxes = parse_listing(stdout);

        let names: Vec<&str> = sandboxes.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(
            names,
            ["voyage-abc-storage", "voyage-abc-ship0", "voyage-abc-ship1"]
        );
        assert_eq!(sandboxes[0].handle, "c1");
        assert!(!sandboxes[1].running);
        assert!(sandboxes[2].running);
    }

    #[test]
    fn test_run_args_without_disk_limit() {
        let engine = CliEngine::new(LocalSettings {
            disk_gb: 0,
            ..LocalSettings::default()
        });
        assert!(!engine.run_args("n").contains(&"--storage-opt".to_string()));
    }
}
