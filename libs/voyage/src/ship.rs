//! Ship bootstrap.

use flotilla_provider::{
    quote, with_cleanup, Endpoint, RemoteShell, Result, SshKeyPair, Vm, BOOTSTRAP_SSH_PORT,
};
use tracing::{debug, info};

use crate::credentials::Credentials;
use crate::layout::{
    agent_settings, task_dir, AGENT_WRAPPER, LOGS_DIR, TOOL_DIR, VOYAGE_DIR, WORKSPACE_DIR,
    WORKSPACE_FROM_HOME,
};
use crate::orchestrator::Orchestrator;
use crate::templates::{agent_hook_settings, agent_wrapper};
use crate::voyage::Voyage;

/// Login of the operator account bootstrap creates on overlay instances.
const PEER_USER: &str = "ubuntu";

/// `~/voyage` relative to a remote login directory, for `scp` sources.
const VOYAGE_DIR_FROM_HOME: &str = "voyage";

/// SSH options for instance-to-instance hops. Peers are ephemeral, so their
/// host keys are never pinned.
const PEER_SSH_OPTIONS: &str =
    "-i ~/.ssh/id_ed25519 -o StrictHostKeyChecking=no -o UserKnownHostsFile=/dev/null -o LogLevel=ERROR";

impl Orchestrator {
    /// Create ship `index` and prepare it to run an agent.
    ///
    /// Anything that fails after the instance exists destroys it again.
    pub(crate) async fn bootstrap_ship(
        &self,
        voyage: &Voyage,
        index: usize,
        storage: &Vm,
        credentials: &Credentials,
    ) -> Result<Vm> {
        let name = voyage.ship_name(index);
        info!(voyage_id = %voyage.id, ship = index, name = %name, "Launching ship");

        let ship = self.provider.create(&name, true).await?;

        with_cleanup(
            &name,
            self.prepare_ship(voyage, &ship, storage, credentials),
            || self.provider.destroy(&ship.id),
        )
        .await?;

        info!(voyage_id = %voyage.id, ship = index, endpoint = %ship.endpoint, "Ship ready");
        Ok(ship)
    }

    async fn prepare_ship(
        &self,
        voyage: &Voyage,
        ship: &Vm,
        storage: &Vm,
        credentials: &Credentials,
    ) -> Result<()> {
        let shell = self.connector.connect(ship)?;

        shell
            .run_checked(&format!(
                "mkdir -p {WORKSPACE_DIR} {LOGS_DIR} {TOOL_DIR} {}",
                task_dir(&self.agent.config_dir, &voyage.task_namespace_id)
            ))
            .await?;
        install_key_pair(shell.as_ref(), &self.keys).await?;
        authenticate_source_control(shell.as_ref(), credentials).await?;

        let (dest, port) = peer_destination(storage);
        debug!(ship = %ship.name, storage = %dest, "Cloning from storage");
        shell
            .run_checked(&format!(
                "GIT_SSH_COMMAND={} git clone -b {} {} {WORKSPACE_DIR}",
                quote(&format!("ssh {PEER_SSH_OPTIONS}")),
                quote(&voyage.branch),
                quote(&format!("ssh://{dest}:{port}/~/{WORKSPACE_FROM_HOME}")),
            ))
            .await?;
        shell
            .run_checked(&format!(
                "cd {WORKSPACE_DIR} && git config user.name {name} && git config user.email {email} \
                 && git config core.sshCommand {ssh}",
                name = quote(&ship.name),
                email = quote(&format!("{}@flotilla.invalid", ship.name)),
                ssh = quote(&format!("ssh {PEER_SSH_OPTIONS}")),
            ))
            .await?;

        shell
            .run_checked(&format!(
                "scp -P {port} {PEER_SSH_OPTIONS} {src}:{VOYAGE_DIR_FROM_HOME}/prompt.md {src}:{VOYAGE_DIR_FROM_HOME}/on-stop.sh {VOYAGE_DIR}/ \
                 && chmod +x {VOYAGE_DIR}/on-stop.sh",
                src = quote(&dest),
            ))
            .await?;

        shell.put(agent_wrapper().as_bytes(), AGENT_WRAPPER).await?;
        shell.run_checked(&format!("chmod +x {AGENT_WRAPPER}")).await?;
        shell
            .put(
                agent_hook_settings().as_bytes(),
                &agent_settings(&self.agent.config_dir),
            )
            .await?;

        Ok(())
    }
}

/// Install the orchestrator key pair so the instance can reach its peers and
/// be reached by them.
pub(crate) async fn install_key_pair(shell: &dyn RemoteShell, keys: &SshKeyPair) -> Result<()> {
    let private_key = keys.private_key().await?;

    shell.run_checked("mkdir -p ~/.ssh && chmod 700 ~/.ssh").await?;
    shell.put(private_key.as_bytes(), "~/.ssh/id_ed25519").await?;
    shell
        .put(
            format!("{}\n", keys.public_key).as_bytes(),
            "~/.ssh/id_ed25519.pub",
        )
        .await?;
    shell
        .run_checked(&format!(
            "chmod 600 ~/.ssh/id_ed25519 && \
             (grep -qxF {key} ~/.ssh/authorized_keys 2>/dev/null || echo {key} >> ~/.ssh/authorized_keys) && \
             chmod 600 ~/.ssh/authorized_keys",
            key = quote(&keys.public_key)
        ))
        .await?;
    Ok(())
}

/// Log the GitHub CLI in when a token is present.
pub(crate) async fn authenticate_source_control(
    shell: &dyn RemoteShell,
    credentials: &Credentials,
) -> Result<()> {
    let Some(token) = &credentials.source_control_token else {
        debug!("No source-control token, skipping gh auth");
        return Ok(());
    };
    shell
        .run_checked(&format!(
            "printf '%s\\n' {} | gh auth login --with-token && gh auth setup-git",
            quote(token)
        ))
        .await?;
    Ok(())
}

/// How peers reach `vm` over SSH: `(user@host, port)`.
///
/// Fleet instances are addressed by name on the overlay network, where
/// bootstrap left `sshd` listening on its own port.
pub fn peer_destination(vm: &Vm) -> (String, u16) {
    match &vm.endpoint {
        Endpoint::Ssh { port, .. } => (
            vm.endpoint.destination().unwrap_or_else(|| vm.name.clone()),
            *port,
        ),
        Endpoint::Fleet { name, .. } => (format!("{PEER_USER}@{name}"), BOOTSTRAP_SSH_PORT),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peer_destination() {
        let ssh = Vm::running(
            "voyage-3f9a0c11b2de-storage",
            Endpoint::ssh_on(Some("ubuntu"), "100.64.0.3", 2222),
        );
        assert_eq!(peer_destination(&ssh), ("ubuntu@100.64.0.3".to_string(), 2222));

        let hosted = Vm::running("box", Endpoint::ssh(None, "box.exe.xyz"));
        assert_eq!(peer_destination(&hosted), ("box.exe.xyz".to_string(), 22));

        let fleet = Vm::running(
            "voyage-3f9a0c11b2de-storage",
            Endpoint::Fleet {
                org: "acme".to_string(),
                name: "voyage-3f9a0c11b2de-storage".to_string(),
            },
        );
        assert_eq!(
            peer_destination(&fleet),
            ("ubuntu@voyage-3f9a0c11b2de-storage".to_string(), 2222)
        );
    }
}
