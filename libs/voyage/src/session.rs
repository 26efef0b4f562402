//! Fleet session launcher.
//!
//! One tmux session per voyage, named after the voyage, with one window per
//! ship. With [`SessionTopology::Hub`] tmux runs on storage and every window
//! hops from there to its ship; with [`SessionTopology::Direct`] tmux runs
//! on the operator's machine and every window connects out directly.

use std::path::PathBuf;
use std::sync::Arc;

use flotilla_id::{window_name, VoyageId};
use flotilla_provider::backends::exec_argv;
use flotilla_provider::{
    command_line, interactive_args, quote, Endpoint, FleetError, RemoteShell, Result,
    SessionTopology, Vm,
};
use tracing::{info, warn};

use crate::credentials::{AGENT_TOKEN_ENV, TASK_NAMESPACE_ENV};
use crate::layout::{window_log, AGENT_WRAPPER, WORKSPACE_DIR};
use crate::ship::peer_destination;
use crate::voyage::Voyage;

/// Seconds a finished window stays open so its last output can be read.
pub const LINGER_SECS: u64 = 60;

/// Launches and tears down the tmux session of a voyage.
pub struct SessionLauncher {
    topology: SessionTopology,
    /// Where tmux runs: storage for hub sessions, the operator otherwise.
    host: Arc<dyn RemoteShell>,
    storage: Vm,
    agent_command: String,
    fleet_cli: String,
    /// Operator key, used for every connection leaving the operator machine.
    identity: Option<PathBuf>,
}

impl SessionLauncher {
    pub fn new(topology: SessionTopology, storage: Vm, host: Arc<dyn RemoteShell>) -> Self {
        Self {
            topology,
            host,
            storage,
            agent_command: "claude".to_string(),
            fleet_cli: "sprite".to_string(),
            identity: None,
        }
    }

    pub fn with_agent_command(mut self, command: impl Into<String>) -> Self {
        self.agent_command = command.into();
        self
    }

    pub fn with_fleet_cli(mut self, cli: impl Into<String>) -> Self {
        self.fleet_cli = cli.into();
        self
    }

    pub fn with_identity(mut self, identity: impl Into<PathBuf>) -> Self {
        self.identity = Some(identity.into());
        self
    }

    pub fn topology(&self) -> SessionTopology {
        self.topology
    }

    /// Start the session with one window per ship, in the order given.
    pub async fn launch(
        &self,
        voyage: &Voyage,
        ships: &[(usize, Vm)],
        agent_token: &str,
    ) -> Result<()> {
        if ships.is_empty() {
            return Err(FleetError::NotFound(format!(
                "voyage {} has no ships to attach",
                voyage.id
            )));
        }

        let session = voyage.id.to_string();
        for (position, (index, ship)) in ships.iter().enumerate() {
            let window = window_name(*index);
            let argv = self.window_command(&window, voyage, ship, agent_token);
            let tmux = if position == 0 {
                format!(
                    "tmux new-session -d -s {} -n {} {}",
                    quote(&session),
                    quote(&window),
                    quote(&command_line(&argv))
                )
            } else {
                format!(
                    "tmux new-window -t {} -n {} {}",
                    quote(&session),
                    quote(&window),
                    quote(&command_line(&argv))
                )
            };
            self.host.run_checked(&tmux).await?;
        }

        info!(
            voyage_id = %voyage.id,
            topology = ?self.topology,
            windows = ships.len(),
            "Session launched"
        );
        Ok(())
    }

    /// Argv that opens the agent window for `ship`, as run by the tmux host.
    pub fn window_command(
        &self,
        window: &str,
        voyage: &Voyage,
        ship: &Vm,
        agent_token: &str,
    ) -> Vec<String> {
        let inner = inner_command(window, voyage, &self.agent_command, agent_token);

        match (&ship.endpoint, self.topology) {
            (Endpoint::Fleet { org, name }, SessionTopology::Direct) => {
                exec_argv(&self.fleet_cli, org, name, &inner)
            }
            (Endpoint::Ssh { .. }, SessionTopology::Direct) => {
                let (dest, port) = peer_destination(ship);
                ssh_argv(&dest, port, self.identity.as_deref(), inner)
            }
            // Storage reaches ships with the key installed on it.
            (_, SessionTopology::Hub) => {
                let (dest, port) = peer_destination(ship);
                ssh_argv(&dest, port, None, inner)
            }
        }
    }

    /// Argv attaching the operator's terminal to the session, optionally
    /// focused on one ship's window.
    pub fn attach_command(&self, voyage_id: &VoyageId, ship: Option<usize>) -> Vec<String> {
        let target = match ship {
            Some(index) => format!("{voyage_id}:{}", window_name(index)),
            None => voyage_id.to_string(),
        };

        if self.topology == SessionTopology::Direct {
            return ["tmux", "attach", "-t", &target]
                .into_iter()
                .map(str::to_string)
                .collect();
        }

        let remote = format!("tmux attach -t {}", quote(&target));
        match &self.storage.endpoint {
            Endpoint::Fleet { org, name } => exec_argv(&self.fleet_cli, org, name, &remote),
            Endpoint::Ssh { port, .. } => {
                let mut argv = vec!["ssh".to_string(), "-t".to_string()];
                if *port != Endpoint::DEFAULT_SSH_PORT {
                    argv.push("-p".to_string());
                    argv.push(port.to_string());
                }
                if let Some(identity) = &self.identity {
                    argv.push("-i".to_string());
                    argv.push(identity.display().to_string());
                }
                argv.push(
                    self.storage
                        .endpoint
                        .destination()
                        .unwrap_or_else(|| self.storage.name.clone()),
                );
                argv.push(remote);
                argv
            }
        }
    }

    /// Kill the voyage's session. Never fails; problems are logged.
    pub async fn kill(&self, voyage_id: &VoyageId) {
        let command = format!("tmux kill-session -t {}", quote(&voyage_id.to_string()));
        match self.host.run(&command).await {
            Ok(output) if output.success() => {
                info!(voyage_id = %voyage_id, "Session killed");
            }
            Ok(output) => {
                info!(
                    voyage_id = %voyage_id,
                    output = %output.combined().trim(),
                    "No session to kill"
                );
            }
            Err(err) => {
                warn!(voyage_id = %voyage_id, error = %err, "Failed to kill session");
            }
        }
    }
}

fn ssh_argv(
    dest: &str,
    port: u16,
    identity: Option<&std::path::Path>,
    inner: String,
) -> Vec<String> {
    let mut argv = vec!["ssh".to_string()];
    argv.extend(interactive_args(port, identity));
    argv.push(dest.to_string());
    argv.push(inner);
    argv
}

/// The shell command a ship window runs on the ship itself.
///
/// The agent's output is teed into the window log and the window lingers
/// after the agent exits so its last words stay on screen.
pub fn inner_command(window: &str, voyage: &Voyage, agent_command: &str, agent_token: &str) -> String {
    let log = window_log(window);
    let window = quote(window);
    [
        "set -o pipefail".to_string(),
        format!("cd {WORKSPACE_DIR}"),
        format!("printf '=== %s started %s ===\\n' {window} \"$(date -Iseconds)\" >> {log}"),
        "export LANG=C.UTF-8 LC_ALL=C.UTF-8".to_string(),
        format!("export {AGENT_TOKEN_ENV}={}", quote(agent_token)),
        format!(
            "export {TASK_NAMESPACE_ENV}={}",
            quote(&voyage.task_namespace_id)
        ),
        format!(
            "{AGENT_WRAPPER} {} --dangerously-skip-permissions \
             --append-system-prompt-file \"$HOME/voyage/prompt.md\" 'Execute STEP 1 now.' \
             2>&1 | tee -a {log}",
            quote(agent_command)
        ),
        "EXIT_CODE=$?".to_string(),
        format!(
            "printf '=== %s exited %s at %s ===\\n' {window} \"$EXIT_CODE\" \"$(date -Iseconds)\" >> {log}"
        ),
        format!(
            "printf 'Ship %s finished (exit %s). Window closes in {LINGER_SECS}s...\\n' {window} \"$EXIT_CODE\""
        ),
        format!("sleep {LINGER_SECS}"),
    ]
    .join("; ")
}
