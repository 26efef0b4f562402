//! SSH transport.
//!
//! Commands are run through the system `ssh` client as subprocesses. Each
//! invocation opens its own connection; nothing is multiplexed.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use crate::error::{FleetError, Result};
use crate::shell::{quote, run_process, CommandOutput, Connector, RemoteShell};
use crate::vm::{Endpoint, Vm};

/// Port the bootstrap protocol starts `sshd` on.
pub const BOOTSTRAP_SSH_PORT: u16 = 2222;

/// Options shared by every SSH invocation.
#[derive(Debug, Clone)]
pub struct SshOptions {
    /// Private key to authenticate with; `None` uses the agent/defaults.
    pub identity: Option<PathBuf>,
    /// Connection timeout.
    pub connect_timeout: Duration,
}

impl Default for SshOptions {
    fn default() -> Self {
        Self {
            identity: None,
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl SshOptions {
    /// Options authenticating with `key`.
    pub fn with_identity(key: impl Into<PathBuf>) -> Self {
        Self {
            identity: Some(key.into()),
            ..Self::default()
        }
    }

    /// Non-interactive arguments for `ssh` to `port`.
    pub fn batch_args(&self, port: u16) -> Vec<String> {
        let mut args = vec![
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            "StrictHostKeyChecking=no".to_string(),
            "-o".to_string(),
            "UserKnownHostsFile=/dev/null".to_string(),
            "-o".to_string(),
            "LogLevel=ERROR".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.connect_timeout.as_secs().max(1)),
        ];
        if let Some(identity) = &self.identity {
            args.push("-i".to_string());
            args.push(identity.display().to_string());
            args.push("-o".to_string());
            args.push("IdentitiesOnly=yes".to_string());
        }
        if port != Endpoint::DEFAULT_SSH_PORT {
            args.push("-p".to_string());
            args.push(port.to_string());
        }
        args
    }
}

/// Arguments for an interactive, TTY-forcing session that survives idle
/// periods (used for agent windows).
pub fn interactive_args(port: u16, identity: Option<&Path>) -> Vec<String> {
    let mut args = vec![
        "-tt".to_string(),
        "-o".to_string(),
        "StrictHostKeyChecking=no".to_string(),
        "-o".to_string(),
        "UserKnownHostsFile=/dev/null".to_string(),
        "-o".to_string(),
        "ServerAliveInterval=15".to_string(),
        "-o".to_string(),
        "ServerAliveCountMax=3".to_string(),
    ];
    if let Some(identity) = identity {
        args.push("-i".to_string());
        args.push(identity.display().to_string());
    }
    if port != Endpoint::DEFAULT_SSH_PORT {
        args.push("-p".to_string());
        args.push(port.to_string());
    }
    args
}

/// Render an argv as one shell-quoted command line.
pub fn command_line<S: AsRef<str>>(argv: &[S]) -> String {
    argv.iter()
        .map(|a| quote(a.as_ref()).into_owned())
        .collect::<Vec<_>>()
        .join(" ")
}

/// A shell on one SSH destination.
#[derive(Debug, Clone)]
pub struct SshShell {
    destination: String,
    port: u16,
    options: SshOptions,
    // Gateways expose their own command set instead of a login shell.
    raw: bool,
}

impl SshShell {
    /// A shell on `destination` (`[user@]host`).
    pub fn new(destination: impl Into<String>, port: u16, options: SshOptions) -> Self {
        Self {
            destination: destination.into(),
            port,
            options,
            raw: false,
        }
    }

    /// A command gateway on `destination`: commands are sent verbatim
    /// rather than through `bash -c`.
    pub fn gateway(destination: impl Into<String>, options: SshOptions) -> Self {
        Self {
            raw: true,
            ..Self::new(destination, Endpoint::DEFAULT_SSH_PORT, options)
        }
    }

    /// A shell on an SSH endpoint.
    pub fn for_endpoint(endpoint: &Endpoint, options: SshOptions) -> Result<Self> {
        let destination = endpoint.destination().ok_or_else(|| {
            FleetError::Configuration(format!("{endpoint} is not reachable over SSH"))
        })?;
        let port = endpoint.port().unwrap_or(Endpoint::DEFAULT_SSH_PORT);
        Ok(Self::new(destination, port, options))
    }

    pub fn destination(&self) -> &str {
        &self.destination
    }

    /// The full `ssh` argv that runs `remote` on this destination.
    pub fn argv(&self, remote: &str) -> Vec<String> {
        let mut argv = vec!["ssh".to_string()];
        argv.extend(self.options.batch_args(self.port));
        argv.push(self.destination.clone());
        argv.push(remote.to_string());
        argv
    }
}

#[async_trait]
impl RemoteShell for SshShell {
    async fn run(&self, command: &str) -> Result<CommandOutput> {
        debug!(destination = %self.destination, port = self.port, "Running remote command");
        let remote = if self.raw {
            command.to_string()
        } else {
            format!("bash -c {}", quote(command))
        };
        let argv = self.argv(&remote);
        let mut cmd = Command::new(&argv[0]);
        cmd.args(&argv[1..]);
        run_process(cmd).await
    }
}

/// Connects to instances with SSH endpoints.
#[derive(Debug, Clone, Default)]
pub struct SshConnector {
    options: SshOptions,
}

impl SshConnector {
    pub fn new(options: SshOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &SshOptions {
        &self.options
    }
}

impl Connector for SshConnector {
    fn connect(&self, vm: &Vm) -> Result<Arc<dyn RemoteShell>> {
        let shell = SshShell::for_endpoint(&vm.endpoint, self.options.clone())?;
        Ok(Arc::new(shell))
    }
}

/// The orchestrator's key pair, used for operator→instance and
/// instance→instance access.
#[derive(Debug, Clone)]
pub struct SshKeyPair {
    /// Path of the private key on the operator's machine.
    pub private_key_path: PathBuf,
    /// Public key line (`ssh-ed25519 AAAA... comment`).
    pub public_key: String,
}

impl SshKeyPair {
    /// Key file name inside the key directory.
    pub const KEY_NAME: &'static str = "id_ed25519";

    /// Load the key pair from `dir`, generating it with `ssh-keygen` if absent.
    pub async fn load_or_generate(dir: &Path) -> Result<Self> {
        let private_key_path = dir.join(Self::KEY_NAME);
        let public_key_path = dir.join(format!("{}.pub", Self::KEY_NAME));

        if !private_key_path.exists() {
            tokio::fs::create_dir_all(dir).await?;
            info!(path = %private_key_path.display(), "Generating SSH key pair");

            let mut cmd = Command::new("ssh-keygen");
            cmd.args(["-t", "ed25519", "-N", "", "-C", "flotilla", "-q", "-f"])
                .arg(&private_key_path);
            let output = run_process(cmd).await?;
            if !output.success() {
                return Err(FleetError::Configuration(format!(
                    "ssh-keygen failed: {}",
                    output.combined().trim()
                )));
            }
        }

        let public_key = tokio::fs::read_to_string(&public_key_path)
            .await
            .map_err(|e| {
                FleetError::Configuration(format!(
                    "cannot read public key {}: {e}",
                    public_key_path.display()
                ))
            })?;

        Ok(Self {
            private_key_path,
            public_key: public_key.trim().to_string(),
        })
    }

    /// Read the private key material (uploaded to instances that must reach
    /// their peers).
    pub async fn private_key(&self) -> Result<String> {
        Ok(tokio::fs::read_to_string(&self.private_key_path).await?)
    }
}
