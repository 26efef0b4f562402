//! Instance bootstrap protocol.
//!
//! Bootstrap is a fixed, ordered list of idempotent steps rendered into one
//! `set -e` bash script. Transports such as a sandbox engine's exec do not
//! keep state between invocations, so the script is always run as a single
//! unit; any failing step aborts the rest.

use std::fmt::Write as _;
use std::net::Ipv4Addr;

use crate::shell::quote;
use crate::ssh::BOOTSTRAP_SSH_PORT;

/// Control socket of the overlay daemon started by bootstrap.
pub const OVERLAY_SOCKET: &str = "/run/tailscale/tailscaled.sock";

/// Unprivileged operating user created on bootstrapped instances.
pub const OPERATOR_USER: &str = "ubuntu";

/// One bootstrap step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapStep {
    /// Base packages: sshd, git, tmux, expect and the GitHub CLI.
    InstallPackages,
    /// `sshd` on the bootstrap port.
    StartShellListener,
    /// Operator user with the orchestrator's public key authorized.
    CreateOperator,
    /// Orchestrator key pair installed for the current user.
    InstallKeyPair,
    /// Register with the hosting gateway by connecting to it once.
    RegisterGateway,
    /// Overlay client installed and its daemon started.
    StartOverlay,
    /// Join the overlay under the instance name.
    JoinOverlay,
    /// Check shell listener and overlay, logging their status.
    Verify,
    /// Agent runtime installed.
    InstallAgent,
}

impl BootstrapStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            BootstrapStep::InstallPackages => "install_packages",
            BootstrapStep::StartShellListener => "start_shell_listener",
            BootstrapStep::CreateOperator => "create_operator",
            BootstrapStep::InstallKeyPair => "install_key_pair",
            BootstrapStep::RegisterGateway => "register_gateway",
            BootstrapStep::StartOverlay => "start_overlay",
            BootstrapStep::JoinOverlay => "join_overlay",
            BootstrapStep::Verify => "verify",
            BootstrapStep::InstallAgent => "install_agent",
        }
    }
}

/// Overlay join parameters.
#[derive(Clone)]
pub struct OverlayJoin {
    /// Pre-authorized join secret (OAuth client secret or auth key).
    pub secret: String,
    /// Capability tag advertised by the node.
    pub tag: String,
}

impl OverlayJoin {
    /// The single-use, ephemeral, pre-authorized auth key.
    pub fn auth_key(&self) -> String {
        format!("{}?ephemeral=true&preauthorized=true", self.secret)
    }
}

impl std::fmt::Debug for OverlayJoin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OverlayJoin")
            .field("secret", &"<redacted>")
            .field("tag", &self.tag)
            .finish()
    }
}

/// Inputs interpolated into the script.
#[derive(Clone)]
pub struct BootstrapParams {
    /// Instance name; also the overlay hostname.
    pub hostname: String,
    /// Orchestrator public key.
    pub public_key: String,
    /// Orchestrator private key (only for [`BootstrapStep::InstallKeyPair`]).
    pub private_key: Option<String>,
    /// Overlay join parameters.
    pub overlay: Option<OverlayJoin>,
    /// Hosting gateway to register with.
    pub gateway: Option<String>,
    /// Agent runtime installer URL.
    pub agent_install_url: String,
}

impl std::fmt::Debug for BootstrapParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BootstrapParams")
            .field("hostname", &self.hostname)
            .field("public_key", &self.public_key)
            .field("private_key", &self.private_key.as_ref().map(|_| "<redacted>"))
            .field("overlay", &self.overlay)
            .field("gateway", &self.gateway)
            .field("agent_install_url", &self.agent_install_url)
            .finish()
    }
}

/// An ordered bootstrap plan.
#[derive(Debug, Clone)]
pub struct BootstrapPlan {
    steps: Vec<BootstrapStep>,
    params: BootstrapParams,
}

impl BootstrapPlan {
    /// Every step, for fresh root-accessible sandboxes.
    pub fn full(params: BootstrapParams) -> Self {
        Self {
            steps: vec![
                BootstrapStep::InstallPackages,
                BootstrapStep::StartShellListener,
                BootstrapStep::CreateOperator,
                BootstrapStep::StartOverlay,
                BootstrapStep::JoinOverlay,
                BootstrapStep::Verify,
                BootstrapStep::InstallAgent,
            ],
            params,
        }
    }

    /// Steps for hosts that already provide a shell and public addressing.
    pub fn hosted(params: BootstrapParams) -> Self {
        Self {
            steps: vec![
                BootstrapStep::InstallKeyPair,
                BootstrapStep::RegisterGateway,
                BootstrapStep::InstallAgent,
            ],
            params,
        }
    }

    pub fn steps(&self) -> &[BootstrapStep] {
        &self.steps
    }

    /// Render the plan as one script.
    pub fn render(&self) -> String {
        let mut script = String::from("set -e\n");
        for step in &self.steps {
            let _ = writeln!(script, "\n# --- {} ---", step.as_str());
            script.push_str(&self.render_step(*step));
        }
        script.push_str("\necho 'Bootstrap complete'\n");
        script
    }

    fn render_step(&self, step: BootstrapStep) -> String {
        let p = &self.params;
        match step {
            BootstrapStep::InstallPackages => INSTALL_PACKAGES.to_string(),
            BootstrapStep::StartShellListener => format!(
                "mkdir -p /run/sshd\n\
                 echo 'Port {BOOTSTRAP_SSH_PORT}' > /etc/ssh/sshd_config.d/flotilla.conf\n\
                 /usr/sbin/sshd\n"
            ),
            BootstrapStep::CreateOperator => {
                let home = format!("/home/{OPERATOR_USER}");
                format!(
                    "id {OPERATOR_USER} || useradd -m -s /bin/bash {OPERATOR_USER}\n\
                     echo '{OPERATOR_USER} ALL=(ALL) NOPASSWD:ALL' > /etc/sudoers.d/{OPERATOR_USER}\n\
                     mkdir -p {home}/.ssh\n\
                     echo {key} >> {home}/.ssh/authorized_keys\n\
                     chown -R {OPERATOR_USER}:{OPERATOR_USER} {home}/.ssh\n\
                     chmod 700 {home}/.ssh\n\
                     chmod 600 {home}/.ssh/authorized_keys\n",
                    key = quote(p.public_key.trim()),
                )
            }
            BootstrapStep::InstallKeyPair => {
                let mut s = String::from("mkdir -p ~/.ssh && chmod 700 ~/.ssh\n");
                if let Some(private_key) = &p.private_key {
                    let _ = writeln!(
                        s,
                        "printf '%s\\n' {} > ~/.ssh/id_ed25519\nchmod 600 ~/.ssh/id_ed25519",
                        quote(private_key.trim())
                    );
                }
                let _ = writeln!(
                    s,
                    "grep -qxF {key} ~/.ssh/authorized_keys 2>/dev/null || echo {key} >> ~/.ssh/authorized_keys\n\
                     chmod 600 ~/.ssh/authorized_keys",
                    key = quote(p.public_key.trim())
                );
                s
            }
            BootstrapStep::RegisterGateway => match &p.gateway {
                Some(gateway) => format!(
                    "ssh -o StrictHostKeyChecking=no {} whoami || true\n",
                    quote(gateway)
                ),
                None => String::new(),
            },
            BootstrapStep::StartOverlay => START_OVERLAY.to_string(),
            BootstrapStep::JoinOverlay => match &p.overlay {
                Some(overlay) => format!(
                    "/usr/bin/tailscale --socket=$TS_SOCK up \\\n    \
                     --authkey={} \\\n    \
                     --hostname={} \\\n    \
                     --advertise-tags={}\n\
                     echo 'Waiting for overlay to stabilize...'\n\
                     sleep 10\n",
                    quote(&overlay.auth_key()),
                    quote(&p.hostname),
                    quote(&overlay.tag),
                ),
                None => String::new(),
            },
            BootstrapStep::Verify => format!(
                "if ! pgrep -x sshd > /dev/null; then\n    \
                 echo 'sshd not running, restarting...'\n    \
                 /usr/sbin/sshd\n    \
                 sleep 1\n\
                 fi\n\
                 echo 'sshd status:'\n\
                 ss -tlnp | grep ':{BOOTSTRAP_SSH_PORT}' || echo 'Warning: port {BOOTSTRAP_SSH_PORT} not listening'\n\
                 echo 'Overlay status:'\n\
                 /usr/bin/tailscale --socket=$TS_SOCK status 2>&1 | head -5\n"
            ),
            BootstrapStep::InstallAgent => {
                format!("curl -fsSL {} | bash\n", quote(&p.agent_install_url))
            }
        }
    }
}

const INSTALL_PACKAGES: &str = r#"export DEBIAN_FRONTEND=noninteractive
apt-get update
apt-get install -y openssh-server curl sudo git tmux expect
GH_KEYRING=/usr/share/keyrings/githubcli-archive-keyring.gpg
curl -fsSL https://cli.github.com/packages/githubcli-archive-keyring.gpg | dd of=$GH_KEYRING
chmod go+r $GH_KEYRING
echo "deb [arch=$(dpkg --print-architecture) signed-by=$GH_KEYRING] https://cli.github.com/packages stable main" \
    > /etc/apt/sources.list.d/github-cli.list
apt-get update
apt-get install -y gh
"#;

// The daemon must be fully detached from the exec session's stdio, or
// engines that wait for every descriptor to close never return.
const START_OVERLAY: &str = r#"curl -fsSL https://tailscale.com/install.sh | sh
mkdir -p /run/tailscale /var/lib/tailscale /var/cache/tailscale
chmod 0755 /run/tailscale
chmod 0700 /var/lib/tailscale
chmod 0750 /var/cache/tailscale
TS_SOCK=/run/tailscale/tailscaled.sock
(/usr/sbin/tailscaled --state=mem: --socket=$TS_SOCK \
    --tun=userspace-networking </dev/null >/var/log/tailscaled.log 2>&1 &)
sleep 5
if ! pgrep -x tailscaled > /dev/null; then
    echo 'tailscaled failed to start'
    exit 1
fi
echo 'tailscaled is running'
"#;

/// Command printing overlay status (always exits zero).
pub fn overlay_status_command() -> String {
    format!("/usr/bin/tailscale --socket={OVERLAY_SOCKET} status 2>&1 || true")
}

/// Command printing the instance's overlay IPv4 address (always exits zero).
pub fn overlay_ip_command() -> String {
    format!("/usr/bin/tailscale --socket={OVERLAY_SOCKET} ip -4 2>&1 || true")
}

/// Command leaving the overlay.
pub fn overlay_logout_command() -> String {
    format!("/usr/bin/tailscale --socket={OVERLAY_SOCKET} logout")
}

/// Extract the overlay address from `ip -4` output.
pub fn parse_overlay_ip(output: &str) -> Option<Ipv4Addr> {
    output
        .lines()
        .map(str::trim)
        .find_map(|line| line.parse::<Ipv4Addr>().ok())
}
