//! The VM entity: identity, connection endpoint and lifecycle status.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::FleetError;

/// Lifecycle status of an instance.
///
/// Only provider operations move an instance between states:
/// `Pending -> Running -> Terminated`, or `Pending -> Terminated` when
/// bootstrap fails and the partial instance is torn down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VmStatus {
    Pending,
    Running,
    Error,
    Terminated,
}

impl fmt::Display for VmStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            VmStatus::Pending => "pending",
            VmStatus::Running => "running",
            VmStatus::Error => "error",
            VmStatus::Terminated => "terminated",
        };
        f.write_str(s)
    }
}

impl FromStr for VmStatus {
    type Err = FleetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pending" | "starting" | "creating" => Ok(VmStatus::Pending),
            "running" | "ready" => Ok(VmStatus::Running),
            "error" | "failed" => Ok(VmStatus::Error),
            "terminated" | "stopped" | "deleted" => Ok(VmStatus::Terminated),
            other => Err(FleetError::Configuration(format!(
                "unknown instance status '{other}'"
            ))),
        }
    }
}

/// How to reach an instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Endpoint {
    /// Reachable over SSH.
    Ssh {
        user: Option<String>,
        host: String,
        port: u16,
    },
    /// Reachable only through a managed fleet service.
    Fleet { org: String, name: String },
}

impl Endpoint {
    /// Default SSH port.
    pub const DEFAULT_SSH_PORT: u16 = 22;

    /// SSH endpoint on the default port.
    pub fn ssh(user: Option<&str>, host: impl Into<String>) -> Self {
        Self::ssh_on(user, host, Self::DEFAULT_SSH_PORT)
    }

    /// SSH endpoint on an explicit port.
    pub fn ssh_on(user: Option<&str>, host: impl Into<String>, port: u16) -> Self {
        Endpoint::Ssh {
            user: user.map(str::to_string),
            host: host.into(),
            port,
        }
    }

    /// The `[user@]host` destination for SSH endpoints.
    pub fn destination(&self) -> Option<String> {
        match self {
            Endpoint::Ssh {
                user: Some(user),
                host,
                ..
            } => Some(format!("{user}@{host}")),
            Endpoint::Ssh { user: None, host, .. } => Some(host.clone()),
            Endpoint::Fleet { .. } => None,
        }
    }

    /// The SSH port, if this is an SSH endpoint.
    pub fn port(&self) -> Option<u16> {
        match self {
            Endpoint::Ssh { port, .. } => Some(*port),
            Endpoint::Fleet { .. } => None,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Ssh { user, host, port } => {
                f.write_str("ssh://")?;
                if let Some(user) = user {
                    write!(f, "{user}@")?;
                }
                f.write_str(host)?;
                if *port != Self::DEFAULT_SSH_PORT {
                    write!(f, ":{port}")?;
                }
                Ok(())
            }
            Endpoint::Fleet { org, name } => write!(f, "fleet://{org}/{name}"),
        }
    }
}

impl FromStr for Endpoint {
    type Err = FleetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || FleetError::Configuration(format!("invalid endpoint '{s}'"));

        if let Some(rest) = s.strip_prefix("fleet://") {
            let (org, name) = rest.split_once('/').ok_or_else(invalid)?;
            if org.is_empty() || name.is_empty() {
                return Err(invalid());
            }
            return Ok(Endpoint::Fleet {
                org: org.to_string(),
                name: name.to_string(),
            });
        }

        let rest = s.strip_prefix("ssh://").unwrap_or(s);
        let (user, host_port) = match rest.split_once('@') {
            Some((user, host_port)) => (Some(user), host_port),
            None => (None, rest),
        };
        let (host, port) = match host_port.rsplit_once(':') {
            Some((host, port)) => (host, port.parse().map_err(|_| invalid())?),
            None => (host_port, Self::DEFAULT_SSH_PORT),
        };
        if host.is_empty() || user.is_some_and(str::is_empty) {
            return Err(invalid());
        }

        Ok(Endpoint::ssh_on(user, host, port))
    }
}

/// A compute instance known to a provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vm {
    /// Provider-scoped identity.
    pub id: String,
    /// Human-facing name; follows the voyage naming convention.
    pub name: String,
    /// Connection endpoint.
    pub endpoint: Endpoint,
    /// Lifecycle status.
    pub status: VmStatus,
}

impl Vm {
    /// A running instance whose id equals its name.
    pub fn running(name: impl Into<String>, endpoint: Endpoint) -> Self {
        let name = name.into();
        Self {
            id: name.clone(),
            name,
            endpoint,
            status: VmStatus::Running,
        }
    }

    /// Returns true if the instance is running.
    pub fn is_running(&self) -> bool {
        self.status == VmStatus::Running
    }
}
