//! Provider and orchestration settings.
//!
//! Every field has a default so a partial (or absent) config file is valid.
//! The CLI loads these from TOML and then applies environment overrides.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{FleetError, Result};
use crate::poll::{DEFAULT_READY_INTERVAL, DEFAULT_READY_TIMEOUT};

/// Top-level settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Backend used when the operator does not name one.
    pub provider: String,
    /// Default number of ships per voyage.
    pub ships: usize,
    pub overlay: OverlaySettings,
    pub local: LocalSettings,
    pub remote_host: RemoteHostSettings,
    pub fleet: FleetSettings,
    pub agent: AgentSettings,
    pub session: SessionSettings,
    pub readiness: ReadinessSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            provider: "local".to_string(),
            ships: 3,
            overlay: OverlaySettings::default(),
            local: LocalSettings::default(),
            remote_host: RemoteHostSettings::default(),
            fleet: FleetSettings::default(),
            agent: AgentSettings::default(),
            session: SessionSettings::default(),
            readiness: ReadinessSettings::default(),
        }
    }
}

impl Settings {
    /// Apply overrides from environment-style lookups.
    ///
    /// `lookup` is usually `std::env::var(..).ok()`; tests pass a map.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(provider) = lookup("FLOTILLA_PROVIDER") {
            self.provider = provider;
        }
        if let Some(ships) = lookup("FLOTILLA_SHIPS") {
            self.ships = ships.parse().map_err(|_| {
                FleetError::Configuration(format!("FLOTILLA_SHIPS must be a number, got '{ships}'"))
            })?;
        }
        if let Some(key) = lookup("FLOTILLA_OVERLAY_AUTH_KEY") {
            self.overlay.auth_key = Some(key);
        }
        if let Some(token) = lookup("FLOTILLA_FLEET_TOKEN") {
            self.fleet.token = Some(token);
        }
        if let Some(org) = lookup("FLOTILLA_FLEET_ORG") {
            self.fleet.org = Some(org);
        }
        if let Some(topology) = lookup("FLOTILLA_SESSION_TOPOLOGY") {
            self.session.topology = topology.parse()?;
        }
        Ok(())
    }
}

/// Overlay network join settings.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlaySettings {
    /// OAuth client secret or auth key used to join.
    pub auth_key: Option<String>,
    /// Tag advertised by ships.
    pub ship_tag: String,
}

impl Default for OverlaySettings {
    fn default() -> Self {
        Self {
            auth_key: None,
            ship_tag: "tag:flotilla-ship".to_string(),
        }
    }
}

impl std::fmt::Debug for OverlaySettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OverlaySettings")
            .field("auth_key", &self.auth_key.as_ref().map(|_| "<redacted>"))
            .field("ship_tag", &self.ship_tag)
            .finish()
    }
}

/// Local sandbox engine settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalSettings {
    /// Docker-compatible engine binary.
    pub engine: String,
    /// Base image for sandboxes.
    pub image: String,
    /// Disk size in gigabytes.
    pub disk_gb: u32,
    /// Extra arguments passed to `run` (e.g. `--runtime=runsc`).
    pub run_args: Vec<String>,
}

impl Default for LocalSettings {
    fn default() -> Self {
        Self {
            engine: "docker".to_string(),
            image: "ubuntu:22.04".to_string(),
            disk_gb: 10,
            run_args: Vec::new(),
        }
    }
}

/// SSH hosting gateway settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteHostSettings {
    /// Gateway destination every command is sent to.
    pub gateway: String,
}

impl Default for RemoteHostSettings {
    fn default() -> Self {
        Self {
            gateway: "exe.dev".to_string(),
        }
    }
}

/// Managed fleet service settings.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FleetSettings {
    /// Base URL of the service API.
    pub api_url: String,
    /// Organization instances are created in.
    pub org: Option<String>,
    /// Bearer token.
    pub token: Option<String>,
    /// Service CLI used for interactive sessions.
    pub cli: String,
}

impl Default for FleetSettings {
    fn default() -> Self {
        Self {
            api_url: "https://api.sprites.dev".to_string(),
            org: None,
            token: None,
            cli: "sprite".to_string(),
        }
    }
}

impl std::fmt::Debug for FleetSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FleetSettings")
            .field("api_url", &self.api_url)
            .field("org", &self.org)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("cli", &self.cli)
            .finish()
    }
}

/// Agent runtime settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentSettings {
    /// Agent executable.
    pub command: String,
    /// Installer fetched with `curl | bash`.
    pub install_url: String,
    /// Agent config directory under `$HOME`.
    pub config_dir: String,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            command: "claude".to_string(),
            install_url: "https://claude.ai/install.sh".to_string(),
            config_dir: ".claude".to_string(),
        }
    }
}

/// Where the fleet's tmux session runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionTopology {
    /// On the storage instance; windows hop to ships from there.
    #[default]
    Hub,
    /// On the operator's machine; windows connect out directly.
    Direct,
}

impl std::str::FromStr for SessionTopology {
    type Err = FleetError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "hub" => Ok(SessionTopology::Hub),
            "direct" => Ok(SessionTopology::Direct),
            other => Err(FleetError::Configuration(format!(
                "unknown session topology '{other}' (expected hub or direct)"
            ))),
        }
    }
}

/// Session launcher settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    pub topology: SessionTopology,
}

/// Readiness wait bounds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadinessSettings {
    pub timeout_secs: u64,
    pub interval_secs: u64,
}

impl Default for ReadinessSettings {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_READY_TIMEOUT.as_secs(),
            interval_secs: DEFAULT_READY_INTERVAL.as_secs(),
        }
    }
}

impl ReadinessSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.provider, "local");
        assert_eq!(settings.overlay.ship_tag, "tag:flotilla-ship");
        assert_eq!(settings.local.image, "ubuntu:22.04");
        assert_eq!(settings.readiness.timeout(), Duration::from_secs(300));
        assert_eq!(settings.session.topology, SessionTopology::Hub);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let settings: Settings =
            serde_json::from_str(r#"{"provider":"fleet","fleet":{"org":"acme"}}"#).unwrap();
        assert_eq!(settings.provider, "fleet");
        assert_eq!(settings.fleet.org.as_deref(), Some("acme"));
        assert_eq!(settings.fleet.cli, "sprite");
        assert_eq!(settings.ships, 3);
    }

    #[test]
    fn test_env_overrides() {
        let mut settings = Settings::default();
        settings
            .apply_env(env(&[
                ("FLOTILLA_PROVIDER", "remote-host"),
                ("FLOTILLA_SHIPS", "5"),
                ("FLOTILLA_OVERLAY_AUTH_KEY", "tskey-abc"),
                ("FLOTILLA_SESSION_TOPOLOGY", "direct"),
            ]))
            .unwrap();

        assert_eq!(settings.provider, "remote-host");
        assert_eq!(settings.ships, 5);
        assert_eq!(settings.overlay.auth_key.as_deref(), Some("tskey-abc"));
        assert_eq!(settings.session.topology, SessionTopology::Direct);
    }

    #[test]
    fn test_env_override_rejects_bad_values() {
        let mut settings = Settings::default();
        assert!(settings.apply_env(env(&[("FLOTILLA_SHIPS", "many")])).is_err());
        assert!(settings
            .apply_env(env(&[("FLOTILLA_SESSION_TOPOLOGY", "mesh")]))
            .is_err());
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let mut settings = Settings::default();
        settings.overlay.auth_key = Some("tskey-secret".into());
        settings.fleet.token = Some("fleet-secret".into());
        let debug = format!("{settings:?}");
        assert!(!debug.contains("tskey-secret"));
        assert!(!debug.contains("fleet-secret"));
    }
}
