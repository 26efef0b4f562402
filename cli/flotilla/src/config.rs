//! Configuration loading.
//!
//! Settings come from a TOML file (`$FLOTILLA_CONFIG`, or `config.toml` in
//! the platform config directory) with environment overrides applied on top.
//! The orchestrator key pair lives next to the config file.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use directories::ProjectDirs;
use flotilla_provider::Settings;

/// Configuration file name.
const CONFIG_FILE: &str = "config.toml";

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV: &str = "FLOTILLA_CONFIG";

/// Get the config directory path.
fn config_dir() -> Result<PathBuf> {
    ProjectDirs::from("dev", "flotilla", "flotilla")
        .map(|dirs| dirs.config_dir().to_path_buf())
        .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))
}

/// Loaded configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub settings: Settings,
    /// Directory holding the orchestrator key pair.
    pub key_dir: PathBuf,
}

impl Config {
    /// Load from the default location and the process environment.
    pub fn load() -> Result<Self> {
        let path = match std::env::var_os(CONFIG_ENV) {
            Some(path) => PathBuf::from(path),
            None => config_dir()?.join(CONFIG_FILE),
        };
        Self::load_from(&path, |key| std::env::var(key).ok())
    }

    /// Load from `path` (a missing file means defaults) and apply `lookup`
    /// overrides.
    pub fn load_from<F>(path: &Path, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut settings = if path.exists() {
            let contents = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config from {}", path.display()))?;
            toml::from_str(&contents)
                .with_context(|| format!("Failed to parse config from {}", path.display()))?
        } else {
            Settings::default()
        };

        settings
            .apply_env(lookup)
            .context("Invalid environment override")?;

        let key_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        Ok(Self { settings, key_dir })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use flotilla_provider::SessionTopology;
    use tempfile::TempDir;

    use super::*;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let config = Config::load_from(&dir.path().join("config.toml"), no_env).unwrap();
        assert_eq!(config.settings, Settings::default());
        assert_eq!(config.key_dir, dir.path());
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            r#"
provider = "fleet"
ships = 5

[fleet]
org = "acme"

[session]
topology = "direct"
"#,
        )
        .unwrap();

        let settings = Config::load_from(&path, no_env).unwrap().settings;
        assert_eq!(settings.provider, "fleet");
        assert_eq!(settings.ships, 5);
        assert_eq!(settings.fleet.org.as_deref(), Some("acme"));
        assert_eq!(settings.fleet.api_url, "https://api.sprites.dev");
        assert_eq!(settings.session.topology, SessionTopology::Direct);
        assert_eq!(settings.local.image, "ubuntu:22.04");
    }

    #[test]
    fn test_environment_overrides_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "provider = \"fleet\"\n").unwrap();

        let env: HashMap<&str, &str> = [
            ("FLOTILLA_PROVIDER", "remote-host"),
            ("FLOTILLA_OVERLAY_AUTH_KEY", "tskey-client-abc"),
        ]
        .into_iter()
        .collect();
        let settings = Config::load_from(&path, |k| env.get(k).map(|v| v.to_string()))
            .unwrap()
            .settings;

        assert_eq!(settings.provider, "remote-host");
        assert_eq!(settings.overlay.auth_key.as_deref(), Some("tskey-client-abc"));
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "ships = \"many\"\n").unwrap();

        let err = Config::load_from(&path, no_env).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config"));
    }
}
