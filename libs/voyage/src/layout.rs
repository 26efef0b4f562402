//! Remote filesystem layout shared by storage and ships.
//!
//! Paths start with `~` and are interpolated into shell commands unquoted so
//! the remote shell expands them. Components that are not constants are
//! quoted.

use flotilla_provider::quote;

/// Root of a voyage on every instance.
pub const VOYAGE_DIR: &str = "~/voyage";
pub const WORKSPACE_DIR: &str = "~/voyage/workspace";
pub const ARTIFACTS_DIR: &str = "~/voyage/artifacts";
pub const LOGS_DIR: &str = "~/voyage/logs";

/// Persisted voyage descriptor (storage only).
pub const DESCRIPTOR: &str = "~/voyage/voyage.json";
/// Rendered ship prompt.
pub const PROMPT: &str = "~/voyage/prompt.md";
/// Agent stop hook.
pub const STOP_HOOK: &str = "~/voyage/on-stop.sh";

/// Per-instance tool directory.
pub const TOOL_DIR: &str = "~/.flotilla";
/// Expect wrapper that launches the agent.
pub const AGENT_WRAPPER: &str = "~/.flotilla/run-agent.exp";

/// The workspace path relative to `$HOME`, as used in clone URLs.
pub const WORKSPACE_FROM_HOME: &str = "voyage/workspace";

/// Task directory for `namespace` under the agent's config directory.
pub fn task_dir(agent_config_dir: &str, namespace: &str) -> String {
    format!("~/{agent_config_dir}/tasks/{namespace}")
}

/// Agent settings file under its config directory.
pub fn agent_settings(agent_config_dir: &str) -> String {
    format!("~/{agent_config_dir}/settings.json")
}

/// Log file of the session window `window`, ready for a shell command.
pub fn window_log(window: &str) -> String {
    format!("{LOGS_DIR}/{}", quote(&format!("{window}.log")))
}
