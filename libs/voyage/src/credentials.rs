//! Operator credentials forwarded to instances.

use flotilla_provider::{FleetError, Result};

/// Environment variable holding the agent's OAuth token.
pub const AGENT_TOKEN_ENV: &str = "CLAUDE_CODE_OAUTH_TOKEN";

/// Environment variable holding the source-control token.
pub const SOURCE_CONTROL_TOKEN_ENV: &str = "GH_TOKEN";

/// Environment variable the agent reads its shared task namespace from.
pub const TASK_NAMESPACE_ENV: &str = "CLAUDE_CODE_TASK_LIST_ID";

/// Tokens for the agent (required) and source control (optional).
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub agent_token: String,
    pub source_control_token: Option<String>,
}

impl Credentials {
    pub fn new(agent_token: impl Into<String>, source_control_token: Option<String>) -> Self {
        Self {
            agent_token: agent_token.into(),
            source_control_token,
        }
    }

    /// Load from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load through `lookup`; empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let agent_token = get(AGENT_TOKEN_ENV).ok_or_else(|| {
            FleetError::Configuration(format!("{AGENT_TOKEN_ENV} is not set"))
        })?;

        Ok(Self {
            agent_token,
            source_control_token: get(SOURCE_CONTROL_TOKEN_ENV),
        })
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("agent_token", &"<redacted>")
            .field(
                "source_control_token",
                &self.source_control_token.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_token_required() {
        let err = Credentials::from_lookup(|_| None).unwrap_err();
        match err {
            FleetError::Configuration(msg) => assert!(msg.contains(AGENT_TOKEN_ENV)),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_source_control_token_optional() {
        let creds = Credentials::from_lookup(|key| match key {
            AGENT_TOKEN_ENV => Some("sk-ant-oat01-abc".to_string()),
            SOURCE_CONTROL_TOKEN_ENV => Some("  ".to_string()),
            _ => None,
        })
        .unwrap();
        assert_eq!(creds.agent_token, "sk-ant-oat01-abc");
        assert_eq!(creds.source_control_token, None);
    }

    #[test]
    fn test_debug_redacts_tokens() {
        let creds = Credentials::new("sk-ant-oat01-abc", Some("ghp_secret".to_string()));
        let debug = format!("{creds:?}");
        assert!(!debug.contains("sk-ant"));
        assert!(!debug.contains("ghp_"));
    }
}
