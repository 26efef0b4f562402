//! Error taxonomy shared by providers and the orchestrator.

use thiserror::Error;

/// Result alias used throughout the provider and voyage crates.
pub type Result<T, E = FleetError> = std::result::Result<T, E>;

/// Fleet errors with standardized reason codes.
#[derive(Debug, Error)]
pub enum FleetError {
    /// Instance creation or bootstrap failed (possibly after cleanup).
    #[error("provision failed: {message}")]
    Provision {
        message: String,
        /// Tail of captured command output, if any.
        diagnostics: Option<String>,
    },

    /// A readiness probe never succeeded within its bound.
    #[error("timed out: {0}")]
    Timeout(String),

    /// A required credential or setting is missing or invalid.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The referenced voyage or instance does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The operator interrupted the operation.
    #[error("cancelled by operator")]
    Cancelled,

    /// A remote command exited non-zero.
    #[error("command `{command}` exited with status {status}: {output}")]
    Command {
        command: String,
        status: i32,
        output: String,
    },

    /// A backend API answered with an error status.
    #[error("api error ({status}): {message}")]
    Api { status: u16, message: String },

    /// IO error (spawning local processes).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP transport error.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Malformed JSON from a backend or a persisted descriptor.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl FleetError {
    /// Build a provision error without diagnostics.
    pub fn provision(message: impl Into<String>) -> Self {
        Self::Provision {
            message: message.into(),
            diagnostics: None,
        }
    }

    /// Build a provision error carrying captured output.
    pub fn provision_with(message: impl Into<String>, diagnostics: impl Into<String>) -> Self {
        Self::Provision {
            message: message.into(),
            diagnostics: Some(diagnostics.into()),
        }
    }

    /// Get the standardized reason code for this error.
    pub fn reason_code(&self) -> &'static str {
        match self {
            FleetError::Provision { .. } => "provision_failed",
            FleetError::Timeout(_) => "timeout",
            FleetError::Configuration(_) => "configuration",
            FleetError::NotFound(_) => "not_found",
            FleetError::Cancelled => "cancelled",
            FleetError::Command { .. } => "command_failed",
            FleetError::Api { .. } => "api_error",
            FleetError::Io(_) => "io_error",
            FleetError::Http(_) => "http_error",
            FleetError::Json(_) => "json_error",
        }
    }

    /// Returns true if the operator interrupted the operation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, FleetError::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_codes() {
        assert_eq!(FleetError::provision("x").reason_code(), "provision_failed");
        assert_eq!(FleetError::Cancelled.reason_code(), "cancelled");
        assert_eq!(
            FleetError::NotFound("voyage-x".into()).reason_code(),
            "not_found"
        );
    }

    #[test]
    fn test_provision_with_keeps_diagnostics() {
        let err = FleetError::provision_with("overlay join failed", "Logged out.");
        match err {
            FleetError::Provision { diagnostics, .. } => {
                assert_eq!(diagnostics.as_deref(), Some("Logged out."));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
