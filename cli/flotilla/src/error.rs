//! Error handling and display for the CLI.

use colored::Colorize;
use flotilla_provider::FleetError;
use flotilla_voyage::AGENT_TOKEN_ENV;
use thiserror::Error;

/// CLI-specific errors.
#[derive(Debug, Error)]
pub enum CliError {
    #[error("Refusing to sink every voyage without confirmation.")]
    NotConfirmed,

    #[error("Invalid voyage id: {0}")]
    InvalidVoyageId(#[from] flotilla_id::IdError),

    #[error("Failed to run `{program}`: exited with status {status}")]
    Subprocess { program: String, status: i32 },
}

/// Print an error in a user-friendly format.
pub fn print_error(err: &anyhow::Error) {
    eprintln!("{} {:#}", "Error:".red().bold(), err);

    if let Some(cli_err) = err.downcast_ref::<CliError>() {
        if let CliError::NotConfirmed = cli_err {
            eprintln!(
                "\n{}",
                "Hint: Pass --yes to confirm, or run it from a terminal.".yellow()
            );
        }
        return;
    }

    let Some(fleet_err) = err.downcast_ref::<FleetError>() else {
        return;
    };
    if let Some(hint) = hint(fleet_err) {
        eprintln!("\n{}", format!("Hint: {hint}").yellow());
    }
    if let FleetError::Provision {
        diagnostics: Some(diagnostics),
        ..
    } = fleet_err
    {
        eprintln!("\n{}", "Last output from the instance:".bold());
        eprintln!("{}", diagnostics.trim_end().dimmed());
    }
}

fn hint(err: &FleetError) -> Option<String> {
    match err {
        FleetError::Configuration(message) if message.contains(AGENT_TOKEN_ENV) => Some(format!(
            "Export {AGENT_TOKEN_ENV} with a long-lived agent token (`claude setup-token`)."
        )),
        FleetError::Configuration(message) if message.contains("overlay") => Some(
            "Set overlay.auth_key in the config file or export FLOTILLA_OVERLAY_AUTH_KEY."
                .to_string(),
        ),
        FleetError::Configuration(_) => Some(
            "Check the config file (see FLOTILLA_CONFIG) and FLOTILLA_* environment variables."
                .to_string(),
        ),
        FleetError::NotFound(_) => Some("Run `flotilla ls` to see running voyages.".to_string()),
        FleetError::Timeout(_) => Some(
            "Instances were slow to come up; raise readiness.timeout_secs and try again."
                .to_string(),
        ),
        FleetError::Api { status: 401, .. } | FleetError::Api { status: 403, .. } => Some(
            "The fleet service rejected the token; check fleet.token or FLOTILLA_FLEET_TOKEN."
                .to_string(),
        ),
        FleetError::Http(_) => {
            Some("Check your network connection and fleet.api_url.".to_string())
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_agent_token_hint_names_variable() {
        let err = FleetError::Configuration(format!("{AGENT_TOKEN_ENV} is not set"));
        assert!(hint(&err).unwrap().contains(AGENT_TOKEN_ENV));
    }

    #[test]
    fn test_unauthorized_api_hint() {
        let err = FleetError::Api {
            status: 401,
            message: "bad token".to_string(),
        };
        assert!(hint(&err).unwrap().contains("FLOTILLA_FLEET_TOKEN"));
    }

    #[test]
    fn test_cancellation_has_no_hint() {
        assert!(hint(&FleetError::Cancelled).is_none());
    }
}
