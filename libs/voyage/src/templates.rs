//! Text written onto instances: ship prompt, stop hook and agent wrapper.

use serde_json::json;

use crate::layout::STOP_HOOK;
use crate::voyage::Voyage;

const SHIP_PROMPT: &str = include_str!("../templates/ship_prompt.md");
const STOP_HOOK_SCRIPT: &str = include_str!("../templates/on_stop.sh");
const AGENT_WRAPPER_SCRIPT: &str = include_str!("../templates/run_agent.exp");

/// Render the prompt every ship appends to its system prompt.
pub fn render_ship_prompt(voyage: &Voyage) -> String {
    // The objective goes in last so braces inside it are left alone.
    SHIP_PROMPT
        .replace("{voyage_id}", &voyage.id.to_string())
        .replace("{repository}", &voyage.repository)
        .replace("{branch}", &voyage.branch)
        .replace("{ship_count}", &voyage.ship_count.to_string())
        .replace("{task_namespace_id}", &voyage.task_namespace_id)
        .replace("{prompt}", voyage.prompt.trim())
}

/// The agent stop hook.
pub fn stop_hook() -> &'static str {
    STOP_HOOK_SCRIPT
}

/// The expect wrapper that launches the agent.
pub fn agent_wrapper() -> &'static str {
    AGENT_WRAPPER_SCRIPT
}

/// Agent settings registering the stop hook.
pub fn agent_hook_settings() -> String {
    let settings = json!({
        "hooks": {
            "Stop": [
                {
                    "hooks": [
                        { "type": "command", "command": STOP_HOOK }
                    ]
                }
            ]
        }
    });
    // Serializing a literal `Value` cannot fail.
    serde_json::to_string_pretty(&settings).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use flotilla_id::VoyageId;

    use super::*;

    fn voyage(prompt: &str) -> Voyage {
        Voyage::with_id(
            VoyageId::from_bytes([1, 2, 3, 4, 5, 6]),
            prompt,
            "acme/widgets",
            4,
            chrono::Utc::now(),
        )
        .unwrap()
    }

    #[test]
    fn test_prompt_fills_every_placeholder() {
        let rendered = render_ship_prompt(&voyage("Port the parser to nom"));
        assert!(rendered.contains("# Voyage voyage-010203040506"));
        assert!(rendered.contains("You are one of 4 ships"));
        assert!(rendered.contains("`acme/widgets`"));
        assert!(rendered.contains("(`voyage-010203040506-tasks`)"));
        assert!(rendered.contains("Port the parser to nom"));
        assert!(rendered.contains("STEP 1."));
        assert!(!rendered.contains("{voyage_id}"));
        assert!(!rendered.contains("{branch}"));
    }

    #[test]
    fn test_prompt_braces_are_preserved() {
        let rendered = render_ship_prompt(&voyage("Replace {branch} markers in docs"));
        assert!(rendered.contains("Replace {branch} markers in docs"));
    }

    #[test]
    fn test_scripts_have_interpreters() {
        assert!(stop_hook().starts_with("#!/usr/bin/env bash"));
        assert!(agent_wrapper().starts_with("#!/usr/bin/expect"));
        assert!(agent_wrapper().contains("interact"));
    }

    #[test]
    fn test_agent_settings_register_stop_hook() {
        let settings: serde_json::Value = serde_json::from_str(&agent_hook_settings()).unwrap();
        assert_eq!(
            settings["hooks"]["Stop"][0]["hooks"][0]["command"],
            "~/voyage/on-stop.sh"
        );
    }
}
