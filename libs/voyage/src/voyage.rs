//! The voyage descriptor.

use chrono::{DateTime, SubsecRound, Utc};
use flotilla_id::VoyageId;
use flotilla_provider::{FleetError, Result};
use serde::{Deserialize, Serialize};

/// An immutable voyage definition.
///
/// Persisted as `~/voyage/voyage.json` on the storage instance, which is the
/// only durable copy. Credentials are never part of it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Voyage {
    pub id: VoyageId,
    /// The objective every ship works towards.
    pub prompt: String,
    /// GitHub repository as `owner/name`.
    pub repository: String,
    pub branch: String,
    pub task_namespace_id: String,
    pub ship_count: usize,
    pub created_at: DateTime<Utc>,
}

impl Voyage {
    /// A new voyage with a fresh identity.
    pub fn new(prompt: impl Into<String>, repository: &str, ship_count: usize) -> Result<Self> {
        Self::with_id(
            VoyageId::new(),
            prompt,
            repository,
            ship_count,
            Utc::now(),
        )
    }

    /// A voyage with an explicit identity and creation time.
    pub fn with_id(
        id: VoyageId,
        prompt: impl Into<String>,
        repository: &str,
        ship_count: usize,
        created_at: DateTime<Utc>,
    ) -> Result<Self> {
        validate_repository(repository)?;
        if ship_count == 0 {
            return Err(FleetError::Configuration(
                "a voyage needs at least one ship".to_string(),
            ));
        }

        Ok(Self {
            branch: id.branch(),
            task_namespace_id: id.task_namespace(),
            id,
            prompt: prompt.into(),
            repository: repository.to_string(),
            ship_count,
            // Whole microseconds keep the RFC 3339 text stable across reloads.
            created_at: created_at.trunc_subsecs(6),
        })
    }

    pub fn storage_name(&self) -> String {
        self.id.storage_name()
    }

    pub fn ship_name(&self, index: usize) -> String {
        self.id.ship_name(index)
    }

    /// Clone URL of the upstream repository.
    pub fn clone_url(&self) -> String {
        format!("https://github.com/{}.git", self.repository)
    }

    /// Pretty JSON for the persisted descriptor.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parse a persisted descriptor.
    pub fn from_json(data: &str) -> Result<Self> {
        Ok(serde_json::from_str(data)?)
    }
}

/// Accept only `owner/name` made of characters GitHub allows.
fn validate_repository(repository: &str) -> Result<()> {
    let valid_part = |s: &str| {
        !s.is_empty()
            && s != "."
            && s != ".."
            && s
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    };

    match repository.split_once('/') {
        Some((owner, name)) if valid_part(owner) && valid_part(name) => Ok(()),
        _ => Err(FleetError::Configuration(format!(
            "repository must be 'owner/name', got '{repository}'"
        ))),
    }
}
