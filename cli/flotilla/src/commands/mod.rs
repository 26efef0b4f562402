//! CLI commands.

mod attach;
mod ls;
mod providers;
mod sail;
mod status;
mod teardown;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use flotilla_id::VoyageId;
use flotilla_provider::{
    Backend, CancelSignal, LocalShell, ProviderContext, ProviderRegistry, RemoteShell,
    SessionTopology, SshKeyPair, Vm,
};
use flotilla_voyage::{Orchestrator, SessionLauncher};

use crate::config::Config;
use crate::error::CliError;
use crate::output::OutputFormat;

/// flotilla - launch fleets of coding agents on ephemeral instances.
#[derive(Debug, Parser)]
#[command(name = "flotilla")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Output format.
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Table)]
    format: OutputFormat,

    /// Provider backend (overrides the configured one).
    #[arg(long, global = true)]
    provider: Option<String>,

    /// Emit logs as JSON.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Launch a new voyage.
    Sail(sail::SailCommand),

    /// List voyage instances.
    Ls(ls::LsCommand),

    /// Show a voyage and its fleet.
    Status(status::StatusCommand),

    /// Attach to a voyage's session.
    Attach(attach::AttachCommand),

    /// Destroy a voyage's ships, keeping storage.
    Abandon(teardown::AbandonCommand),

    /// Destroy a voyage entirely (or every voyage with --all).
    Sink(teardown::SinkCommand),

    /// List available provider backends.
    Providers,

    /// Show CLI version.
    Version,
}

impl Cli {
    pub fn log_json(&self) -> bool {
        self.log_json
    }

    /// Run the CLI command.
    pub async fn run(self, cancel: CancelSignal) -> Result<()> {
        if let Commands::Version = self.command {
            println!("flotilla {}", env!("CARGO_PKG_VERSION"));
            return Ok(());
        }

        let config = Config::load()?;
        let ctx = CommandContext {
            config,
            format: self.format,
            provider: self.provider,
            registry: ProviderRegistry::builtin(),
            cancel,
        };

        match self.command {
            Commands::Sail(cmd) => cmd.run(ctx).await,
            Commands::Ls(cmd) => cmd.run(ctx).await,
            Commands::Status(cmd) => cmd.run(ctx).await,
            Commands::Attach(cmd) => cmd.run(ctx).await,
            Commands::Abandon(cmd) => cmd.run(ctx).await,
            Commands::Sink(cmd) => cmd.run(ctx).await,
            Commands::Providers => providers::run(ctx),
            Commands::Version => Ok(()),
        }
    }
}

/// Shared command context.
pub struct CommandContext {
    pub config: Config,
    pub format: OutputFormat,
    pub provider: Option<String>,
    pub registry: ProviderRegistry,
    pub cancel: CancelSignal,
}

/// A built backend with the orchestrator driving it.
pub struct Fleet {
    pub backend: Backend,
    pub keys: SshKeyPair,
    pub orchestrator: Orchestrator,
}

impl CommandContext {
    /// Backend name, preferring the flag over config.
    pub fn provider_name(&self) -> &str {
        self.provider
            .as_deref()
            .unwrap_or(&self.config.settings.provider)
    }

    /// Build the selected backend and an orchestrator over it.
    pub async fn fleet(&self) -> Result<Fleet> {
        let keys = SshKeyPair::load_or_generate(&self.config.key_dir)
            .await
            .context("Failed to prepare the orchestrator key pair")?;
        let provider_ctx = ProviderContext {
            settings: self.config.settings.clone(),
            keys: keys.clone(),
            cancel: self.cancel.clone(),
        };
        let backend = self.registry.build(self.provider_name(), &provider_ctx)?;
        let orchestrator =
            Orchestrator::new(&backend, keys.clone(), self.config.settings.agent.clone());
        Ok(Fleet {
            backend,
            keys,
            orchestrator,
        })
    }

    /// The session launcher for a voyage whose storage is `storage`.
    pub fn session_launcher(&self, fleet: &Fleet, storage: Vm) -> Result<SessionLauncher> {
        let settings = &self.config.settings;
        let host: Arc<dyn RemoteShell> = match settings.session.topology {
            SessionTopology::Hub => fleet.backend.connector.connect(&storage)?,
            SessionTopology::Direct => Arc::new(LocalShell),
        };
        Ok(
            SessionLauncher::new(settings.session.topology, storage, host)
                .with_agent_command(&settings.agent.command)
                .with_fleet_cli(&settings.fleet.cli)
                .with_identity(&fleet.keys.private_key_path),
        )
    }
}

/// Parse a voyage id argument.
pub fn parse_voyage_id(s: &str) -> Result<VoyageId> {
    Ok(VoyageId::parse(s).map_err(CliError::from)?)
}
