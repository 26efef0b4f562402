//! Instance providers for flotilla.
//!
//! This crate owns everything about a single compute instance:
//!
//! - [`Provider`]: the five lifecycle operations every backend implements
//! - [`ProviderRegistry`]: backend name to constructor, built once at startup
//! - [`RemoteShell`] / [`Connector`]: how commands reach an instance
//! - [`bootstrap`]: the one-shot setup script run on fresh instances
//! - [`poll_until_ready`] and [`CancelSignal`]: bounded, cancellable waits
//!
//! Backends live in [`backends`]; in-memory doubles for tests live in
//! [`mock`].

pub mod backends;
pub mod bootstrap;
mod cancel;
mod cleanup;
mod error;
pub mod mock;
mod poll;
mod provider;
mod settings;
mod shell;
mod ssh;
mod vm;

pub use cancel::{cancellation, CancelHandle, CancelSignal};
pub use cleanup::with_cleanup;
pub use error::{FleetError, Result};
pub use poll::{poll_until_ready, Probe, DEFAULT_READY_INTERVAL, DEFAULT_READY_TIMEOUT};
pub use provider::{
    wait_for_shell, Backend, Constructor, Provider, ProviderContext, ProviderRegistry,
};
pub use settings::{
    AgentSettings, FleetSettings, LocalSettings, OverlaySettings, ReadinessSettings,
    RemoteHostSettings, SessionSettings, SessionTopology, Settings,
};
pub use shell::{
    quote, tail, write_file_command, CommandOutput, Connector, LocalShell, RemoteShell,
    DIAGNOSTIC_TAIL,
};
pub use ssh::{
    command_line, interactive_args, SshConnector, SshKeyPair, SshOptions, SshShell,
    BOOTSTRAP_SSH_PORT,
};
pub use vm::{Endpoint, Vm, VmStatus};
