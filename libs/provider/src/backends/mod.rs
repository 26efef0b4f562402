//! Built-in provider backends.

mod fleet;
mod local;
mod remote_host;

pub use fleet::{
    exec_argv, FleetClient, FleetConnector, FleetProvider, FleetShell, InstanceRecord,
};
pub use local::{parse_listing, CliEngine, LocalProvider, Sandbox, SandboxEngine, SANDBOX_LABEL};
pub use remote_host::RemoteHostProvider;
