//! Voyages: one storage instance and a fleet of ships working one objective.
//!
//! [`Orchestrator::sail`] provisions and initializes storage, then brings up
//! ships one at a time, tolerating individual ship failures.
//! [`SessionLauncher`] opens the tmux session the operator watches the
//! fleet through.

mod credentials;
pub mod layout;
mod orchestrator;
mod session;
mod ship;
pub mod templates;
mod voyage;

pub use credentials::{Credentials, AGENT_TOKEN_ENV, SOURCE_CONTROL_TOKEN_ENV, TASK_NAMESPACE_ENV};
pub use orchestrator::{Orchestrator, Sailed, ShipFailure};
pub use session::{inner_command, SessionLauncher, LINGER_SECS};
pub use ship::peer_destination;
pub use voyage::Voyage;
