//! # flotilla-id
//!
//! Voyage identifiers and the instance naming convention.
//!
//! ## ID Format
//!
//! A voyage ID is `voyage-{12 lowercase hex chars}` (48 random bits):
//!
//! - `voyage-3f9a0c11b2de`
//!
//! Every instance that belongs to a voyage is named after it:
//!
//! - storage: `{voyage_id}-storage`
//! - ship `i`: `{voyage_id}-ship{i}`
//!
//! No separator precedes the trailing ship index: some hosting gateways
//! reject names with a hyphen before a trailing number.
//! Providers filter by name prefix, so these strings are load-bearing.

mod error;
mod naming;
mod types;

pub use error::IdError;
pub use naming::{window_name, SHIP_MARKER, STORAGE_SUFFIX};
pub use types::VoyageId;
