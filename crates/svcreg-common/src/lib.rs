//! # svcreg common
//!
//! Types shared by the registry server and its clients.
//!
//! This crate provides:
//! - The error taxonomy used across the workspace
//! - `ServiceName`, the logical identity of a service group
//! - The patch protocol: `Registration`, `PatchEntry` and `Patch`

pub mod errors;
pub mod protocol;
pub mod types;

pub use errors::{Error, Result, ResultExt};
pub use protocol::{Patch, PatchEntry, Registration};
pub use types::ServiceName;
