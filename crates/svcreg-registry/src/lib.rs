//! # svcreg registry
//!
//! Service registry with liveness monitoring and dependency-aware change
//! propagation.
//!
//! This crate provides:
//! - In-memory registration storage behind an explicit handle
//! - Per-dependent patch fan-out with FIFO delivery per update URL
//! - A heartbeat monitor that evicts and re-admits instances
//! - HTTP API for registering and deregistering instances
//! - Standalone server executable (`svcreg`)

pub mod api;
pub mod config;
pub mod delivery;
pub mod fanout;
pub mod heartbeat;
pub mod server;
pub mod storage;
pub mod transport;

// Re-export commonly used items
pub use config::{DuplicatePolicy, RegistryConfig};
pub use delivery::{Dispatcher, FanoutReport, FanoutRound, PatchSender};
pub use heartbeat::{CycleReport, HeartbeatMonitor, LivenessProbe, ProbeResult};
pub use server::RegistryServer;
pub use storage::RegistrationStore;
pub use transport::HttpTransport;
