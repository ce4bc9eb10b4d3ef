//! # svcreg client
//!
//! Everything a service instance needs to take part in the registry.
//!
//! This crate provides:
//! - `RegistryClient`: register and deregister against `/services`
//! - `ProviderCache`: per-instance view of the providers it depends on,
//!   fed by registry patches, with uniform random selection
//! - `ServiceHost`: serve the heartbeat and update endpoints next to the
//!   business routes, register on start and deregister on shutdown

pub mod providers;
pub mod registry_client;
pub mod service;

// Re-export commonly used items
pub use providers::ProviderCache;
pub use registry_client::RegistryClient;
pub use service::{instance_router, RunningService, ServiceHost};
