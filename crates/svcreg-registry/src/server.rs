//! Service registry server.
//!
//! Wires the store, the delivery dispatcher, the heartbeat monitor and the
//! HTTP router together and runs them on one TCP listener.

use crate::api::create_router;
use crate::config::RegistryConfig;
use crate::delivery::{Dispatcher, PatchSender};
use crate::heartbeat::{HeartbeatMonitor, LivenessProbe};
use crate::storage::RegistrationStore;
use crate::transport::HttpTransport;
use anyhow::{Context, Result};
use axum::Router;
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

/// Service registry server.
pub struct RegistryServer {
    store: Arc<RegistrationStore>,
    monitor: HeartbeatMonitor,
    router: Router,
    config: RegistryConfig,
}

impl RegistryServer {
    /// Creates a server that talks HTTP to registered instances.
    pub fn new(config: RegistryConfig) -> Self {
        let transport = Arc::new(HttpTransport::new());
        Self::with_transport(config, transport.clone(), transport)
    }

    /// Creates a server with custom patch delivery and liveness probing.
    pub fn with_transport(
        config: RegistryConfig,
        sender: Arc<dyn PatchSender>,
        probe: Arc<dyn LivenessProbe>,
    ) -> Self {
        let dispatcher = Dispatcher::new(sender, &config.delivery);
        let store = Arc::new(RegistrationStore::new(dispatcher, config.duplicate_policy));
        let monitor = HeartbeatMonitor::new(Arc::clone(&store), probe, config.heartbeat.clone());
        let router = create_router(Arc::clone(&store));

        Self {
            store,
            monitor,
            router,
            config,
        }
    }

    /// Returns a reference to the registration store.
    pub fn store(&self) -> &Arc<RegistrationStore> {
        &self.store
    }

    /// Binds the configured address and serves until `shutdown` resolves.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = self.config.server.bind_address();
        info!("Binding to TCP: {}", addr);

        let listener = TcpListener::bind(&addr)
            .await
            .with_context(|| format!("Failed to bind {}", addr))?;

        self.serve(listener, shutdown).await
    }

    /// Serves on an already bound listener until `shutdown` resolves.
    ///
    /// The heartbeat monitor runs for exactly as long as the listener.
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let local_addr = listener.local_addr()?;
        info!("Registry listening on {}", local_addr);

        self.monitor.start();
        let served = axum::serve(listener, self.router)
            .with_graceful_shutdown(shutdown)
            .await;
        self.monitor.stop();

        info!(
            registrations = self.store.len(),
            "Registry on {} stopped", local_addr
        );
        served.context("HTTP server failed")
    }
}
