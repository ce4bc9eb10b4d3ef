//! Shared harness for registry integration tests.

#![allow(dead_code)]

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use svcreg_client::{RegistryClient, RunningService, ServiceHost};
use svcreg_registry::config::HeartbeatConfig;
use svcreg_registry::{RegistrationStore, RegistryConfig, RegistryServer};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// A registry serving on an ephemeral local port.
pub struct TestRegistry {
    pub url: String,
    pub store: Arc<RegistrationStore>,
    stop_tx: Option<oneshot::Sender<()>>,
    handle: JoinHandle<anyhow::Result<()>>,
}

impl TestRegistry {
    pub async fn start(config: RegistryConfig) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());

        let server = RegistryServer::new(config);
        let store = Arc::clone(server.store());
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(server.serve(listener, async {
            let _ = stop_rx.await;
        }));

        Self {
            url,
            store,
            stop_tx: Some(stop_tx),
            handle,
        }
    }

    /// Registry whose heartbeat monitor effectively never fires.
    pub async fn without_heartbeats() -> Self {
        let mut config = RegistryConfig::default();
        config.heartbeat.interval = Duration::from_secs(3600);
        Self::start(config).await
    }

    /// Registry probing every 100ms with a 200ms retry delay.
    pub async fn with_fast_heartbeats() -> Self {
        let config = RegistryConfig {
            heartbeat: fast_heartbeats(),
            ..Default::default()
        };
        Self::start(config).await
    }

    pub fn client(&self) -> RegistryClient {
        RegistryClient::new(self.url.clone())
    }

    pub async fn stop(mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        let _ = tokio::time::timeout(Duration::from_secs(5), self.handle).await;
    }
}

pub fn fast_heartbeats() -> HeartbeatConfig {
    HeartbeatConfig {
        interval: Duration::from_millis(100),
        attempts: 3,
        retry_delay: Duration::from_millis(200),
        probe_timeout: Duration::from_millis(500),
    }
}

/// Starts a service host on an ephemeral local port.
pub async fn start_service(host: ServiceHost) -> RunningService {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    host.start(listener).await.unwrap()
}

/// Polls `condition` every 10ms until it holds or `within` elapses.
pub async fn wait_for<F, Fut>(what: &str, within: Duration, mut condition: F) -> Result<(), String>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + within;
    loop {
        if condition().await {
            return Ok(());
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(format!("timed out after {:?} waiting for {}", within, what));
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
