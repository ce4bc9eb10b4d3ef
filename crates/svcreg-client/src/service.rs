//! Service host: runs one registered instance.
//!
//! Startup order matters. The listener is bound and serving before the
//! instance registers, because registering triggers the priming patch POST
//! back to the instance. Shutdown runs the other way round: deregister
//! first so dependents hear about the departure, then stop serving.

use crate::providers::ProviderCache;
use crate::registry_client::RegistryClient;
use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    routing::{get, post, MethodRouter},
    Router,
};
use hyper::Uri;
use std::net::SocketAddr;
use std::sync::Arc;
use svcreg_common::{Error, Patch, Registration, Result, ResultExt, ServiceName};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Builds the routes every registered instance serves: `GET` on the
/// heartbeat path and `POST` of a JSON patch on the update path.
pub fn instance_router(registration: &Registration, providers: Arc<ProviderCache>) -> Result<Router> {
    let heartbeat_path = url_path(&registration.heartbeat_url)?;
    let update_path = url_path(&registration.service_update_url)?;

    let router = if heartbeat_path == update_path {
        Router::new().route(&heartbeat_path, get(heartbeat_handler).post(update_handler))
    } else {
        Router::new()
            .route(&heartbeat_path, get(heartbeat_handler))
            .route(&update_path, post(update_handler))
    };

    Ok(router.with_state(providers))
}

fn url_path(url: &str) -> Result<String> {
    let uri: Uri = url
        .parse()
        .map_err(|e| Error::validation(format!("invalid URL {}: {}", url, e)))?;
    Ok(match uri.path() {
        "" => "/".to_string(),
        path => path.to_string(),
    })
}

async fn heartbeat_handler() -> StatusCode {
    StatusCode::OK
}

async fn update_handler(State(providers): State<Arc<ProviderCache>>, body: Bytes) -> StatusCode {
    match serde_json::from_slice::<Patch>(&body) {
        Ok(patch) => {
            debug!(?patch, "Update received");
            providers.update(&patch);
            StatusCode::OK
        }
        Err(e) => {
            warn!("Malformed patch: {}", e);
            StatusCode::BAD_REQUEST
        }
    }
}

/// Describes one instance to be started.
pub struct ServiceHost {
    name: ServiceName,
    registry: RegistryClient,
    required_services: Vec<ServiceName>,
    heartbeat_path: String,
    update_path: String,
    advertised_host: Option<String>,
    routes: Vec<(String, MethodRouter)>,
}

impl ServiceHost {
    pub fn new(name: impl Into<ServiceName>, registry: RegistryClient) -> Self {
        Self {
            name: name.into(),
            registry,
            required_services: Vec::new(),
            heartbeat_path: "/heartbeat".to_string(),
            update_path: "/services".to_string(),
            advertised_host: None,
            routes: Vec::new(),
        }
    }

    /// Declares a dependency on `name`.
    pub fn requires(mut self, name: impl Into<ServiceName>) -> Self {
        self.required_services.push(name.into());
        self
    }

    pub fn heartbeat_path(mut self, path: impl Into<String>) -> Self {
        self.heartbeat_path = path.into();
        self
    }

    pub fn update_path(mut self, path: impl Into<String>) -> Self {
        self.update_path = path.into();
        self
    }

    /// Host put into the advertised URLs instead of the bound IP.
    pub fn advertised_host(mut self, host: impl Into<String>) -> Self {
        self.advertised_host = Some(host.into());
        self
    }

    /// Adds a business route served next to the instance routes.
    ///
    /// `path` must differ from the heartbeat and update paths and from every
    /// other business route; `start` fails otherwise.
    pub fn route(mut self, path: impl Into<String>, handler: MethodRouter) -> Self {
        self.routes.push((path.into(), handler));
        self
    }

    fn business_router(&self) -> Result<Router> {
        let mut router = Router::new();
        for (index, (path, handler)) in self.routes.iter().enumerate() {
            if *path == self.heartbeat_path || *path == self.update_path {
                return Err(Error::validation(format!(
                    "route {} collides with the instance routes",
                    path
                )));
            }
            if self.routes[..index].iter().any(|(seen, _)| seen == path) {
                return Err(Error::validation(format!("route {} is defined twice", path)));
            }
            router = router.route(path, handler.clone());
        }
        Ok(router)
    }

    /// The registration this host would send when bound to `addr`.
    pub fn registration_for(&self, addr: SocketAddr) -> Registration {
        let host = match &self.advertised_host {
            Some(host) => host.clone(),
            None if addr.ip().is_unspecified() => "127.0.0.1".to_string(),
            None => addr.ip().to_string(),
        };
        let service_url = format!("http://{}:{}", host, addr.port());

        Registration {
            service_name: self.name.clone(),
            heartbeat_url: format!("{}{}", service_url, self.heartbeat_path),
            service_update_url: format!("{}{}", service_url, self.update_path),
            required_services: self.required_services.clone(),
            service_url,
        }
    }

    /// Serves on `listener` and registers with the registry.
    ///
    /// Returns once the registry has accepted the registration and primed
    /// the provider cache. On registration failure the listener is stopped.
    pub async fn start(self, listener: TcpListener) -> Result<RunningService> {
        let addr = listener.local_addr()?;
        let registration = self.registration_for(addr);
        let providers = Arc::new(ProviderCache::new());
        let instance_routes = instance_router(&registration, Arc::clone(&providers))
            .context(format!("routes for {}", registration.service_name))?;
        let router = self.business_router()?.merge(instance_routes);

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let server = tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
        });
        info!(service = %registration.service_name, "Listening on {}", addr);

        let mut running = RunningService {
            registration,
            providers,
            registry: self.registry,
            shutdown_tx: Some(shutdown_tx),
            server: Some(server),
        };

        if let Err(e) = running.registry.register(&running.registration).await {
            error!(
                service = %running.registration.service_name,
                "Registration failed: {}", e
            );
            running.stop_serving().await;
            return Err(e);
        }

        info!(
            service = %running.registration.service_name,
            url = %running.registration.service_url,
            "Service registered"
        );
        Ok(running)
    }
}

/// A started, registered instance.
pub struct RunningService {
    registration: Registration,
    providers: Arc<ProviderCache>,
    registry: RegistryClient,
    shutdown_tx: Option<oneshot::Sender<()>>,
    server: Option<JoinHandle<std::io::Result<()>>>,
}

impl RunningService {
    pub fn registration(&self) -> &Registration {
        &self.registration
    }

    pub fn service_url(&self) -> &str {
        &self.registration.service_url
    }

    /// This instance's view of its providers.
    pub fn providers(&self) -> &Arc<ProviderCache> {
        &self.providers
    }

    /// Deregisters, then stops serving. The listener is stopped even when
    /// deregistration fails; the deregistration error is returned.
    pub async fn shutdown(mut self) -> Result<()> {
        let deregistered = self
            .registry
            .deregister(&self.registration.service_url)
            .await;
        if let Err(e) = &deregistered {
            warn!(url = %self.registration.service_url, "Deregistration failed: {}", e);
        }

        self.stop_serving().await;
        info!(url = %self.registration.service_url, "Service stopped");
        deregistered
    }

    /// Stops serving without deregistering; the registry finds out through
    /// failed heartbeats.
    pub async fn halt(mut self) {
        self.stop_serving().await;
        debug!(url = %self.registration.service_url, "Service halted");
    }

    async fn stop_serving(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(server) = self.server.take() {
            match server.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("Server exited with error: {}", e),
                Err(e) => warn!("Server task failed: {}", e),
            }
        }
    }
}

impl Drop for RunningService {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}
