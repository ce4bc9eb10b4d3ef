//! Registry client.
//!
//! Registers and deregisters one instance against the registry's
//! `/services` endpoint.

use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::{Method, Request, Uri};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use std::time::Duration;
use svcreg_common::{Error, Registration, Result};
use tokio::time::timeout;
use tracing::debug;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Service registry client.
#[derive(Clone)]
pub struct RegistryClient {
    /// Base URL of the registry (e.g., "http://localhost:3000").
    base_url: String,

    /// Hyper HTTP client (reusable, pooled connections).
    client: Client<HttpConnector, Full<Bytes>>,

    /// Upper bound for one registry call.
    timeout: Duration,
}

impl RegistryClient {
    /// Creates a new registry client.
    pub fn new(base_url: impl Into<String>) -> Self {
        let client = Client::builder(TokioExecutor::new()).build_http();

        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Sets the per-call timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn services_url(&self) -> String {
        format!("{}/services", self.base_url)
    }

    /// Registers `registration`; any status other than 200 is an error.
    pub async fn register(&self, registration: &Registration) -> Result<()> {
        debug!(
            service = %registration.service_name,
            url = %registration.service_url,
            "Registering with {}",
            self.base_url
        );

        let body = serde_json::to_vec(registration)?;
        self.call(Method::POST, "application/json", Bytes::from(body), "register service")
            .await?;

        debug!(url = %registration.service_url, "Registered");
        Ok(())
    }

    /// Deregisters the instance at `service_url`.
    pub async fn deregister(&self, service_url: &str) -> Result<()> {
        debug!(url = service_url, "Deregistering from {}", self.base_url);

        self.call(
            Method::DELETE,
            "text/plain",
            Bytes::from(service_url.to_string()),
            "deregister service",
        )
        .await
    }

    async fn call(
        &self,
        method: Method,
        content_type: &str,
        body: Bytes,
        action: &str,
    ) -> Result<()> {
        let url = self.services_url();
        let uri: Uri = url
            .parse()
            .map_err(|e| Error::Protocol(format!("Invalid URI {}: {}", url, e)))?;

        let req = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", content_type)
            .body(Full::new(body))
            .map_err(|e| Error::Protocol(format!("Failed to build request: {}", e)))?;

        let resp = timeout(self.timeout, self.client.request(req))
            .await
            .map_err(|_| Error::timeout(&url, self.timeout))?
            .map_err(|e| Error::delivery(&url, e.to_string()))?;

        let status = resp.status();
        // Drain the body so the connection can return to the pool.
        let _ = resp.into_body().collect().await;

        if status != hyper::StatusCode::OK {
            return Err(Error::Registry(format!(
                "failed to {}: registry responded with {}",
                action, status
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::StatusCode, routing::post, Router};
    use parking_lot::Mutex;
    use std::sync::Arc;
    use svcreg_common::ServiceName;
    use tokio::net::TcpListener;

    #[derive(Default)]
    struct Seen {
        registered: Mutex<Vec<Registration>>,
        deregistered: Mutex<Vec<String>>,
    }

    async fn fake_registry(status: StatusCode) -> (String, Arc<Seen>) {
        let seen = Arc::new(Seen::default());
        let on_post = Arc::clone(&seen);
        let on_delete = Arc::clone(&seen);
        let app = Router::new().route(
            "/services",
            post(move |body: Bytes| {
                let seen = Arc::clone(&on_post);
                async move {
                    if let Ok(registration) = serde_json::from_slice(&body) {
                        seen.registered.lock().push(registration);
                    }
                    status
                }
            })
            .delete(move |body: String| {
                let seen = Arc::clone(&on_delete);
                async move {
                    seen.deregistered.lock().push(body);
                    status
                }
            }),
        );

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{}", addr), seen)
    }

    fn registration() -> Registration {
        Registration {
            service_name: ServiceName::from("GradingService"),
            service_url: "http://localhost:6000".to_string(),
            heartbeat_url: "http://localhost:6000/heartbeat".to_string(),
            required_services: vec![ServiceName::from("LogService")],
            service_update_url: "http://localhost:6000/services".to_string(),
        }
    }

    #[test]
    fn test_client_creation() {
        let client = RegistryClient::new("http://localhost:3000/");
        assert_eq!(client.base_url(), "http://localhost:3000");
    }

    #[tokio::test]
    async fn test_register_posts_registration() {
        let (base, seen) = fake_registry(StatusCode::OK).await;

        RegistryClient::new(base).register(&registration()).await.unwrap();

        assert_eq!(*seen.registered.lock(), vec![registration()]);
    }

    #[tokio::test]
    async fn test_deregister_sends_plain_url() {
        let (base, seen) = fake_registry(StatusCode::OK).await;

        RegistryClient::new(base)
            .deregister("http://localhost:6000")
            .await
            .unwrap();

        assert_eq!(*seen.deregistered.lock(), vec!["http://localhost:6000"]);
    }

    #[tokio::test]
    async fn test_non_200_is_registry_error() {
        let (base, _) = fake_registry(StatusCode::BAD_REQUEST).await;
        let client = RegistryClient::new(base);

        let err = client.register(&registration()).await.unwrap_err();
        assert!(matches!(err, Error::Registry(_)));
        assert!(err.to_string().contains("400"));

        let err = client.deregister("http://localhost:6000").await.unwrap_err();
        assert!(matches!(err, Error::Registry(_)));
    }

    #[tokio::test]
    async fn test_unreachable_registry_is_delivery_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = RegistryClient::new(format!("http://{}", addr))
            .register(&registration())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Delivery { .. }));
    }
}
