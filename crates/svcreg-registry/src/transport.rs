//! Outbound HTTP used by the registry: patch POSTs and liveness probes.
//!
//! One pooled hyper client serves both. Timeouts are applied by the callers
//! (the delivery mailboxes and the heartbeat monitor), not here.

use crate::delivery::PatchSender;
use crate::heartbeat::{LivenessProbe, ProbeResult};
use async_trait::async_trait;
use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::{Method, Request, StatusCode, Uri};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use std::time::Instant;
use svcreg_common::{Error, Patch, Result};
use tracing::debug;

const USER_AGENT: &str = concat!("svcreg/", env!("CARGO_PKG_VERSION"));

/// HTTP transport for patch delivery and heartbeat probing.
#[derive(Clone)]
pub struct HttpTransport {
    client: Client<HttpConnector, Full<Bytes>>,
}

impl HttpTransport {
    pub fn new() -> Self {
        let client = Client::builder(TokioExecutor::new()).build_http();
        Self { client }
    }

    async fn request(
        &self,
        method: Method,
        url: &str,
        content_type: Option<&str>,
        body: Bytes,
    ) -> Result<StatusCode> {
        let uri: Uri = url
            .parse()
            .map_err(|e| Error::Protocol(format!("Invalid URI {}: {}", url, e)))?;

        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header("user-agent", USER_AGENT);
        if let Some(content_type) = content_type {
            builder = builder.header("content-type", content_type);
        }
        let request = builder
            .body(Full::new(body))
            .map_err(|e| Error::Protocol(format!("Failed to build request: {}", e)))?;

        let response = self
            .client
            .request(request)
            .await
            .map_err(|e| Error::delivery(url, e.to_string()))?;
        let status = response.status();

        // Drain the body so the connection can return to the pool.
        let _ = response.into_body().collect().await;

        Ok(status)
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PatchSender for HttpTransport {
    async fn send_patch(&self, update_url: &str, patch: &Patch) -> Result<()> {
        let body = serde_json::to_vec(patch)?;
        let status = self
            .request(
                Method::POST,
                update_url,
                Some("application/json"),
                Bytes::from(body),
            )
            .await?;

        if !status.is_success() {
            return Err(Error::delivery(
                update_url,
                format!("update endpoint responded with {}", status),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl LivenessProbe for HttpTransport {
    async fn probe(&self, heartbeat_url: &str) -> ProbeResult {
        let start = Instant::now();

        match self
            .request(Method::GET, heartbeat_url, None, Bytes::new())
            .await
        {
            Ok(StatusCode::OK) => {
                debug!(heartbeat_url, "Heartbeat answered 200");
                ProbeResult::healthy(start.elapsed())
            }
            Ok(status) => ProbeResult::unhealthy(
                format!("heartbeat responded with {}", status),
                start.elapsed(),
            ),
            Err(e) => ProbeResult::unhealthy(e.to_string(), start.elapsed()),
        }
    }
}
