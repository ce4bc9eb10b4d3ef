//! HTTP API handlers using axum.
//!
//! | Method | Path        | Body                    | Success | Failure |
//! |--------|-------------|-------------------------|---------|---------|
//! | POST   | `/services` | JSON `Registration`     | 200     | 400     |
//! | DELETE | `/services` | plain-text service URL  | 200     | 500     |
//! | GET    | `/services` | -                       | 200     | -       |
//! | GET    | `/health`   | -                       | 200     | -       |
//!
//! Error responses carry no body. Other methods on `/services` get 405.

use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;
use svcreg_common::Registration;
use tracing::{debug, error};

use crate::storage::RegistrationStore;

/// Creates the API router.
pub fn create_router(store: Arc<RegistrationStore>) -> Router {
    Router::new()
        .route(
            "/services",
            post(register_handler)
                .delete(deregister_handler)
                .get(list_handler),
        )
        .route("/health", get(health_handler))
        .with_state(store)
}

/// Registers one instance.
///
/// The body is decoded by hand rather than with the `Json` extractor so
/// that every decode failure, including a missing content type, is a plain
/// 400 with no body.
async fn register_handler(
    State(store): State<Arc<RegistrationStore>>,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    let registration: Registration = serde_json::from_slice(&body)
        .map_err(|e| ApiError::BadRequest(format!("malformed registration: {}", e)))?;

    debug!(
        service = %registration.service_name,
        url = %registration.service_url,
        "Registration request"
    );

    let round = store
        .add(registration)
        .await
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;
    // Fan-out proceeds in the background.
    drop(round);

    Ok(StatusCode::OK)
}

/// Deregisters the instance whose service URL is the request body.
async fn deregister_handler(
    State(store): State<Arc<RegistrationStore>>,
    body: String,
) -> Result<StatusCode, ApiError> {
    let url = body.trim();
    debug!(url, "Deregistration request");

    let round = store
        .remove(url)
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    drop(round);

    Ok(StatusCode::OK)
}

/// Lists all registrations in registration order.
async fn list_handler(State(store): State<Arc<RegistrationStore>>) -> Json<Vec<Registration>> {
    Json(store.snapshot())
}

/// Health check endpoint.
async fn health_handler() -> &'static str {
    "OK"
}

/// API error type.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        error!("API error: {} - {}", status, message);

        status.into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DuplicatePolicy;
    use crate::delivery::testing::RecordingSender;
    use crate::storage::testing::{registration, store_with};
    use axum::{body::Body, http::Request};
    use http_body_util::BodyExt;
    use svcreg_common::{Patch, PatchEntry};
    use tower::util::ServiceExt; // for `oneshot`

    fn post_services(body: impl Into<Body>) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/services")
            .header("content-type", "application/json")
            .body(body.into())
            .unwrap()
    }

    fn delete_services(url: &str) -> Request<Body> {
        Request::builder()
            .method("DELETE")
            .uri("/services")
            .header("content-type", "text/plain")
            .body(Body::from(url.to_string()))
            .unwrap()
    }

    async fn body_bytes(response: Response) -> Bytes {
        response.into_body().collect().await.unwrap().to_bytes()
    }

    #[tokio::test]
    async fn test_register_endpoint() {
        let sender = RecordingSender::new();
        let store = Arc::new(store_with(Arc::clone(&sender), DuplicatePolicy::Append));
        let _ = store.add(registration("B", "http://b", &[])).await.unwrap();
        let app = create_router(Arc::clone(&store));

        let body = r#"{
            "serviceName": "A",
            "serviceUrl": "http://a",
            "heartBeatURL": "http://a/heartbeat",
            "requiredServices": ["B"],
            "serviceUpdateURL": "http://a/services"
        }"#;
        let response = app.oneshot(post_services(body)).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(store.contains("http://a"));
        assert_eq!(
            sender.sent_to("http://a/services"),
            vec![Patch::added(PatchEntry::new("B", "http://b"))]
        );
    }

    #[tokio::test]
    async fn test_register_malformed_json_is_400_without_body() {
        let store = Arc::new(store_with(RecordingSender::new(), DuplicatePolicy::Append));
        let app = create_router(Arc::clone(&store));

        let response = app.oneshot(post_services("{not json")).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(body_bytes(response).await.is_empty());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_register_priming_failure_is_400() {
        let sender = RecordingSender::new();
        sender.fail_for("http://a/services");
        let store = Arc::new(store_with(sender, DuplicatePolicy::Append));
        let app = create_router(Arc::clone(&store));

        let body = serde_json::to_vec(&registration("A", "http://a", &[])).unwrap();
        let response = app.oneshot(post_services(body)).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(store.contains("http://a"));
    }

    #[tokio::test]
    async fn test_deregister_endpoint() {
        let store = Arc::new(store_with(RecordingSender::new(), DuplicatePolicy::Append));
        let _ = store.add(registration("A", "http://a", &[])).await.unwrap();
        let app = create_router(Arc::clone(&store));

        let response = app.oneshot(delete_services("http://a\n")).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_deregister_unknown_url_is_500_without_body() {
        let store = Arc::new(store_with(RecordingSender::new(), DuplicatePolicy::Append));
        let app = create_router(store);

        let response = app.oneshot(delete_services("http://nowhere")).await.unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body_bytes(response).await.is_empty());
    }

    #[tokio::test]
    async fn test_list_endpoint() {
        let store = Arc::new(store_with(RecordingSender::new(), DuplicatePolicy::Append));
        let _ = store.add(registration("A", "http://a", &[])).await.unwrap();
        let app = create_router(store);

        let request = Request::builder()
            .method("GET")
            .uri("/services")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let listed: Vec<Registration> = serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert_eq!(listed, vec![registration("A", "http://a", &[])]);
    }

    #[tokio::test]
    async fn test_unsupported_method_is_405() {
        let store = Arc::new(store_with(RecordingSender::new(), DuplicatePolicy::Append));
        let app = create_router(store);

        let request = Request::builder()
            .method("PUT")
            .uri("/services")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let store = Arc::new(store_with(RecordingSender::new(), DuplicatePolicy::Append));
        let app = create_router(store);

        let request = Request::builder()
            .method("GET")
            .uri("/health")
            .body(Body::empty())
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
