//! HTTP surface: token issuance, task submission and status polling.

mod auth;
mod handlers;
mod middleware;
pub mod response;

use std::sync::Arc;

use axum::Router;
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::http::{HeaderValue, Method};
use axum::routing::{get, post};
use tower::ServiceBuilder;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::warn;

use crate::auth::TokenService;
use crate::dispatch::Dispatcher;
use crate::gateway::StatusGateway;

pub use auth::Authenticated;

/// Shared handles for every handler.
#[derive(Clone)]
pub struct AppState {
    pub tokens: Arc<TokenService>,
    pub dispatcher: Arc<Dispatcher>,
    pub gateway: Arc<StatusGateway>,
    pub default_subject: Arc<str>,
    pub service_name: Arc<str>,
    pub environment: &'static str,
}

/// Build the API router.
pub fn router(state: AppState, allowed_origins: &[String]) -> Router {
    Router::new()
        .route("/api/health", get(handlers::health))
        .route("/api/get-token", post(handlers::get_token))
        .route("/api/protected", get(handlers::protected))
        .route("/api/tasks", post(handlers::submit_task))
        .route("/api/tasks/{task_id}", get(handlers::task_status))
        .layer(
            ServiceBuilder::new()
                .layer(axum::middleware::from_fn(middleware::log_requests))
                .layer(cors_layer(allowed_origins)),
        )
        .with_state(state)
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(_) if origin == "*" => {
                warn!("Ignoring wildcard CORS origin; credentialed requests need explicit origins");
                None
            }
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE])
        .allow_credentials(true)
}

#[cfg(test)]
mod tests {
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode};
    use secrecy::SecretString;
    use serde_json::{Value, json};
    use tower::ServiceExt;

    use super::*;
    use crate::queue::{MemoryQueue, WorkQueue};
    use crate::store::{LibSqlBackend, TaskRegistry};
    use crate::worker::FunctionCatalog;

    async fn app() -> (Router, Arc<TokenService>) {
        let db = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let queue: Arc<dyn WorkQueue> = Arc::new(MemoryQueue::new());
        let registry: Arc<dyn TaskRegistry> = db;
        let tokens = Arc::new(TokenService::new(
            &SecretString::from("router-test".to_string()),
            chrono::Duration::days(1),
        ));
        let state = AppState {
            tokens: Arc::clone(&tokens),
            dispatcher: Arc::new(Dispatcher::new(
                Arc::clone(&registry),
                queue,
                Arc::new(FunctionCatalog::with_builtins()),
            )),
            gateway: Arc::new(StatusGateway::new(registry)),
            default_subject: Arc::from("tester"),
            service_name: Arc::from("taskgate"),
            environment: "development",
        };
        (router(state, &["https://app.example".to_string()]), tokens)
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn wildcard_origin_is_skipped_instead_of_panicking() {
        let _ = cors_layer(&["*".to_string(), "https://app.example".to_string()]);
    }

    #[tokio::test]
    async fn health_needs_no_token() {
        let (app, _) = app().await;
        let response = app
            .oneshot(Request::get("/api/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "success");
        assert_eq!(body["payload"]["service"], "taskgate");
    }

    #[tokio::test]
    async fn token_request_without_body_uses_default_subject() {
        let (app, tokens) = app().await;
        let response = app
            .oneshot(Request::post("/api/get-token").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let body = body_json(response).await;
        assert_eq!(body["message"], "token created");
        let token = body["payload"]["token"].as_str().unwrap();
        assert_eq!(tokens.verify(token).unwrap(), "tester");
    }

    #[tokio::test]
    async fn empty_subject_is_a_bad_request() {
        let (app, _) = app().await;
        let response = app
            .oneshot(
                Request::post("/api/get-token")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"subject": ""}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn missing_header_is_unauthorized() {
        let (app, _) = app().await;
        let response = app
            .oneshot(
                Request::post("/api/tasks")
                    .header("content-type", "application/json")
                    .body(Body::from(json!({"task_kind": "add", "payload": {}}).to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body = body_json(response).await;
        assert_eq!(body["status"], "error");
        assert_eq!(body["message"], "Authentication Failed");
        assert_eq!(body["payload"]["error_msg"], "Missing Authorization Header");
    }

    #[tokio::test]
    async fn unauthorized_wins_over_bad_body() {
        let (app, _) = app().await;
        let response = app
            .oneshot(
                Request::post("/api/tasks")
                    .header("authorization", "Bearer not-a-token")
                    .body(Body::from("{not json"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn unknown_kind_is_a_bad_request() {
        let (app, tokens) = app().await;
        let token = tokens.issue("tester").unwrap().token;
        let response = app
            .oneshot(
                Request::post("/api/tasks")
                    .header("authorization", format!("Bearer {token}"))
                    .header("content-type", "application/json")
                    .body(Body::from(json!({"taskKind": "multiply", "payload": {}}).to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["message"], "Unknown task kind");
    }

    #[tokio::test]
    async fn malformed_task_id_is_not_found() {
        let (app, tokens) = app().await;
        let token = tokens.issue("tester").unwrap().token;
        let response = app
            .oneshot(
                Request::get("/api/tasks/not-a-uuid")
                    .header("authorization", format!("Bearer {token}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn cors_preflight_allows_configured_origin() {
        let (app, _) = app().await;
        let response = app
            .oneshot(
                Request::builder()
                    .method(Method::OPTIONS)
                    .uri("/api/tasks")
                    .header("origin", "https://app.example")
                    .header("access-control-request-method", "POST")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(
            response
                .headers()
                .get("access-control-allow-origin")
                .unwrap(),
            "https://app.example"
        );
    }
}
