// Outreach API Library
// Decision: Router assembly lives in the library so tests drive the same app the binary serves

use std::sync::Arc;

use axum::{routing::get, Json, Router};
use outreach_engine::OutreachEngine;
use serde::Serialize;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

// API routes and types
pub mod api;

// OpenAPI spec generation
pub mod openapi;

// Logging setup
pub mod telemetry;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Build the full application router.
///
/// `/health` and the provider webhook stay unprefixed; the `/v1` API is nested
/// under `api_prefix` when one is configured.
pub fn build_app(engine: Arc<OutreachEngine>, api_prefix: &str) -> Router {
    let api_routes = Router::new()
        .merge(api::workflows::routes(api::workflows::AppState::new(
            engine.clone(),
        )))
        .merge(api::assignments::routes(api::assignments::AppState::new(
            engine.clone(),
        )))
        .merge(api::leads::routes(api::leads::AppState::new(engine.clone())));

    Router::new()
        .route("/health", get(health))
        .merge(api::webhooks::routes(api::webhooks::AppState::new(engine)))
        .merge(build_router_with_prefix(api_routes, api_prefix))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-doc/openapi.json", openapi::ApiDoc::openapi()))
        .layer(TraceLayer::new_for_http())
}

/// Build router with optional API prefix
pub fn build_router_with_prefix<S: Clone + Send + Sync + 'static>(
    api_routes: Router<S>,
    api_prefix: &str,
) -> Router<S> {
    if api_prefix.is_empty() {
        api_routes
    } else {
        Router::new().nest(api_prefix, api_routes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::Request, http::StatusCode};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn test_routes() -> Router {
        Router::new().route("/v1/test", get(|| async { "ok" }))
    }

    #[tokio::test]
    async fn test_api_prefix_empty() {
        let app = build_router_with_prefix(test_routes(), "");

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/v1/test")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"ok");
    }

    #[tokio::test]
    async fn test_api_prefix_applied() {
        let app = build_router_with_prefix(test_routes(), "/api");

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/api/v1/test")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/v1/test")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
