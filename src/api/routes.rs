//! Control-surface route definitions.

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;

use super::handlers::{
    get_config, health, merge_all, merge_one, merge_status, merge_toggle, put_config, ready, scan,
    start, status, stop, AppState,
};

/// Create the API router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health endpoints
        .route("/health", get(health))
        .route("/ready", get(ready))
        // Status and configuration
        .route("/api/v1/status", get(status))
        .route("/api/v1/config", get(get_config).put(put_config))
        // Run control
        .route("/api/v1/bot/start", post(start))
        .route("/api/v1/bot/stop", post(stop))
        .route("/api/v1/scan", post(scan))
        // Merge control
        .route("/api/v1/merge/status", get(merge_status))
        .route("/api/v1/merge/toggle", post(merge_toggle))
        .route("/api/v1/merge/all", post(merge_all))
        .route("/api/v1/merge/:condition_id", post(merge_one))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_config;
    use crate::engine::EngineContext;
    use crate::exchange::MockExchange;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use std::sync::Arc;
    use tower::ServiceExt;

    fn test_app() -> Router {
        let config = test_config();
        let ctx = EngineContext::new(&config, Arc::new(MockExchange::new()), None);
        create_router(AppState::new(ctx))
    }

    #[tokio::test]
    async fn health_endpoint_returns_ok() {
        let response = test_app()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn ready_endpoint_returns_503_when_stopped() {
        let response = test_app()
            .oneshot(Request::builder().uri("/ready").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn start_then_ready_returns_200() {
        let config = test_config();
        let ctx = EngineContext::new(&config, Arc::new(MockExchange::new()), None);
        let app = create_router(AppState::new(ctx.clone()));

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/v1/bot/start")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(ctx.is_running());

        let response = app
            .oneshot(Request::builder().uri("/ready").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn status_endpoint_returns_snapshot() {
        let response = test_app()
            .oneshot(
                Request::builder()
                    .uri("/api/v1/status")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn invalid_config_patch_returns_422() {
        let response = test_app()
            .oneshot(
                Request::builder()
                    .method("PUT")
                    .uri("/api/v1/config")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"target_pair_cost":"1.5"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn merge_unknown_condition_returns_404() {
        let response = test_app()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/v1/merge/0xunknown")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
