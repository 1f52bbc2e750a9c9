//! Control-surface handlers.
//!
//! Thin adapters over [`EngineContext`]: every handler reads a consistent
//! snapshot or applies one atomic mutation. Configuration that fails
//! validation is rejected with 422 and never applied.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;

use crate::config::EngineConfigPatch;
use crate::engine::EngineContext;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// The engine context all handlers operate on.
    pub ctx: Arc<EngineContext>,
}

impl AppState {
    /// Wrap an engine context.
    pub fn new(ctx: Arc<EngineContext>) -> Self {
        Self { ctx }
    }
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Status: "ok".
    pub status: &'static str,
}

/// Readiness check response.
#[derive(Debug, Serialize)]
pub struct ReadyResponse {
    /// Whether the scan loop is trading.
    pub running: bool,
}

/// Simple action acknowledgement.
#[derive(Debug, Serialize)]
pub struct ActionResponse {
    /// What happened.
    pub status: &'static str,
}

/// Validation failure payload.
#[derive(Debug, Serialize)]
pub struct RejectedResponse {
    /// Why the request was rejected.
    pub error: String,
}

/// Health check - always 200.
pub async fn health() -> impl IntoResponse {
    Json(HealthResponse { status: "ok" })
}

/// Readiness - 200 while the engine is trading, 503 otherwise.
pub async fn ready(State(state): State<AppState>) -> impl IntoResponse {
    let running = state.ctx.is_running();
    let response = ReadyResponse { running };

    if running {
        (StatusCode::OK, Json(response))
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(response))
    }
}

/// Full status snapshot.
pub async fn status(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.ctx.snapshot().await)
}

/// Current engine configuration. Secrets never appear here: the engine
/// config carries none by construction.
pub async fn get_config(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.ctx.engine_config().await.as_ref().clone())
}

/// Apply a configuration patch at the next cycle boundary.
pub async fn put_config(
    State(state): State<AppState>,
    Json(patch): Json<EngineConfigPatch>,
) -> impl IntoResponse {
    match state.ctx.update_config(&patch).await {
        Ok(updated) => (StatusCode::OK, Json(updated)).into_response(),
        Err(error) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(RejectedResponse { error }),
        )
            .into_response(),
    }
}

/// Start the scan loop.
pub async fn start(State(state): State<AppState>) -> impl IntoResponse {
    let started = state.ctx.start().await;
    Json(ActionResponse {
        status: if started { "started" } else { "already_running" },
    })
}

/// Stop the scan loop after the in-flight cycle.
pub async fn stop(State(state): State<AppState>) -> impl IntoResponse {
    let stopped = state.ctx.stop().await;
    Json(ActionResponse {
        status: if stopped { "stopping" } else { "not_running" },
    })
}

/// Trigger an immediate scan cycle.
pub async fn scan(State(state): State<AppState>) -> impl IntoResponse {
    state.ctx.trigger_scan();
    Json(ActionResponse {
        status: "scan_triggered",
    })
}

/// Merge tracker snapshot.
pub async fn merge_status(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.ctx.merge_snapshot().await)
}

/// Flip the auto-merge toggle.
pub async fn merge_toggle(State(state): State<AppState>) -> impl IntoResponse {
    #[derive(Serialize)]
    struct ToggleResponse {
        auto_merge_enabled: bool,
    }

    let enabled = state.ctx.toggle_auto_merge().await;
    Json(ToggleResponse {
        auto_merge_enabled: enabled,
    })
}

/// Merge every position with a mergeable amount.
pub async fn merge_all(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.ctx.merge_all().await)
}

/// Merge one position by condition id.
pub async fn merge_one(
    State(state): State<AppState>,
    Path(condition_id): Path<String>,
) -> impl IntoResponse {
    match state.ctx.merge_one(&condition_id).await {
        Some(record) => (StatusCode::OK, Json(record)).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(RejectedResponse {
                error: format!("no mergeable position for {condition_id}"),
            }),
        )
            .into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_config;
    use crate::exchange::MockExchange;

    fn test_state() -> AppState {
        let config = test_config();
        let ctx = EngineContext::new(&config, Arc::new(MockExchange::new()), None);
        AppState::new(ctx)
    }

    #[tokio::test]
    async fn start_stop_toggle_running() {
        let state = test_state();
        assert!(!state.ctx.is_running());

        assert!(state.ctx.start().await);
        assert!(state.ctx.is_running());
        assert!(!state.ctx.start().await);

        assert!(state.ctx.stop().await);
        assert!(!state.ctx.is_running());
        assert!(!state.ctx.stop().await);
    }

    #[tokio::test]
    async fn invalid_patch_is_rejected_and_not_applied() {
        let state = test_state();
        let before = state.ctx.engine_config().await;

        let patch = EngineConfigPatch {
            order_size: Some(rust_decimal_macros::dec!(-5)),
            ..Default::default()
        };

        assert!(state.ctx.update_config(&patch).await.is_err());
        let after = state.ctx.engine_config().await;
        assert_eq!(*before, *after);
    }
}
