//! Liveness, readiness and metrics endpoints.

use {
    axum::{
        extract::State,
        http::StatusCode,
        response::{IntoResponse, Json, Response},
    },
    serde_json::json,
};

use wagate_store::DeviceStore;

use crate::state::AppState;

/// GET /healthz — verifies the device store is reachable.
pub async fn healthz(State(state): State<AppState>) -> Response {
    match state.devices.ping().await {
        Ok(()) => Json(json!({
            "status": "healthy",
            "database": "connected",
        }))
        .into_response(),
        Err(err) => {
            tracing::error!(error = %err, "health check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "status": "unhealthy",
                    "database": "disconnected",
                })),
            )
                .into_response()
        },
    }
}

/// GET /readyz — session counts.
pub async fn readyz(State(state): State<AppState>) -> Response {
    let total = state.sessions.client_count().await;
    let connected = state.sessions.connected_count().await;
    wagate_metrics::gauge!(wagate_metrics::session::REGISTERED).set(total as f64);
    wagate_metrics::gauge!(wagate_metrics::session::CONNECTED).set(connected as f64);

    Json(json!({
        "status": "ready",
        "total_clients": total,
        "connected_clients": connected,
    }))
    .into_response()
}

/// GET /metrics — Prometheus text format.
pub async fn metrics(State(state): State<AppState>) -> Response {
    (
        [("content-type", "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
        .into_response()
}
