use axum::routing::{get, post};
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::app_state::AppState;

pub mod health;
pub mod metrics;
pub mod verify;

/// Build the full HTTP surface.
pub fn router(state: AppState, prometheus: Arc<PrometheusHandle>) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/api/v1/payment-success", get(verify::payment_success))
        .route(
            "/api/v1/verifications/{tran_id}",
            get(verify::get_session).delete(verify::discard),
        )
        .route(
            "/api/v1/verifications/{tran_id}/check-again",
            post(verify::check_again),
        )
        .route(
            "/api/v1/verifications/{tran_id}/reconcile",
            post(verify::reconcile),
        )
        .with_state(state)
        // Prometheus metrics endpoint (separate state)
        .route(
            "/metrics",
            get(metrics::prometheus_metrics).with_state(prometheus),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
}
