use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::app_state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub sessions: SessionHealth,
}

#[derive(Serialize)]
pub struct SessionHealth {
    pub tracked: usize,
    pub verifying: usize,
}

/// GET /health — liveness plus verification session counts.
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let counts = state.sessions.counts();

    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        sessions: SessionHealth {
            tracked: counts.total,
            verifying: counts.busy,
        },
    })
}
