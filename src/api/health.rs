//! Liveness and readiness endpoints
//!
//! `/healthz` only says the process is serving. `/readyz` answers 503 until the
//! database responds, so orchestrators hold traffic while Postgres is down.

use std::time::Duration;

use axum::{Json, Router, extract::State, http::StatusCode, routing::get};
use serde::Serialize;

use crate::AppState;

/// Upper bound on the readiness query, including pool acquisition
const READY_CHECK_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Serialize)]
pub struct LivenessResponse {
    pub status: &'static str,
    pub version: &'static str,
}

#[derive(Serialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    pub database: bool,
}

async fn healthz() -> Json<LivenessResponse> {
    Json(LivenessResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn database_reachable(state: &AppState) -> bool {
    let ping = sqlx::query("SELECT 1").execute(state.db.pool());
    match tokio::time::timeout(READY_CHECK_TIMEOUT, ping).await {
        Ok(Ok(_)) => true,
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "Readiness query failed");
            false
        }
        Err(_) => {
            tracing::warn!(
                timeout_ms = READY_CHECK_TIMEOUT.as_millis() as u64,
                "Readiness check timed out"
            );
            false
        }
    }
}

async fn readyz(State(state): State<AppState>) -> (StatusCode, Json<ReadinessResponse>) {
    let database = database_reachable(&state).await;
    let status = if database {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(ReadinessResponse {
            ready: database,
            database,
        }),
    )
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
}
