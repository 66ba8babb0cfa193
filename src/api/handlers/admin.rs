use axum::extract::State;
use axum::Json;
use serde::Serialize;
use std::sync::Arc;

use crate::api::response::JSend;
use crate::bus::BusStats;
use crate::AppState;

// ============================================================================
// Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    /// Blob writes still running
    pub uploads_in_flight: usize,
    /// Routing tables of the event bus; absent once the bus has shut down
    pub bus: Option<BusStats>,
}

// ============================================================================
// Handlers
// ============================================================================

pub async fn health(State(state): State<Arc<AppState>>) -> Json<JSend<HealthResponse>> {
    let bus = state.bus.stats().await.ok();
    let status = if bus.is_some() { "ok" } else { "degraded" };

    JSend::success(HealthResponse {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uploads_in_flight: state.uploads.in_flight(),
        bus,
    })
}
