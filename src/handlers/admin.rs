use axum::{extract::State, Json};
use serde::Serialize;
use uuid::Uuid;

use crate::services::dispatch::DispatchSnapshot;
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct OnlineDriversResponse {
    pub count: usize,
    pub connections: usize,
    pub drivers: Vec<Uuid>,
}

/// Drivers currently reachable
pub async fn online_drivers(State(state): State<AppState>) -> Json<OnlineDriversResponse> {
    let drivers = state.dispatch.list_online_drivers();

    Json(OnlineDriversResponse {
        count: drivers.len(),
        connections: state.hub.connection_count(),
        drivers,
    })
}

/// Cascades still waiting on a driver
pub async fn active_dispatches(State(state): State<AppState>) -> Json<Vec<DispatchSnapshot>> {
    Json(state.dispatch.active_dispatches())
}
