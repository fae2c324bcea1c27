use axum::{
    extract::{Path, State},
    Extension, Json,
};
use serde::Serialize;
use uuid::Uuid;

use crate::services::dispatch::AcceptanceResult;
use crate::utils::jwt::Claims;
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct RejectionResponse {
    pub ride_id: Uuid,
    pub rejected: bool,
}

/// HTTP fallback for drivers whose socket is flaky; same rules as the
/// realtime `accept_ride` frame.
pub async fn accept_ride(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(ride_id): Path<Uuid>,
) -> Json<AcceptanceResult> {
    Json(state.dispatch.on_driver_accept(ride_id, claims.sub).await)
}

pub async fn reject_ride(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(ride_id): Path<Uuid>,
) -> Json<RejectionResponse> {
    let rejected = state.dispatch.on_driver_reject(ride_id, claims.sub).await;
    Json(RejectionResponse { ride_id, rejected })
}
