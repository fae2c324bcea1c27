use axum::{
    extract::{Query, State},
    Json,
};
use serde::Deserialize;

use crate::error::{AppError, AppResult};
use crate::services::pricing::{FareEstimate, FareRequest, SurgeStatus};
use crate::utils::geo::is_valid_coordinate;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct SurgeQuery {
    pub lat: f64,
    pub lng: f64,
}

pub(crate) fn validate_trip(
    pickup: (f64, f64),
    dropoff: (f64, f64),
    vehicle_type: &str,
) -> AppResult<()> {
    if !is_valid_coordinate(pickup.0, pickup.1) {
        return Err(AppError::BadRequest("Invalid pickup coordinates".to_string()));
    }
    if !is_valid_coordinate(dropoff.0, dropoff.1) {
        return Err(AppError::BadRequest("Invalid dropoff coordinates".to_string()));
    }
    if vehicle_type.trim().is_empty() {
        return Err(AppError::BadRequest("Vehicle type is required".to_string()));
    }
    Ok(())
}

/// Price a trip without booking it
pub async fn estimate_fare(
    State(state): State<AppState>,
    Json(payload): Json<FareRequest>,
) -> AppResult<Json<FareEstimate>> {
    validate_trip(
        (payload.pickup_lat, payload.pickup_lng),
        (payload.dropoff_lat, payload.dropoff_lng),
        &payload.vehicle_type,
    )?;

    let estimate = state.fares.estimate_fare(&payload).await?;
    Ok(Json(estimate))
}

/// Current surge at a point
pub async fn current_surge(
    State(state): State<AppState>,
    Query(query): Query<SurgeQuery>,
) -> AppResult<Json<SurgeStatus>> {
    if !is_valid_coordinate(query.lat, query.lng) {
        return Err(AppError::BadRequest("Invalid coordinates".to_string()));
    }

    Ok(Json(state.fares.evaluate_surge(query.lat, query.lng, None).await))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trip_validation() {
        let pickup = (-6.7924, 39.2083);
        let dropoff = (-6.8162, 39.2803);

        assert!(validate_trip(pickup, dropoff, "economy").is_ok());
        assert!(matches!(
            validate_trip((120.0, 39.2), dropoff, "economy"),
            Err(AppError::BadRequest(_))
        ));
        assert!(matches!(
            validate_trip(pickup, dropoff, "  "),
            Err(AppError::BadRequest(_))
        ));
    }
}
