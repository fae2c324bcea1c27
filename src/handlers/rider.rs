use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entities::ride;
use crate::error::{AppError, AppResult};
use crate::handlers::fare::validate_trip;
use crate::repository::NewRide;
use crate::services::dispatch::DispatchResult;
use crate::services::pricing::{FareEstimate, FareRequest};
use crate::utils::jwt::Claims;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateRideRequest {
    pub pickup_lat: f64,
    pub pickup_lng: f64,
    pub pickup_address: String,
    pub dropoff_lat: f64,
    pub dropoff_lng: f64,
    pub dropoff_address: String,
    pub vehicle_type: String,
}

#[derive(Debug, Serialize)]
pub struct CreateRideResponse {
    pub ride: ride::Model,
    pub fare: FareEstimate,
    pub dispatch: DispatchResult,
}

/// Request a ride: price it, store it, and start looking for a driver
pub async fn create_ride(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<CreateRideRequest>,
) -> AppResult<(StatusCode, Json<CreateRideResponse>)> {
    validate_trip(
        (payload.pickup_lat, payload.pickup_lng),
        (payload.dropoff_lat, payload.dropoff_lng),
        &payload.vehicle_type,
    )?;

    let fare = state
        .fares
        .estimate_fare(&FareRequest {
            pickup_lat: payload.pickup_lat,
            pickup_lng: payload.pickup_lng,
            dropoff_lat: payload.dropoff_lat,
            dropoff_lng: payload.dropoff_lng,
            vehicle_type: payload.vehicle_type.clone(),
        })
        .await?;

    let ride = state
        .rides
        .create(NewRide {
            rider_id: claims.sub,
            pickup_lat: payload.pickup_lat,
            pickup_lng: payload.pickup_lng,
            pickup_address: payload.pickup_address,
            dropoff_lat: payload.dropoff_lat,
            dropoff_lng: payload.dropoff_lng,
            dropoff_address: payload.dropoff_address,
            vehicle_type: payload.vehicle_type,
            estimated_fare: fare.total,
            estimated_distance_km: fare.distance_km,
            estimated_duration_seconds: fare.duration_seconds.round() as i32,
            surge_multiplier: fare.surge_multiplier,
            created_at: state.clock.now(),
        })
        .await?;

    tracing::info!(ride_id = %ride.id, rider_id = %claims.sub, total = fare.total, "Ride requested");

    let dispatch = state.dispatch.on_ride_created(&ride).await?;

    // Reflect a status the dispatch may already have recorded
    let ride = state.rides.find_by_id(ride.id).await?.unwrap_or(ride);

    Ok((
        StatusCode::CREATED,
        Json(CreateRideResponse {
            ride,
            fare,
            dispatch,
        }),
    ))
}

async fn own_ride(state: &AppState, claims: &Claims, ride_id: Uuid) -> AppResult<ride::Model> {
    let ride = state
        .rides
        .find_by_id(ride_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Ride not found".to_string()))?;

    if ride.rider_id != claims.sub {
        return Err(AppError::Forbidden("Not your ride".to_string()));
    }

    Ok(ride)
}

pub async fn get_ride(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(ride_id): Path<Uuid>,
) -> AppResult<Json<ride::Model>> {
    Ok(Json(own_ride(&state, &claims, ride_id).await?))
}

/// Cancel a ride that no driver has taken yet. Whether it still can be is
/// decided by the dispatch core, which answers `409` otherwise.
pub async fn cancel_ride(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(ride_id): Path<Uuid>,
) -> AppResult<Json<ride::Model>> {
    own_ride(&state, &claims, ride_id).await?;

    state.dispatch.on_ride_cancelled(ride_id).await?;

    let ride = state
        .rides
        .find_by_id(ride_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Ride not found".to_string()))?;

    Ok(Json(ride))
}
