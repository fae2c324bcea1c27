//! Narrow contracts to the persistent collaborators of the dispatch core.
//!
//! The core never touches the database directly; it only sees these traits.
//! [`SeaOrmStore`] implements all of them over a sea-orm connection.

mod sea_orm_store;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::entities::ride::{self, RideStatus};
use crate::entities::{pricing_config, surge_zone};
use crate::error::AppResult;

pub use sea_orm_store::SeaOrmStore;

/// Rating used for every driver until a real rating source exists.
pub const DEFAULT_DRIVER_RATING: f64 = 4.5;

/// A status transition plus the fields that come with it. `None` leaves the
/// column untouched.
#[derive(Debug, Clone, PartialEq)]
pub struct RideUpdate {
    pub status: RideStatus,
    pub driver_id: Option<Uuid>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl RideUpdate {
    pub fn status(status: RideStatus) -> Self {
        Self {
            status,
            driver_id: None,
            accepted_at: None,
            cancelled_at: None,
        }
    }

    pub fn accepted(driver_id: Uuid, at: DateTime<Utc>) -> Self {
        Self {
            driver_id: Some(driver_id),
            accepted_at: Some(at),
            ..Self::status(RideStatus::Accepted)
        }
    }

    pub fn cancelled(at: DateTime<Utc>) -> Self {
        Self {
            cancelled_at: Some(at),
            ..Self::status(RideStatus::Cancelled)
        }
    }
}

/// A ride as requested by a rider, before it is stored.
#[derive(Debug, Clone)]
pub struct NewRide {
    pub rider_id: Uuid,
    pub pickup_lat: f64,
    pub pickup_lng: f64,
    pub pickup_address: String,
    pub dropoff_lat: f64,
    pub dropoff_lng: f64,
    pub dropoff_address: String,
    pub vehicle_type: String,
    pub estimated_fare: f64,
    pub estimated_distance_km: f64,
    pub estimated_duration_seconds: i32,
    pub surge_multiplier: f64,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait RideRepository: Send + Sync {
    async fn create(&self, ride: NewRide) -> AppResult<ride::Model>;

    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<ride::Model>>;

    /// Apply `changes` only while the ride is still in `from`, as a single
    /// conditional write. Returns false when the ride has already moved on,
    /// fails with `NotFound` when it does not exist.
    async fn transition(&self, id: Uuid, from: RideStatus, changes: RideUpdate) -> AppResult<bool>;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DriverProfile {
    pub driver_id: Uuid,
    pub rating: f64,
}

/// Read source of accounts allowed to receive ride offers.
#[async_trait]
pub trait DriverDirectory: Send + Sync {
    async fn active_drivers(&self) -> AppResult<Vec<DriverProfile>>;
}

#[async_trait]
pub trait PricingConfigStore: Send + Sync {
    async fn find_active(&self, vehicle_type: &str) -> AppResult<Option<pricing_config::Model>>;
}

#[async_trait]
pub trait SurgeZoneStore: Send + Sync {
    async fn active_zones(&self) -> AppResult<Vec<surge_zone::Model>>;
}
