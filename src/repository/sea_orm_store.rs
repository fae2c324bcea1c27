use async_trait::async_trait;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
};
use uuid::Uuid;

use super::{
    DriverDirectory, DriverProfile, NewRide, PricingConfigStore, RideRepository, RideUpdate,
    SurgeZoneStore, DEFAULT_DRIVER_RATING,
};
use crate::entities::ride::{self, RideStatus};
use crate::entities::user::{self, UserRole};
use crate::entities::{pricing_config, surge_zone};
use crate::error::{AppError, AppResult};

/// Relational store backing every collaborator contract.
#[derive(Clone)]
pub struct SeaOrmStore {
    db: DatabaseConnection,
}

impl SeaOrmStore {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

#[async_trait]
impl RideRepository for SeaOrmStore {
    async fn create(&self, ride: NewRide) -> AppResult<ride::Model> {
        let model = ride::ActiveModel {
            id: Set(Uuid::new_v4()),
            rider_id: Set(ride.rider_id),
            driver_id: Set(None),
            pickup_lat: Set(ride.pickup_lat),
            pickup_lng: Set(ride.pickup_lng),
            pickup_address: Set(ride.pickup_address),
            dropoff_lat: Set(ride.dropoff_lat),
            dropoff_lng: Set(ride.dropoff_lng),
            dropoff_address: Set(ride.dropoff_address),
            vehicle_type: Set(ride.vehicle_type),
            status: Set(RideStatus::Requested),
            estimated_fare: Set(Some(ride.estimated_fare)),
            estimated_distance_km: Set(Some(ride.estimated_distance_km)),
            estimated_duration_seconds: Set(Some(ride.estimated_duration_seconds)),
            surge_multiplier: Set(ride.surge_multiplier),
            accepted_at: Set(None),
            cancelled_at: Set(None),
            created_at: Set(ride.created_at.into()),
        };

        Ok(model.insert(&self.db).await?)
    }

    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<ride::Model>> {
        Ok(ride::Entity::find_by_id(id).one(&self.db).await?)
    }

    async fn transition(&self, id: Uuid, from: RideStatus, changes: RideUpdate) -> AppResult<bool> {
        let mut active = ride::ActiveModel {
            status: Set(changes.status),
            ..Default::default()
        };

        if let Some(driver_id) = changes.driver_id {
            active.driver_id = Set(Some(driver_id));
        }

        if let Some(at) = changes.accepted_at {
            active.accepted_at = Set(Some(at.into()));
        }

        if let Some(at) = changes.cancelled_at {
            active.cancelled_at = Set(Some(at.into()));
        }

        let result = ride::Entity::update_many()
            .set(active)
            .filter(ride::Column::Id.eq(id))
            .filter(ride::Column::Status.eq(from))
            .exec(&self.db)
            .await?;

        if result.rows_affected > 0 {
            return Ok(true);
        }

        // Nothing matched: either the ride is gone or it already left `from`
        match self.find_by_id(id).await? {
            Some(_) => Ok(false),
            None => Err(AppError::NotFound("Ride not found".to_string())),
        }
    }
}

#[async_trait]
impl DriverDirectory for SeaOrmStore {
    async fn active_drivers(&self) -> AppResult<Vec<DriverProfile>> {
        let drivers = user::Entity::find()
            .filter(user::Column::Role.eq(UserRole::Driver))
            .filter(user::Column::IsActive.eq(true))
            .all(&self.db)
            .await?;

        // No rating column yet, every driver ranks with the same score.
        Ok(drivers
            .into_iter()
            .map(|d| DriverProfile {
                driver_id: d.id,
                rating: DEFAULT_DRIVER_RATING,
            })
            .collect())
    }
}

#[async_trait]
impl PricingConfigStore for SeaOrmStore {
    async fn find_active(&self, vehicle_type: &str) -> AppResult<Option<pricing_config::Model>> {
        Ok(pricing_config::Entity::find()
            .filter(pricing_config::Column::VehicleType.eq(vehicle_type))
            .filter(pricing_config::Column::IsActive.eq(true))
            .one(&self.db)
            .await?)
    }
}

#[async_trait]
impl SurgeZoneStore for SeaOrmStore {
    async fn active_zones(&self) -> AppResult<Vec<surge_zone::Model>> {
        Ok(surge_zone::Entity::find()
            .filter(surge_zone::Column::IsActive.eq(true))
            .order_by_asc(surge_zone::Column::Id)
            .all(&self.db)
            .await?)
    }
}
