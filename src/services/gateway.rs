//! Entry points the ride-creation flow and the realtime transport call into.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::entities::ride::{self, RideStatus};
use crate::error::{AppError, AppResult};
use crate::realtime::messages::{DriverLocationUpdate, RideStatusUpdate, ServerMessage};
use crate::realtime::RealtimeNotifier;
use crate::repository::{RideRepository, RideUpdate};
use crate::services::dispatch::{
    AcceptanceResult, DispatchCoordinator, DispatchOutcome, DispatchResult, DispatchSnapshot,
};
use crate::services::presence::{ConnectionId, DriverPresence, Location, PresenceRegistry};
use crate::utils::clock::Clock;

pub struct DispatchGateway {
    coordinator: Arc<DispatchCoordinator>,
    presence: Arc<PresenceRegistry>,
    rides: Arc<dyn RideRepository>,
    notifier: Arc<dyn RealtimeNotifier>,
    clock: Arc<dyn Clock>,
}

impl DispatchGateway {
    pub fn new(
        coordinator: Arc<DispatchCoordinator>,
        presence: Arc<PresenceRegistry>,
        rides: Arc<dyn RideRepository>,
        notifier: Arc<dyn RealtimeNotifier>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            coordinator,
            presence,
            rides,
            notifier,
            clock,
        }
    }

    /// Start dispatch for a freshly created ride. When nobody is in range the
    /// ride is marked `no_drivers_available` here; exhaustion is recorded by
    /// the coordinator itself.
    pub async fn on_ride_created(&self, ride: &ride::Model) -> AppResult<DispatchResult> {
        let result = self.coordinator.match_driver_for_ride(ride).await;

        let unavailable = result.outcome == DispatchOutcome::NoDriversAvailable
            && self
                .rides
                .transition(
                    ride.id,
                    RideStatus::Requested,
                    RideUpdate::status(RideStatus::NoDriversAvailable),
                )
                .await?;

        if unavailable {
            self.notifier.broadcast_to_ride(
                ride.id,
                ServerMessage::RideStatus(RideStatusUpdate::new(
                    ride.id,
                    RideStatus::NoDriversAvailable,
                    self.clock.now(),
                )),
            );
        }

        Ok(result)
    }

    pub async fn on_driver_accept(&self, ride_id: Uuid, driver_id: Uuid) -> AcceptanceResult {
        self.coordinator
            .handle_driver_acceptance(ride_id, driver_id)
            .await
    }

    pub async fn on_driver_reject(&self, ride_id: Uuid, driver_id: Uuid) -> bool {
        self.coordinator
            .handle_driver_rejection(ride_id, driver_id)
            .await
    }

    /// Records the driver's position. A fix tagged with a ride is relayed to
    /// the ride's subscribers only when the driver is engaged on that ride.
    pub async fn on_location_update(
        &self,
        driver_id: Uuid,
        connection_id: ConnectionId,
        location: Location,
        ride_id: Option<Uuid>,
    ) -> DriverPresence {
        let observed_at = self.clock.now();
        let presence = self
            .presence
            .record_location(driver_id, connection_id, location, observed_at);

        if let Some(ride_id) = ride_id {
            self.share_location(ride_id, driver_id, location, observed_at)
                .await;
        }

        presence
    }

    async fn share_location(
        &self,
        ride_id: Uuid,
        driver_id: Uuid,
        location: Location,
        observed_at: DateTime<Utc>,
    ) {
        let engaged = match self.rides.find_by_id(ride_id).await {
            Ok(Some(ride)) => self.is_engaged_driver(&ride, driver_id),
            Ok(None) => false,
            Err(err) => {
                tracing::warn!(ride_id = %ride_id, error = %err, "Ride lookup failed, location not shared");
                return;
            }
        };

        if !engaged {
            tracing::debug!(ride_id = %ride_id, driver_id = %driver_id, "Driver not engaged on ride, location not shared");
            return;
        }

        let update = DriverLocationUpdate {
            ride_id,
            driver_id,
            latitude: location.latitude,
            longitude: location.longitude,
            heading: location.heading,
            speed: location.speed,
            timestamp: observed_at,
        };
        let reached = self
            .notifier
            .broadcast_to_ride(ride_id, ServerMessage::DriverLocation(update));
        tracing::debug!(ride_id = %ride_id, driver_id = %driver_id, reached, "Driver location broadcast");
    }

    /// Only the ride's rider, its assigned driver or the driver holding its
    /// offer may follow it.
    pub async fn on_subscribe(
        &self,
        ride_id: Uuid,
        connection_id: ConnectionId,
        user_id: Uuid,
    ) -> AppResult<()> {
        let ride = self
            .rides
            .find_by_id(ride_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Ride not found".to_string()))?;

        if ride.rider_id != user_id && !self.is_engaged_driver(&ride, user_id) {
            tracing::warn!(ride_id = %ride_id, user_id = %user_id, "Subscription to a foreign ride refused");
            return Err(AppError::Forbidden("Not a participant in this ride".to_string()));
        }

        self.presence.subscribe(ride_id, connection_id);
        Ok(())
    }

    fn is_engaged_driver(&self, ride: &ride::Model, driver_id: Uuid) -> bool {
        ride.driver_id == Some(driver_id) || self.coordinator.offered_driver(ride.id) == Some(driver_id)
    }

    pub fn on_unsubscribe(&self, ride_id: Uuid, connection_id: ConnectionId) {
        self.presence.unsubscribe(ride_id, connection_id);
    }

    /// Drops the connection's presence and subscriptions. Outstanding offers
    /// to the driver are left to their timers.
    pub fn on_disconnect(&self, connection_id: ConnectionId) -> Option<Uuid> {
        let driver_id = self.presence.remove_presence(connection_id);
        if let Some(driver_id) = driver_id {
            tracing::info!(driver_id = %driver_id, "Driver went offline");
        }
        driver_id
    }

    pub async fn on_ride_cancelled(&self, ride_id: Uuid) -> AppResult<bool> {
        self.coordinator.cancel_dispatch(ride_id).await
    }

    pub async fn cleanup_expired_requests(&self) -> usize {
        self.coordinator.cleanup_expired_requests().await
    }

    pub fn list_online_drivers(&self) -> Vec<Uuid> {
        self.presence.list_online_drivers()
    }

    pub fn active_dispatches(&self) -> Vec<DispatchSnapshot> {
        self.coordinator.snapshot()
    }
}
