//! In-memory collaborators and fixtures shared by unit tests.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Notify;
use uuid::Uuid;

use crate::entities::ride::{self, RideStatus};
use crate::entities::{pricing_config, surge_zone};
use crate::error::{AppError, AppResult};
use crate::realtime::messages::{RideOffer, RideStatusUpdate, ServerMessage};
use crate::realtime::{DeliveryError, RealtimeNotifier};
use crate::repository::{
    DriverDirectory, DriverProfile, NewRide, PricingConfigStore, RideRepository, RideUpdate,
    SurgeZoneStore,
};
use crate::utils::clock::Clock;

pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn advance(&self, by: chrono::Duration) {
        *self.now.lock().unwrap() += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

pub fn economy_pricing() -> pricing_config::Model {
    pricing_config::Model {
        id: 1,
        vehicle_type: "economy".to_string(),
        base_fare: 2500.0,
        per_km_rate: 800.0,
        per_minute_rate: 100.0,
        booking_fee: 500.0,
        minimum_fare: 4000.0,
        currency: "TZS".to_string(),
        is_active: true,
    }
}

pub fn surge_zone(name: &str, center: (f64, f64), radius_km: f64, multiplier: f64) -> surge_zone::Model {
    surge_zone::Model {
        id: 1,
        name: name.to_string(),
        center_lat: center.0,
        center_lng: center.1,
        radius_km,
        multiplier,
        start_time: None,
        end_time: None,
        is_active: true,
    }
}

pub fn ride_fixture(pickup: (f64, f64), created_at: DateTime<Utc>) -> ride::Model {
    ride::Model {
        id: Uuid::new_v4(),
        rider_id: Uuid::new_v4(),
        driver_id: None,
        pickup_lat: pickup.0,
        pickup_lng: pickup.1,
        pickup_address: "Kariakoo Market".to_string(),
        dropoff_lat: -6.8162,
        dropoff_lng: 39.2803,
        dropoff_address: "Kivukoni Ferry".to_string(),
        vehicle_type: "economy".to_string(),
        status: RideStatus::Requested,
        estimated_fare: Some(9800.0),
        estimated_distance_km: Some(4.2),
        estimated_duration_seconds: Some(660),
        surge_multiplier: 1.0,
        accepted_at: None,
        cancelled_at: None,
        created_at: created_at.into(),
    }
}

#[derive(Default)]
pub struct InMemoryRides {
    rides: Mutex<HashMap<Uuid, ride::Model>>,
    failing: Mutex<Option<RideStatus>>,
    held: Mutex<Option<(RideStatus, Arc<Notify>)>>,
}

impl InMemoryRides {
    pub fn insert(&self, ride: ride::Model) {
        self.rides.lock().unwrap().insert(ride.id, ride);
    }

    pub fn get(&self, id: Uuid) -> Option<ride::Model> {
        self.rides.lock().unwrap().get(&id).cloned()
    }

    /// Every transition into `status` fails until [`Self::heal`] is called.
    pub fn fail_transitions_to(&self, status: RideStatus) {
        *self.failing.lock().unwrap() = Some(status);
    }

    pub fn heal(&self) {
        *self.failing.lock().unwrap() = None;
    }

    /// Transitions into `status` wait for the returned gate before they are
    /// applied, so a test can land another write in between.
    pub fn hold_transitions_to(&self, status: RideStatus) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.held.lock().unwrap() = Some((status, gate.clone()));
        gate
    }
}

#[async_trait]
impl RideRepository for InMemoryRides {
    async fn create(&self, ride: NewRide) -> AppResult<ride::Model> {
        let mut model = ride_fixture((ride.pickup_lat, ride.pickup_lng), ride.created_at);
        model.rider_id = ride.rider_id;
        model.pickup_address = ride.pickup_address;
        model.dropoff_lat = ride.dropoff_lat;
        model.dropoff_lng = ride.dropoff_lng;
        model.dropoff_address = ride.dropoff_address;
        model.vehicle_type = ride.vehicle_type;
        model.estimated_fare = Some(ride.estimated_fare);
        model.estimated_distance_km = Some(ride.estimated_distance_km);
        model.estimated_duration_seconds = Some(ride.estimated_duration_seconds);
        model.surge_multiplier = ride.surge_multiplier;

        self.insert(model.clone());
        Ok(model)
    }

    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<ride::Model>> {
        Ok(self.get(id))
    }

    async fn transition(&self, id: Uuid, from: RideStatus, changes: RideUpdate) -> AppResult<bool> {
        let gate = self
            .held
            .lock()
            .unwrap()
            .as_ref()
            .filter(|(status, _)| *status == changes.status)
            .map(|(_, gate)| gate.clone());
        if let Some(gate) = gate {
            gate.notified().await;
        }

        if *self.failing.lock().unwrap() == Some(changes.status) {
            return Err(AppError::Internal("ride store unavailable".to_string()));
        }

        let mut rides = self.rides.lock().unwrap();
        let ride = rides
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound("Ride not found".to_string()))?;

        if ride.status != from {
            return Ok(false);
        }

        ride.status = changes.status;
        if let Some(driver_id) = changes.driver_id {
            ride.driver_id = Some(driver_id);
        }
        if let Some(at) = changes.accepted_at {
            ride.accepted_at = Some(at.into());
        }
        if let Some(at) = changes.cancelled_at {
            ride.cancelled_at = Some(at.into());
        }
        Ok(true)
    }
}

pub struct StaticDrivers {
    profiles: Vec<DriverProfile>,
}

impl StaticDrivers {
    pub fn new(profiles: Vec<DriverProfile>) -> Self {
        Self { profiles }
    }
}

#[async_trait]
impl DriverDirectory for StaticDrivers {
    async fn active_drivers(&self) -> AppResult<Vec<DriverProfile>> {
        Ok(self.profiles.clone())
    }
}

pub struct FailingDrivers;

#[async_trait]
impl DriverDirectory for FailingDrivers {
    async fn active_drivers(&self) -> AppResult<Vec<DriverProfile>> {
        Err(AppError::Internal("driver directory unreachable".to_string()))
    }
}

pub struct StaticPricing {
    configs: Vec<pricing_config::Model>,
}

impl StaticPricing {
    pub fn new(configs: Vec<pricing_config::Model>) -> Self {
        Self { configs }
    }
}

#[async_trait]
impl PricingConfigStore for StaticPricing {
    async fn find_active(&self, vehicle_type: &str) -> AppResult<Option<pricing_config::Model>> {
        Ok(self
            .configs
            .iter()
            .find(|c| c.is_active && c.vehicle_type == vehicle_type)
            .cloned())
    }
}

pub struct StaticSurgeZones {
    zones: Vec<surge_zone::Model>,
}

impl StaticSurgeZones {
    pub fn new(zones: Vec<surge_zone::Model>) -> Self {
        Self { zones }
    }
}

#[async_trait]
impl SurgeZoneStore for StaticSurgeZones {
    async fn active_zones(&self) -> AppResult<Vec<surge_zone::Model>> {
        Ok(self.zones.iter().filter(|z| z.is_active).cloned().collect())
    }
}

pub struct FailingSurgeZones;

#[async_trait]
impl SurgeZoneStore for FailingSurgeZones {
    async fn active_zones(&self) -> AppResult<Vec<surge_zone::Model>> {
        Err(AppError::Internal("surge zones unavailable".to_string()))
    }
}

/// Records every push instead of delivering it.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<(Uuid, ServerMessage)>>,
    broadcasts: Mutex<Vec<(Uuid, ServerMessage)>>,
    unreachable: Mutex<HashSet<Uuid>>,
}

impl RecordingNotifier {
    pub fn make_unreachable(&self, driver_id: Uuid) {
        self.unreachable.lock().unwrap().insert(driver_id);
    }

    pub fn offers(&self) -> Vec<RideOffer> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter_map(|(_, message)| match message {
                ServerMessage::RideOffer(offer) => Some(offer.clone()),
                _ => None,
            })
            .collect()
    }

    /// Drivers that received an offer, in delivery order.
    pub fn offered_drivers(&self) -> Vec<Uuid> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, message)| matches!(message, ServerMessage::RideOffer(_)))
            .map(|(driver_id, _)| *driver_id)
            .collect()
    }

    pub fn withdrawals_to(&self, driver_id: Uuid) -> usize {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(to, message)| {
                *to == driver_id && matches!(message, ServerMessage::OfferWithdrawn { .. })
            })
            .count()
    }

    pub fn broadcasts(&self, ride_id: Uuid) -> Vec<ServerMessage> {
        self.broadcasts
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _)| *id == ride_id)
            .map(|(_, message)| message.clone())
            .collect()
    }

    pub fn last_status(&self, ride_id: Uuid) -> Option<RideStatusUpdate> {
        self.broadcasts(ride_id)
            .into_iter()
            .rev()
            .find_map(|message| match message {
                ServerMessage::RideStatus(update) => Some(update),
                _ => None,
            })
    }
}

impl RealtimeNotifier for RecordingNotifier {
    fn send_to_driver(&self, driver_id: Uuid, message: ServerMessage) -> Result<(), DeliveryError> {
        if self.unreachable.lock().unwrap().contains(&driver_id) {
            return Err(DeliveryError::DriverOffline(driver_id));
        }
        self.sent.lock().unwrap().push((driver_id, message));
        Ok(())
    }

    fn broadcast_to_ride(&self, ride_id: Uuid, message: ServerMessage) -> usize {
        self.broadcasts.lock().unwrap().push((ride_id, message));
        1
    }
}
