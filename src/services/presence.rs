//! In-memory registry of which drivers are reachable and where, and which
//! connections follow which ride.
//!
//! Nothing here is persisted and nothing expires: a driver stays online until
//! the connection that last reported its location disconnects.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use dashmap::{mapref::entry::Entry, DashMap};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier the transport assigns to each live connection.
pub type ConnectionId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
    pub heading: Option<f64>,
    pub speed: Option<f64>,
    pub accuracy: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DriverPresence {
    pub driver_id: Uuid,
    pub connection_id: ConnectionId,
    pub latitude: f64,
    pub longitude: f64,
    pub heading: Option<f64>,
    pub speed: Option<f64>,
    pub accuracy: Option<f64>,
    pub observed_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct PresenceRegistry {
    drivers: DashMap<Uuid, DriverPresence>,
    subscriptions: DashMap<Uuid, HashSet<ConnectionId>>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Upsert the driver's presence, rebinding it to `connection_id`.
    pub fn record_location(
        &self,
        driver_id: Uuid,
        connection_id: ConnectionId,
        location: Location,
        observed_at: DateTime<Utc>,
    ) -> DriverPresence {
        let presence = DriverPresence {
            driver_id,
            connection_id,
            latitude: location.latitude,
            longitude: location.longitude,
            heading: location.heading,
            speed: location.speed,
            accuracy: location.accuracy,
            observed_at,
        };

        self.drivers.insert(driver_id, presence.clone());
        tracing::debug!(
            driver_id = %driver_id,
            connection_id = %connection_id,
            lat = location.latitude,
            lng = location.longitude,
            "Driver location recorded"
        );

        presence
    }

    /// Forget everything bound to a closed connection. Returns the driver that
    /// went offline, if the connection was a driver's current one.
    ///
    /// A driver that already reconnected on a new connection keeps its
    /// presence: removal only happens while the entry still points at
    /// `connection_id`.
    pub fn remove_presence(&self, connection_id: ConnectionId) -> Option<Uuid> {
        let owners: Vec<Uuid> = self
            .drivers
            .iter()
            .filter(|entry| entry.connection_id == connection_id)
            .map(|entry| *entry.key())
            .collect();

        let mut removed = None;
        for driver_id in owners {
            if self
                .drivers
                .remove_if(&driver_id, |_, p| p.connection_id == connection_id)
                .is_some()
            {
                tracing::debug!(driver_id = %driver_id, connection_id = %connection_id, "Driver went offline");
                removed = Some(driver_id);
            }
        }

        self.subscriptions.retain(|_, connections| {
            connections.remove(&connection_id);
            !connections.is_empty()
        });

        removed
    }

    pub fn is_online(&self, driver_id: Uuid) -> bool {
        self.drivers.contains_key(&driver_id)
    }

    pub fn get_location(&self, driver_id: Uuid) -> Option<DriverPresence> {
        self.drivers.get(&driver_id).map(|entry| entry.value().clone())
    }

    pub fn subscribe(&self, ride_id: Uuid, connection_id: ConnectionId) {
        self.subscriptions
            .entry(ride_id)
            .or_default()
            .insert(connection_id);
        tracing::debug!(ride_id = %ride_id, connection_id = %connection_id, "Subscribed to ride");
    }

    pub fn unsubscribe(&self, ride_id: Uuid, connection_id: ConnectionId) {
        if let Entry::Occupied(mut entry) = self.subscriptions.entry(ride_id) {
            entry.get_mut().remove(&connection_id);
            if entry.get().is_empty() {
                entry.remove();
            }
        }
    }

    pub fn subscribers(&self, ride_id: Uuid) -> Vec<ConnectionId> {
        self.subscriptions
            .get(&ride_id)
            .map(|connections| connections.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Diagnostic listing for the admin console.
    pub fn list_online_drivers(&self) -> Vec<Uuid> {
        self.drivers.iter().map(|entry| *entry.key()).collect()
    }

    /// Point-in-time copy of every online driver, for candidate search.
    pub fn online_drivers(&self) -> Vec<DriverPresence> {
        self.drivers.iter().map(|entry| entry.value().clone()).collect()
    }
}
