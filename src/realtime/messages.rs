//! JSON frames exchanged over the realtime socket.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entities::ride::RideStatus;

/// Offer delivered to one candidate driver.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RideOffer {
    pub ride_id: Uuid,
    pub pickup_lat: f64,
    pub pickup_lng: f64,
    pub pickup_address: String,
    pub dropoff_lat: f64,
    pub dropoff_lng: f64,
    pub dropoff_address: String,
    pub rider_id: Uuid,
    pub distance_km: f64,
    pub estimated_arrival_seconds: i64,
    pub expires_at: DateTime<Utc>,
}

/// Status push to everyone subscribed to a ride.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RideStatusUpdate {
    pub ride_id: Uuid,
    pub status: RideStatus,
    pub driver_id: Option<Uuid>,
    pub estimated_arrival: Option<i64>,
    pub fare: Option<f64>,
    pub distance: Option<f64>,
    pub duration: Option<i32>,
    pub timestamp: DateTime<Utc>,
}

impl RideStatusUpdate {
    pub fn new(ride_id: Uuid, status: RideStatus, timestamp: DateTime<Utc>) -> Self {
        Self {
            ride_id,
            status,
            driver_id: None,
            estimated_arrival: None,
            fare: None,
            distance: None,
            duration: None,
            timestamp,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DriverLocationUpdate {
    pub ride_id: Uuid,
    pub driver_id: Uuid,
    pub latitude: f64,
    pub longitude: f64,
    pub heading: Option<f64>,
    pub speed: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WithdrawReason {
    AcceptedByAnotherDriver,
    RideCancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    RideOffer(RideOffer),
    OfferWithdrawn { ride_id: Uuid, reason: WithdrawReason },
    RideStatus(RideStatusUpdate),
    DriverLocation(DriverLocationUpdate),
    AcceptResult { ride_id: Uuid, success: bool, message: String },
    Error { message: String },
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    LocationUpdate {
        latitude: f64,
        longitude: f64,
        heading: Option<f64>,
        speed: Option<f64>,
        accuracy: Option<f64>,
        ride_id: Option<Uuid>,
    },
    Subscribe { ride_id: Uuid },
    Unsubscribe { ride_id: Uuid },
    AcceptRide { ride_id: Uuid },
    RejectRide { ride_id: Uuid },
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn client_frames_are_type_tagged() {
        let ride_id = Uuid::new_v4();

        let frame: ClientMessage =
            serde_json::from_value(json!({ "type": "accept_ride", "ride_id": ride_id })).unwrap();
        assert_eq!(frame, ClientMessage::AcceptRide { ride_id });

        let frame: ClientMessage = serde_json::from_value(json!({
            "type": "location_update",
            "latitude": -6.79,
            "longitude": 39.2,
        }))
        .unwrap();
        assert!(matches!(
            frame,
            ClientMessage::LocationUpdate { ride_id: None, heading: None, .. }
        ));
    }

    #[test]
    fn withdrawal_frame_shape() {
        let ride_id = Uuid::new_v4();
        let message = ServerMessage::OfferWithdrawn {
            ride_id,
            reason: WithdrawReason::AcceptedByAnotherDriver,
        };

        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(value["type"], "offer_withdrawn");
        assert_eq!(value["reason"], "accepted_by_another_driver");
        assert_eq!(value["ride_id"], json!(ride_id));
    }

    #[test]
    fn status_frame_flattens_update_fields() {
        let update = RideStatusUpdate::new(Uuid::new_v4(), RideStatus::NoDriversAvailable, Utc::now());

        let value = serde_json::to_value(ServerMessage::RideStatus(update)).unwrap();
        assert_eq!(value["type"], "ride_status");
        assert_eq!(value["status"], "no_drivers_available");
    }
}
