//! Realtime transport: the capability the dispatch core pushes through, and
//! the WebSocket connections implementing it.

pub mod hub;
pub mod messages;
pub mod socket;

use thiserror::Error;
use uuid::Uuid;

use crate::services::presence::ConnectionId;

pub use hub::ConnectionHub;
pub use messages::{ClientMessage, ServerMessage};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("driver {0} is not connected")]
    DriverOffline(Uuid),

    #[error("connection {0} is closed")]
    ConnectionClosed(ConnectionId),
}

/// Outbound side of the transport as seen by the dispatch core.
pub trait RealtimeNotifier: Send + Sync {
    fn send_to_driver(&self, driver_id: Uuid, message: ServerMessage) -> Result<(), DeliveryError>;

    /// Returns how many connections the message reached.
    fn broadcast_to_ride(&self, ride_id: Uuid, message: ServerMessage) -> usize;
}
