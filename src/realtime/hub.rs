use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;
use uuid::Uuid;

use super::{DeliveryError, RealtimeNotifier, ServerMessage};
use crate::entities::user::UserRole;
use crate::services::presence::{ConnectionId, PresenceRegistry};

/// Outbound queue of one live socket plus who is on the other end.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    pub user_id: Uuid,
    pub role: UserRole,
    sender: mpsc::UnboundedSender<ServerMessage>,
}

/// Tracks open sockets and routes pushes to them.
///
/// Drivers are reached through the connection their last location update
/// came from; ride broadcasts go to every subscribed connection.
pub struct ConnectionHub {
    presence: Arc<PresenceRegistry>,
    connections: DashMap<ConnectionId, ConnectionHandle>,
}

impl ConnectionHub {
    pub fn new(presence: Arc<PresenceRegistry>) -> Self {
        Self {
            presence,
            connections: DashMap::new(),
        }
    }

    /// Returns the new connection's id and the queue its writer drains.
    pub fn register(
        &self,
        user_id: Uuid,
        role: UserRole,
    ) -> (ConnectionId, mpsc::UnboundedReceiver<ServerMessage>) {
        let connection_id = Uuid::new_v4();
        let (sender, receiver) = mpsc::unbounded_channel();

        self.connections.insert(
            connection_id,
            ConnectionHandle {
                user_id,
                role,
                sender,
            },
        );

        tracing::debug!(connection_id = %connection_id, user_id = %user_id, "Connection registered");
        (connection_id, receiver)
    }

    pub fn unregister(&self, connection_id: ConnectionId) -> Option<ConnectionHandle> {
        self.connections
            .remove(&connection_id)
            .map(|(_, handle)| handle)
    }

    pub fn send_to_connection(
        &self,
        connection_id: ConnectionId,
        message: ServerMessage,
    ) -> Result<(), DeliveryError> {
        let handle = self
            .connections
            .get(&connection_id)
            .ok_or(DeliveryError::ConnectionClosed(connection_id))?;

        handle
            .sender
            .send(message)
            .map_err(|_| DeliveryError::ConnectionClosed(connection_id))
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }
}

impl RealtimeNotifier for ConnectionHub {
    fn send_to_driver(&self, driver_id: Uuid, message: ServerMessage) -> Result<(), DeliveryError> {
        let presence = self
            .presence
            .get_location(driver_id)
            .ok_or(DeliveryError::DriverOffline(driver_id))?;

        self.send_to_connection(presence.connection_id, message)
    }

    fn broadcast_to_ride(&self, ride_id: Uuid, message: ServerMessage) -> usize {
        self.presence
            .subscribers(ride_id)
            .into_iter()
            .filter(|connection_id| {
                self.send_to_connection(*connection_id, message.clone())
                    .is_ok()
            })
            .count()
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::services::presence::Location;

    fn location() -> Location {
        Location {
            latitude: -6.7924,
            longitude: 39.2083,
            heading: None,
            speed: None,
            accuracy: None,
        }
    }

    fn error_frame() -> ServerMessage {
        ServerMessage::Error {
            message: "ping".to_string(),
        }
    }

    #[test]
    fn driver_is_reached_through_reporting_connection() {
        let presence = Arc::new(PresenceRegistry::new());
        let hub = ConnectionHub::new(presence.clone());
        let driver_id = Uuid::new_v4();

        let (connection_id, mut rx) = hub.register(driver_id, UserRole::Driver);
        presence.record_location(driver_id, connection_id, location(), Utc::now());

        hub.send_to_driver(driver_id, error_frame()).unwrap();
        assert_eq!(rx.try_recv().unwrap(), error_frame());
    }

    #[test]
    fn offline_driver_is_reported() {
        let hub = ConnectionHub::new(Arc::new(PresenceRegistry::new()));
        let driver_id = Uuid::new_v4();

        assert_eq!(
            hub.send_to_driver(driver_id, error_frame()),
            Err(DeliveryError::DriverOffline(driver_id))
        );
    }

    #[test]
    fn dropped_receiver_means_closed_connection() {
        let presence = Arc::new(PresenceRegistry::new());
        let hub = ConnectionHub::new(presence.clone());
        let driver_id = Uuid::new_v4();

        let (connection_id, rx) = hub.register(driver_id, UserRole::Driver);
        presence.record_location(driver_id, connection_id, location(), Utc::now());
        drop(rx);

        assert_eq!(
            hub.send_to_driver(driver_id, error_frame()),
            Err(DeliveryError::ConnectionClosed(connection_id))
        );
    }

    #[test]
    fn broadcast_reaches_live_subscribers_only() {
        let presence = Arc::new(PresenceRegistry::new());
        let hub = ConnectionHub::new(presence.clone());
        let ride_id = Uuid::new_v4();

        let (rider_conn, mut rider_rx) = hub.register(Uuid::new_v4(), UserRole::Rider);
        let (watcher_conn, mut watcher_rx) = hub.register(Uuid::new_v4(), UserRole::Rider);
        let (gone_conn, _) = hub.register(Uuid::new_v4(), UserRole::Rider);
        hub.unregister(gone_conn);

        presence.subscribe(ride_id, rider_conn);
        presence.subscribe(ride_id, watcher_conn);
        presence.subscribe(ride_id, gone_conn);

        assert_eq!(hub.broadcast_to_ride(ride_id, error_frame()), 2);
        assert!(rider_rx.try_recv().is_ok());
        assert!(watcher_rx.try_recv().is_ok());
        assert_eq!(hub.broadcast_to_ride(Uuid::new_v4(), error_frame()), 0);
    }
}
