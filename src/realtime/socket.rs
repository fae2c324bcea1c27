use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use axum_extra::{
    headers::{authorization::Bearer, Authorization},
    TypedHeader,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;

use super::hub::ConnectionHub;
use super::messages::{ClientMessage, ServerMessage};
use crate::entities::user::UserRole;
use crate::error::{AppError, AppResult};
use crate::services::gateway::DispatchGateway;
use crate::services::presence::{ConnectionId, Location};
use crate::utils::jwt::{verify_token, Claims};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct SocketParams {
    pub token: Option<String>,
}

/// Upgrade to a realtime connection once the caller's token checks out.
/// Browsers can't set headers on a WebSocket handshake, hence `?token=`.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(params): Query<SocketParams>,
    bearer: Option<TypedHeader<Authorization<Bearer>>>,
) -> AppResult<Response> {
    let token = params
        .token
        .or_else(|| bearer.map(|TypedHeader(auth)| auth.token().to_string()))
        .ok_or_else(|| AppError::Unauthorized("Missing token".to_string()))?;

    let claims = verify_token(&token, &state.config.jwt_secret)?;

    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, claims)))
}

async fn handle_socket(socket: WebSocket, state: AppState, claims: Claims) {
    let (connection_id, mut outbound) = state.hub.register(claims.sub, claims.role.clone());
    let (mut sink, mut stream) = socket.split();

    tracing::info!(connection_id = %connection_id, user_id = %claims.sub, role = ?claims.role, "Realtime connection opened");

    let writer = tokio::spawn(async move {
        while let Some(message) = outbound.recv().await {
            let text = match serde_json::to_string(&message) {
                Ok(text) => text,
                Err(err) => {
                    tracing::error!(error = %err, "Failed to encode server message");
                    continue;
                }
            };

            if sink.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(frame) = stream.next().await {
        let text = match frame {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => continue,
        };

        match serde_json::from_str::<ClientMessage>(text.as_str()) {
            Ok(message) => {
                handle_client_message(&state.dispatch, &state.hub, connection_id, &claims, message)
                    .await
            }
            Err(err) => {
                tracing::debug!(connection_id = %connection_id, error = %err, "Unparseable client frame");
                reply(
                    &state.hub,
                    connection_id,
                    ServerMessage::Error {
                        message: format!("Invalid message: {err}"),
                    },
                );
            }
        }
    }

    state.dispatch.on_disconnect(connection_id);
    state.hub.unregister(connection_id);
    writer.abort();

    tracing::info!(connection_id = %connection_id, user_id = %claims.sub, "Realtime connection closed");
}

async fn handle_client_message(
    dispatch: &DispatchGateway,
    hub: &ConnectionHub,
    connection_id: ConnectionId,
    claims: &Claims,
    message: ClientMessage,
) {
    let is_driver = claims.role == UserRole::Driver;

    match message {
        ClientMessage::Subscribe { ride_id } => {
            if let Err(err) = dispatch.on_subscribe(ride_id, connection_id, claims.sub).await {
                reply(
                    hub,
                    connection_id,
                    ServerMessage::Error {
                        message: err.to_string(),
                    },
                );
            }
        }
        ClientMessage::Unsubscribe { ride_id } => dispatch.on_unsubscribe(ride_id, connection_id),
        ClientMessage::LocationUpdate {
            latitude,
            longitude,
            heading,
            speed,
            accuracy,
            ride_id,
        } if is_driver => {
            let location = Location {
                latitude,
                longitude,
                heading,
                speed,
                accuracy,
            };
            dispatch
                .on_location_update(claims.sub, connection_id, location, ride_id)
                .await;
        }
        ClientMessage::AcceptRide { ride_id } if is_driver => {
            let result = dispatch.on_driver_accept(ride_id, claims.sub).await;

            reply(
                hub,
                connection_id,
                ServerMessage::AcceptResult {
                    ride_id,
                    success: result.success,
                    message: result.message,
                },
            );
        }
        ClientMessage::RejectRide { ride_id } if is_driver => {
            dispatch.on_driver_reject(ride_id, claims.sub).await;
        }
        _ => reply(
            hub,
            connection_id,
            ServerMessage::Error {
                message: "Only drivers can send this message".to_string(),
            },
        ),
    }
}

fn reply(hub: &ConnectionHub, connection_id: ConnectionId, message: ServerMessage) {
    if let Err(err) = hub.send_to_connection(connection_id, message) {
        tracing::debug!(connection_id = %connection_id, error = %err, "Reply not delivered");
    }
}
