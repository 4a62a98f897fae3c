//! Signaling broker: maps client events onto the registry and the relay.
//!
//! Transport-agnostic so the WebSocket layer only has to move text frames in
//! and out.

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use ghostshare_shared::{ClientEvent, ConnId, ServerEvent, SignalEnvelope};

use crate::error::ServerError;
use crate::registry::Registry;
use crate::relay::{Leg, Relay};

#[derive(Clone, Default)]
pub struct Broker {
    pub registry: Registry,
    pub relay: Relay,
}

impl Broker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assign an identity to a new connection and queue its `connected`
    /// greeting.
    pub async fn connect(&self) -> (ConnId, mpsc::Receiver<ServerEvent>) {
        let conn_id = ConnId::generate();
        let rx = self.relay.register(conn_id.clone()).await;
        self.relay
            .emit_to(&conn_id, ServerEvent::Connected { id: conn_id.clone() })
            .await;
        info!(conn = %conn_id.short(), "Client connected");
        (conn_id, rx)
    }

    /// Parse and handle one text frame from `conn_id`.
    pub async fn handle_text(&self, conn_id: &ConnId, text: &str) -> Result<(), ServerError> {
        let event = ClientEvent::from_text(text)?;
        self.handle(conn_id, event).await;
        Ok(())
    }

    pub async fn handle(&self, conn_id: &ConnId, event: ClientEvent) {
        match event {
            ClientEvent::JoinRoom(room_id) => match self.registry.join(&room_id, conn_id).await {
                Ok(existing) => {
                    debug!(
                        room = %room_id,
                        conn = %conn_id.short(),
                        existing = existing.len(),
                        "Sending existing participants"
                    );
                    self.relay.emit_to(conn_id, ServerEvent::AllUsers(existing)).await;
                }
                Err(ServerError::RoomFull(room_id)) => {
                    info!(room = %room_id, conn = %conn_id.short(), "Rejected join, room is full");
                    self.relay.emit_to(conn_id, ServerEvent::RoomFull).await;
                }
                Err(e) => warn!(conn = %conn_id.short(), error = %e, "Join failed"),
            },

            ClientEvent::SendingSignal {
                user_to_signal,
                caller_id,
                signal,
            } => {
                if &caller_id != conn_id {
                    warn!(
                        conn = %conn_id.short(),
                        claimed = %caller_id.short(),
                        "Caller id does not match connection, using connection id"
                    );
                }
                let envelope = SignalEnvelope {
                    source: conn_id.clone(),
                    target: user_to_signal,
                    signal,
                };
                debug!(from = %conn_id.short(), to = %envelope.target.short(), "Relaying signal");
                self.relay.relay(envelope, Leg::Initiate).await;
            }

            ClientEvent::ReturningSignal { caller_id, signal } => {
                let envelope = SignalEnvelope {
                    source: conn_id.clone(),
                    target: caller_id,
                    signal,
                };
                debug!(from = %conn_id.short(), to = %envelope.target.short(), "Relaying return signal");
                self.relay.relay(envelope, Leg::Return).await;
            }
        }
    }

    /// Tear down everything owned by a closed connection.
    pub async fn disconnect(&self, conn_id: &ConnId) {
        let rooms = self.registry.leave(conn_id).await;
        self.relay.unregister(conn_id).await;
        info!(conn = %conn_id.short(), rooms = rooms.len(), "Client disconnected");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ghostshare_shared::RoomId;
    use serde_json::json;

    async fn greeted(broker: &Broker) -> (ConnId, mpsc::Receiver<ServerEvent>) {
        let (id, mut rx) = broker.connect().await;
        assert_eq!(rx.recv().await, Some(ServerEvent::Connected { id: id.clone() }));
        (id, rx)
    }

    #[tokio::test]
    async fn test_pairing_scenario() {
        let broker = Broker::new();
        let room = RoomId::from("r1");
        let (a, mut a_rx) = greeted(&broker).await;
        let (b, mut b_rx) = greeted(&broker).await;

        broker.handle(&a, ClientEvent::JoinRoom(room.clone())).await;
        assert_eq!(a_rx.recv().await, Some(ServerEvent::AllUsers(vec![])));

        broker.handle(&b, ClientEvent::JoinRoom(room.clone())).await;
        assert_eq!(b_rx.recv().await, Some(ServerEvent::AllUsers(vec![a.clone()])));

        let offer = json!({"type": "offer", "sdp": "o"});
        broker
            .handle(
                &b,
                ClientEvent::SendingSignal {
                    user_to_signal: a.clone(),
                    caller_id: b.clone(),
                    signal: offer.clone(),
                },
            )
            .await;
        assert_eq!(
            a_rx.recv().await,
            Some(ServerEvent::UserJoined {
                signal: offer,
                caller_id: b.clone(),
            })
        );

        let answer = json!({"type": "answer", "sdp": "a"});
        broker
            .handle(
                &a,
                ClientEvent::ReturningSignal {
                    caller_id: b.clone(),
                    signal: answer.clone(),
                },
            )
            .await;
        assert_eq!(
            b_rx.recv().await,
            Some(ServerEvent::ReceivingReturnedSignal {
                signal: answer,
                id: a.clone(),
            })
        );
    }

    #[tokio::test]
    async fn test_third_client_gets_room_full() {
        let broker = Broker::new();
        let room = RoomId::from("r1");
        let (a, _a_rx) = greeted(&broker).await;
        let (b, _b_rx) = greeted(&broker).await;
        let (c, mut c_rx) = greeted(&broker).await;

        broker.handle(&a, ClientEvent::JoinRoom(room.clone())).await;
        broker.handle(&b, ClientEvent::JoinRoom(room.clone())).await;
        broker.handle(&c, ClientEvent::JoinRoom(room.clone())).await;

        assert_eq!(c_rx.recv().await, Some(ServerEvent::RoomFull));
        assert_eq!(broker.registry.members(&room).await, vec![a, b]);
    }

    #[tokio::test]
    async fn test_spoofed_caller_id_is_replaced() {
        let broker = Broker::new();
        let (a, mut a_rx) = greeted(&broker).await;
        let (b, _b_rx) = greeted(&broker).await;

        broker
            .handle(
                &b,
                ClientEvent::SendingSignal {
                    user_to_signal: a.clone(),
                    caller_id: ConnId::from("someone-else"),
                    signal: json!({}),
                },
            )
            .await;

        match a_rx.recv().await {
            Some(ServerEvent::UserJoined { caller_id, .. }) => assert_eq!(caller_id, b),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_disconnect_frees_slot() {
        let broker = Broker::new();
        let room = RoomId::from("r1");
        let (a, _a_rx) = greeted(&broker).await;
        let (b, _b_rx) = greeted(&broker).await;
        let (c, mut c_rx) = greeted(&broker).await;

        broker.handle(&a, ClientEvent::JoinRoom(room.clone())).await;
        broker.handle(&b, ClientEvent::JoinRoom(room.clone())).await;
        broker.disconnect(&a).await;

        broker.handle(&c, ClientEvent::JoinRoom(room.clone())).await;
        assert_eq!(c_rx.recv().await, Some(ServerEvent::AllUsers(vec![b])));
        assert_eq!(broker.relay.connection_count().await, 2);
    }

    #[tokio::test]
    async fn test_malformed_text_is_an_error() {
        let broker = Broker::new();
        let (a, _a_rx) = greeted(&broker).await;
        let err = broker.handle_text(&a, "not json").await.unwrap_err();
        assert!(matches!(err, ServerError::Protocol(_)));
    }
}
