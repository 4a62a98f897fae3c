//! Signaling relay.
//!
//! Keeps one outbound queue per live connection and forwards handshake
//! envelopes between them. Payloads are never inspected. Delivery is
//! at-most-once: a missing target or a full queue drops the event.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};
use tracing::debug;

use ghostshare_shared::{ConnId, ServerEvent, SignalEnvelope};

/// Per-connection outbound queue depth
const OUTBOUND_QUEUE: usize = 64;

/// Which handshake leg an envelope belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Leg {
    /// Joiner -> existing participant, delivered as `user-joined`
    Initiate,
    /// Existing participant -> joiner, delivered as `receiving-returned-signal`
    Return,
}

#[derive(Clone, Default)]
pub struct Relay {
    connections: Arc<RwLock<HashMap<ConnId, mpsc::Sender<ServerEvent>>>>,
}

impl Relay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a live connection and return the receiving end of its queue.
    pub async fn register(&self, conn_id: ConnId) -> mpsc::Receiver<ServerEvent> {
        let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE);
        self.connections.write().await.insert(conn_id, tx);
        rx
    }

    pub async fn unregister(&self, conn_id: &ConnId) {
        if self.connections.write().await.remove(conn_id).is_some() {
            debug!(conn = %conn_id.short(), "Unregistered connection");
        }
    }

    /// Queue `event` for `target`. Returns whether it was queued.
    pub async fn emit_to(&self, target: &ConnId, event: ServerEvent) -> bool {
        let connections = self.connections.read().await;
        let Some(tx) = connections.get(target) else {
            debug!(target = %target.short(), "Dropping event for unknown connection");
            return false;
        };

        if tx.try_send(event).is_err() {
            debug!(target = %target.short(), "Dropping event for slow or closed connection");
            return false;
        }
        true
    }

    /// Forward a handshake envelope to its target, verbatim.
    pub async fn relay(&self, envelope: SignalEnvelope, leg: Leg) -> bool {
        let target = envelope.target.clone();
        let event = match leg {
            Leg::Initiate => envelope.into_user_joined(),
            Leg::Return => envelope.into_returned_signal(),
        };
        self.emit_to(&target, event).await
    }

    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }
}
