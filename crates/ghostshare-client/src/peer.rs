//! One direct link to a remote participant and its handshake state machine.

use std::sync::Arc;

use bytes::Bytes;
use serde_json::Value;
use tracing::{debug, warn};

use ghostshare_shared::{ClientEvent, ConnId};

use crate::error::{ClientError, Result};
use crate::transport::PeerTransport;

/// Which side of the handshake a link plays. Fixed at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// The joiner: produces the offer
    Initiator,
    /// The existing participant: answers
    Receiver,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Init,
    Signaling,
    Connecting,
    Connected,
    Closed,
}

impl LinkState {
    fn can_become(self, next: LinkState) -> bool {
        use LinkState::*;
        matches!(
            (self, next),
            (Init, Signaling) | (Signaling, Connecting) | (Connecting, Connected)
        ) || (next == Closed && self != Closed)
    }
}

pub struct PeerLink {
    remote: ConnId,
    role: Role,
    state: LinkState,
    transport: Arc<dyn PeerTransport>,
}

impl PeerLink {
    pub fn new(remote: ConnId, role: Role, transport: Arc<dyn PeerTransport>) -> Self {
        Self {
            remote,
            role,
            state: LinkState::Init,
            transport,
        }
    }

    pub fn remote(&self) -> &ConnId {
        &self.remote
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == LinkState::Connected
    }

    fn transition(&mut self, next: LinkState) -> Result<()> {
        if !self.state.can_become(next) {
            return Err(ClientError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        debug!(remote = %self.remote.short(), from = ?self.state, to = ?next, "Link state change");
        self.state = next;
        Ok(())
    }

    fn require_role(&self, expected: Role) -> Result<()> {
        if self.role != expected {
            return Err(ClientError::RoleMismatch { expected });
        }
        Ok(())
    }

    /// Gather the complete offer and wrap it for the broker.
    pub async fn initiate(&mut self, local_id: &ConnId) -> Result<ClientEvent> {
        self.require_role(Role::Initiator)?;
        self.transition(LinkState::Signaling)?;
        let signal = self.transport.local_description().await?;
        self.transition(LinkState::Connecting)?;

        Ok(ClientEvent::SendingSignal {
            user_to_signal: self.remote.clone(),
            caller_id: local_id.clone(),
            signal,
        })
    }

    /// Apply the remote offer and produce the single answer.
    pub async fn accept(&mut self, offer: Value) -> Result<ClientEvent> {
        self.require_role(Role::Receiver)?;
        self.transition(LinkState::Signaling)?;
        self.transport.apply_remote_description(offer).await?;
        let signal = self.transport.local_description().await?;
        self.transition(LinkState::Connecting)?;

        Ok(ClientEvent::ReturningSignal {
            caller_id: self.remote.clone(),
            signal,
        })
    }

    /// Apply the returned answer on the initiating side.
    pub async fn complete(&mut self, answer: Value) -> Result<()> {
        self.require_role(Role::Initiator)?;
        if self.state != LinkState::Connecting {
            return Err(ClientError::InvalidTransition {
                from: self.state,
                to: LinkState::Connecting,
            });
        }
        self.transport.apply_remote_description(answer).await
    }

    pub fn on_connected(&mut self) -> Result<()> {
        self.transition(LinkState::Connected)
    }

    /// Tear the link down. Closing twice is a no-op.
    pub async fn close(&mut self) {
        if self.state == LinkState::Closed {
            return;
        }
        self.state = LinkState::Closed;
        self.transport.close().await;
        debug!(remote = %self.remote.short(), "Link closed");
    }

    /// Send one frame. Returns `false` without sending unless connected.
    pub async fn send(&self, data: Bytes) -> bool {
        if !self.is_connected() {
            return false;
        }
        match self.transport.send(data).await {
            Ok(()) => true,
            Err(e) => {
                warn!(remote = %self.remote.short(), error = %e, "Send failed");
                false
            }
        }
    }
}
