//! Boundary to the peer transport library.
//!
//! The session controller only needs complete (non-trickle) session
//! descriptions, an ordered reliable byte channel and three callbacks. The
//! callbacks are delivered as [`LinkEvent`]s on the channel passed to
//! [`TransportFactory::create`], which keeps every link of a session feeding
//! one dispatch loop.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;
use tokio::sync::mpsc;

use ghostshare_shared::ConnId;

use crate::error::Result;
use crate::peer::Role;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The direct channel is open
    Connected,
    /// One inbound frame, in arrival order
    Data(Bytes),
    /// The channel or the underlying connection went away
    Closed,
}

/// A transport event tagged with the remote it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkEvent {
    pub remote: ConnId,
    pub event: TransportEvent,
}

#[async_trait]
pub trait PeerTransport: Send + Sync {
    /// Complete local description, returned only once candidate gathering
    /// has finished. Initiators get an offer, receivers an answer (after
    /// [`apply_remote_description`](Self::apply_remote_description)).
    async fn local_description(&self) -> Result<Value>;

    async fn apply_remote_description(&self, description: Value) -> Result<()>;

    async fn send(&self, data: Bytes) -> Result<()>;

    async fn close(&self);
}

#[async_trait]
pub trait TransportFactory: Send + Sync {
    async fn create(
        &self,
        remote: &ConnId,
        role: Role,
        events: mpsc::UnboundedSender<LinkEvent>,
    ) -> Result<Arc<dyn PeerTransport>>;
}
