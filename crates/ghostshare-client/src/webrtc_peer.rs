//! [`PeerTransport`] backed by a WebRTC peer connection with one ordered,
//! reliable data channel.
//!
//! Descriptions are exchanged only after ICE gathering has completed, so each
//! side sends exactly one signal and no candidates trickle afterwards.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::{APIBuilder, API};
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::data_channel_state::RTCDataChannelState;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_gatherer_state::RTCIceGathererState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;

use ghostshare_shared::ConnId;

use crate::error::{ClientError, Result};
use crate::peer::Role;
use crate::transport::{LinkEvent, PeerTransport, TransportEvent, TransportFactory};

const DATA_CHANNEL_LABEL: &str = "ghostshare";
const ICE_GATHER_TIMEOUT: Duration = Duration::from_secs(15);

pub struct WebRtcTransportFactory {
    api: API,
    ice_servers: Vec<RTCIceServer>,
}

impl WebRtcTransportFactory {
    /// `stun_server` may be empty to use host candidates only.
    pub fn new(stun_server: &str) -> Result<Self> {
        let mut media = MediaEngine::default();
        let registry = register_default_interceptors(Registry::new(), &mut media)?;
        let api = APIBuilder::new()
            .with_media_engine(media)
            .with_interceptor_registry(registry)
            .build();

        let ice_servers = if stun_server.trim().is_empty() {
            Vec::new()
        } else {
            vec![RTCIceServer {
                urls: vec![stun_server.to_string()],
                ..Default::default()
            }]
        };

        Ok(Self { api, ice_servers })
    }
}

/// State shared with the peer connection callbacks.
struct Shared {
    remote: ConnId,
    events: mpsc::UnboundedSender<LinkEvent>,
    channel: Mutex<Option<Arc<RTCDataChannel>>>,
    opened: AtomicBool,
    closed: AtomicBool,
}

impl Shared {
    fn emit(&self, event: TransportEvent) {
        let _ = self.events.send(LinkEvent {
            remote: self.remote.clone(),
            event,
        });
    }

    fn emit_open(&self) {
        if !self.opened.swap(true, Ordering::SeqCst) {
            self.emit(TransportEvent::Connected);
        }
    }

    fn emit_closed(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.emit(TransportEvent::Closed);
        }
    }
}

async fn attach_channel(shared: Arc<Shared>, dc: Arc<RTCDataChannel>) {
    let on_open = shared.clone();
    dc.on_open(Box::new(move || {
        let shared = on_open.clone();
        Box::pin(async move {
            debug!(remote = %shared.remote.short(), "Data channel open");
            shared.emit_open();
        })
    }));

    let on_close = shared.clone();
    dc.on_close(Box::new(move || {
        let shared = on_close.clone();
        Box::pin(async move {
            shared.emit_closed();
        })
    }));

    let on_message = shared.clone();
    dc.on_message(Box::new(move |msg: DataChannelMessage| {
        let shared = on_message.clone();
        Box::pin(async move {
            shared.emit(TransportEvent::Data(msg.data));
        })
    }));

    if dc.ready_state() == RTCDataChannelState::Open {
        shared.emit_open();
    }
    *shared.channel.lock().await = Some(dc);
}

pub struct WebRtcTransport {
    role: Role,
    pc: Arc<RTCPeerConnection>,
    shared: Arc<Shared>,
}

impl WebRtcTransport {
    /// Set `description` as local and wait until ICE gathering is complete.
    async fn gather(&self, description: RTCSessionDescription) -> Result<Value> {
        let (tx, rx) = oneshot::channel::<()>();
        let tx = Arc::new(std::sync::Mutex::new(Some(tx)));
        self.pc.on_ice_gathering_state_change(Box::new(move |state| {
            let tx = tx.clone();
            Box::pin(async move {
                if state == RTCIceGathererState::Complete {
                    if let Ok(mut guard) = tx.lock() {
                        if let Some(tx) = guard.take() {
                            let _ = tx.send(());
                        }
                    }
                }
            })
        }));

        self.pc.set_local_description(description).await?;

        timeout(ICE_GATHER_TIMEOUT, rx)
            .await
            .map_err(|_| ClientError::Transport("ICE gathering timed out".into()))?
            .map_err(|_| ClientError::Transport("ICE gathering aborted".into()))?;

        let local = self
            .pc
            .local_description()
            .await
            .ok_or_else(|| ClientError::Transport("no local description after gathering".into()))?;
        Ok(serde_json::to_value(local)?)
    }
}

#[async_trait]
impl PeerTransport for WebRtcTransport {
    async fn local_description(&self) -> Result<Value> {
        let description = match self.role {
            Role::Initiator => self.pc.create_offer(None).await?,
            Role::Receiver => self.pc.create_answer(None).await?,
        };
        self.gather(description).await
    }

    async fn apply_remote_description(&self, description: Value) -> Result<()> {
        let description: RTCSessionDescription = serde_json::from_value(description)?;
        self.pc.set_remote_description(description).await?;
        Ok(())
    }

    async fn send(&self, data: Bytes) -> Result<()> {
        let channel = self.shared.channel.lock().await.clone();
        let channel = channel.ok_or_else(|| ClientError::Transport("data channel not open".into()))?;
        channel.send(&data).await?;
        Ok(())
    }

    async fn close(&self) {
        if let Err(e) = self.pc.close().await {
            debug!(remote = %self.shared.remote.short(), error = %e, "Closing peer connection failed");
        }
        self.shared.emit_closed();
    }
}

#[async_trait]
impl TransportFactory for WebRtcTransportFactory {
    async fn create(
        &self,
        remote: &ConnId,
        role: Role,
        events: mpsc::UnboundedSender<LinkEvent>,
    ) -> Result<Arc<dyn PeerTransport>> {
        let pc = Arc::new(
            self.api
                .new_peer_connection(RTCConfiguration {
                    ice_servers: self.ice_servers.clone(),
                    ..Default::default()
                })
                .await?,
        );

        let shared = Arc::new(Shared {
            remote: remote.clone(),
            events,
            channel: Mutex::new(None),
            opened: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        });

        let on_state = shared.clone();
        pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            let shared = on_state.clone();
            Box::pin(async move {
                debug!(remote = %shared.remote.short(), ?state, "Peer connection state");
                if matches!(
                    state,
                    RTCPeerConnectionState::Failed | RTCPeerConnectionState::Closed
                ) {
                    shared.emit_closed();
                }
            })
        }));

        match role {
            Role::Initiator => {
                let dc = pc.create_data_channel(DATA_CHANNEL_LABEL, None).await?;
                attach_channel(shared.clone(), dc).await;
            }
            Role::Receiver => {
                let on_channel = shared.clone();
                pc.on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
                    let shared = on_channel.clone();
                    Box::pin(async move {
                        if dc.label() != DATA_CHANNEL_LABEL {
                            warn!(label = %dc.label(), "Accepting data channel with unexpected label");
                        }
                        attach_channel(shared, dc).await;
                    })
                }));
            }
        }

        info!(remote = %remote.short(), ?role, "Created peer connection");
        Ok(Arc::new(WebRtcTransport { role, pc, shared }))
    }
}
