//! One client's presence in a room.
//!
//! A single loop owns the broker connection, every peer link and the transfer
//! engine, and handles one event at a time: broker events, link events, local
//! commands, the upload pacing timer and the display reset timer.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

use ghostshare_shared::constants::CHUNK_PACING;
use ghostshare_shared::{ClientEvent, ConnId, RoomId, ServerEvent};

use crate::error::{ClientError, Result};
use crate::events::SessionEvent;
use crate::peer::{PeerLink, Role};
use crate::signaling::SignalingClient;
use crate::transfer::{SinkFactory, TransferEngine, UploadStep};
use crate::transport::{LinkEvent, TransportEvent, TransportFactory};

/// Requests from the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    SendFile(PathBuf),
    SendChat(String),
    Leave,
}

enum Step {
    Broker(Option<ServerEvent>),
    Link(LinkEvent),
    Command(Option<Command>),
    Pace,
    Reset,
}

enum Flow {
    Continue,
    Stop,
}

pub struct RoomSession {
    room: RoomId,
    local_id: Option<ConnId>,
    signaling: SignalingClient,
    signaling_open: bool,
    transports: Arc<dyn TransportFactory>,
    links: HashMap<ConnId, PeerLink>,
    link_tx: mpsc::UnboundedSender<LinkEvent>,
    link_rx: mpsc::UnboundedReceiver<LinkEvent>,
    engine: TransferEngine,
    events: mpsc::UnboundedSender<SessionEvent>,
    next_chunk_at: Option<Instant>,
}

impl RoomSession {
    pub fn new(
        room: RoomId,
        signaling: SignalingClient,
        transports: Arc<dyn TransportFactory>,
        sinks: Arc<dyn SinkFactory>,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Self {
        let (link_tx, link_rx) = mpsc::unbounded_channel();
        Self {
            room,
            local_id: None,
            signaling,
            signaling_open: true,
            transports,
            links: HashMap::new(),
            link_tx,
            link_rx,
            engine: TransferEngine::new(sinks, events.clone()),
            events,
            next_chunk_at: None,
        }
    }

    pub fn room(&self) -> &RoomId {
        &self.room
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }

    fn report(&self, error: &ClientError) {
        warn!(room = %self.room, error = %error, "Session error");
        self.emit(SessionEvent::Error(error.to_string()));
    }

    fn connected_peers(&self) -> usize {
        self.links.values().filter(|l| l.is_connected()).count()
    }

    /// Join the room and run until the user leaves or the room is full.
    pub async fn run(mut self, mut commands: mpsc::Receiver<Command>) -> Result<()> {
        self.signaling.send(ClientEvent::JoinRoom(self.room.clone()))?;
        info!(room = %self.room, "Joining room");

        loop {
            let pace_at = self.next_chunk_at;
            let reset_at = self.engine.next_deadline();

            let step = tokio::select! {
                event = self.signaling.recv(), if self.signaling_open => Step::Broker(event),
                Some(event) = self.link_rx.recv() => Step::Link(event),
                command = commands.recv() => Step::Command(command),
                _ = sleep_until(pace_at.unwrap_or_else(Instant::now)), if pace_at.is_some() => Step::Pace,
                _ = sleep_until(reset_at.unwrap_or_else(Instant::now)), if reset_at.is_some() => Step::Reset,
            };

            let flow = match step {
                Step::Broker(Some(event)) => self.on_broker_event(event).await,
                Step::Broker(None) => {
                    warn!(room = %self.room, "Signaling connection lost, keeping peer links");
                    self.signaling_open = false;
                    Flow::Continue
                }
                Step::Link(event) => {
                    self.on_link_event(event).await;
                    Flow::Continue
                }
                Step::Command(Some(command)) => self.on_command(command).await,
                Step::Command(None) => Flow::Stop,
                Step::Pace => {
                    self.pump_upload().await;
                    Flow::Continue
                }
                Step::Reset => {
                    self.engine.expire(Instant::now());
                    Flow::Continue
                }
            };

            if let Flow::Stop = flow {
                break;
            }
        }

        self.shutdown().await;
        Ok(())
    }

    async fn shutdown(&mut self) {
        for (_, mut link) in self.links.drain() {
            link.close().await;
        }
        self.next_chunk_at = None;
        info!(room = %self.room, "Left room");
    }

    // ---- Broker ----

    async fn on_broker_event(&mut self, event: ServerEvent) -> Flow {
        match event {
            ServerEvent::Connected { id } => {
                debug!(id = %id.short(), "Registered with broker");
                self.local_id = Some(id.clone());
                self.emit(SessionEvent::Registered { id });
            }
            ServerEvent::AllUsers(peers) => {
                info!(room = %self.room, peers = peers.len(), "Joined room");
                self.emit(SessionEvent::Joined {
                    room: self.room.clone(),
                    peers: peers.len(),
                });
                for peer in peers {
                    if let Err(e) = self.initiate(peer.clone()).await {
                        self.report(&e);
                        self.drop_link(&peer).await;
                    }
                }
            }
            ServerEvent::UserJoined { signal, caller_id } => {
                if let Err(e) = self.answer(caller_id.clone(), signal).await {
                    self.report(&e);
                    self.drop_link(&caller_id).await;
                }
            }
            ServerEvent::ReceivingReturnedSignal { signal, id } => {
                self.complete(&id, signal).await;
            }
            ServerEvent::RoomFull => {
                warn!(room = %self.room, "Room is full");
                self.emit(SessionEvent::RoomFull {
                    room: self.room.clone(),
                });
                return Flow::Stop;
            }
        }
        Flow::Continue
    }

    async fn initiate(&mut self, remote: ConnId) -> Result<()> {
        if self.links.contains_key(&remote) || self.local_id.as_ref() == Some(&remote) {
            debug!(remote = %remote.short(), "Ignoring duplicate participant");
            return Ok(());
        }
        let local_id = self.local_id.clone().unwrap_or_else(|| ConnId::from(""));

        let transport = self
            .transports
            .create(&remote, Role::Initiator, self.link_tx.clone())
            .await?;
        let link = self
            .links
            .entry(remote.clone())
            .or_insert_with(|| PeerLink::new(remote, Role::Initiator, transport));

        let offer = link.initiate(&local_id).await?;
        self.signaling.send(offer)
    }

    async fn answer(&mut self, remote: ConnId, offer: Value) -> Result<()> {
        if self.links.contains_key(&remote) {
            debug!(remote = %remote.short(), "Ignoring repeated offer");
            return Ok(());
        }

        let transport = self
            .transports
            .create(&remote, Role::Receiver, self.link_tx.clone())
            .await?;
        let link = self
            .links
            .entry(remote.clone())
            .or_insert_with(|| PeerLink::new(remote, Role::Receiver, transport));

        let answer = link.accept(offer).await?;
        self.signaling.send(answer)
    }

    async fn complete(&mut self, remote: &ConnId, answer: Value) {
        let result = match self.links.get_mut(remote) {
            Some(link) if link.role() == Role::Initiator => link.complete(answer).await,
            Some(_) => {
                warn!(remote = %remote.short(), "Returned signal for a receiving link, ignoring");
                return;
            }
            None => {
                warn!(remote = %remote.short(), "Returned signal for unknown peer, ignoring");
                return;
            }
        };
        if let Err(e) = result {
            self.report(&e);
            self.drop_link(remote).await;
        }
    }

    async fn drop_link(&mut self, remote: &ConnId) {
        if let Some(mut link) = self.links.remove(remote) {
            link.close().await;
        }
    }

    // ---- Links ----

    async fn on_link_event(&mut self, LinkEvent { remote, event }: LinkEvent) {
        match event {
            TransportEvent::Connected => {
                let Some(link) = self.links.get_mut(&remote) else {
                    return;
                };
                match link.on_connected() {
                    Ok(()) => {
                        info!(remote = %remote.short(), "Peer connected");
                        self.emit(SessionEvent::PeerConnected { peer: remote });
                    }
                    Err(e) => debug!(remote = %remote.short(), error = %e, "Ignoring connect"),
                }
            }
            TransportEvent::Data(data) => {
                if !self.links.contains_key(&remote) {
                    return;
                }
                if let Err(e) = self.engine.handle_frame(data).await {
                    self.report(&e);
                }
            }
            TransportEvent::Closed => {
                let Some(mut link) = self.links.remove(&remote) else {
                    return;
                };
                link.close().await;
                info!(remote = %remote.short(), "Peer disconnected");
                self.emit(SessionEvent::PeerDisconnected { peer: remote });

                self.engine.abort_download().await;
                if self.connected_peers() == 0 {
                    self.engine.abort_upload();
                    self.next_chunk_at = None;
                }
            }
        }
    }

    // ---- Commands ----

    async fn on_command(&mut self, command: Command) -> Flow {
        let result = match command {
            Command::Leave => return Flow::Stop,
            Command::SendChat(text) => self.send_chat(&text).await,
            Command::SendFile(path) => self.send_file(path).await,
        };
        if let Err(e) = result {
            self.report(&e);
        }
        Flow::Continue
    }

    async fn send_chat(&mut self, text: &str) -> Result<()> {
        if self.connected_peers() == 0 {
            return Err(ClientError::NotConnected);
        }
        if let Some(frame) = self.engine.outgoing_chat(text)? {
            broadcast(&self.links, frame).await;
        }
        Ok(())
    }

    async fn send_file(&mut self, path: PathBuf) -> Result<()> {
        if self.connected_peers() == 0 {
            return Err(ClientError::NotConnected);
        }
        if self.engine.is_uploading() {
            return Err(ClientError::TransferInProgress);
        }

        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| ClientError::InvalidFile(path.display().to_string()))?
            .to_string();
        let file = tokio::fs::File::open(&path).await?;
        let metadata = file.metadata().await?;
        if !metadata.is_file() {
            return Err(ClientError::InvalidFile(path.display().to_string()));
        }

        let header = self
            .engine
            .start_upload(&file_name, metadata.len(), "", Box::new(file))?;
        broadcast(&self.links, header).await;
        self.next_chunk_at = Some(Instant::now());
        Ok(())
    }

    async fn pump_upload(&mut self) {
        match self.engine.next_upload_step().await {
            Ok(Some(UploadStep::Chunk(chunk))) => {
                broadcast(&self.links, chunk).await;
                self.next_chunk_at = Some(Instant::now() + CHUNK_PACING);
            }
            Ok(Some(UploadStep::End(end))) => {
                broadcast(&self.links, end).await;
                self.next_chunk_at = None;
            }
            Ok(None) => self.next_chunk_at = None,
            Err(e) => {
                self.next_chunk_at = None;
                self.report(&e);
            }
        }
    }
}

/// Send `frame` on every connected link. Returns how many took it.
async fn broadcast(links: &HashMap<ConnId, PeerLink>, frame: Bytes) -> usize {
    let mut sent = 0;
    for link in links.values() {
        if link.send(frame.clone()).await {
            sent += 1;
        }
    }
    sent
}
