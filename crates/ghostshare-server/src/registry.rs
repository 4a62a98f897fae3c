use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info};

use ghostshare_shared::constants::ROOM_CAPACITY;
use ghostshare_shared::{ConnId, RoomId};

use crate::error::ServerError;

/// One ephemeral pairing scope. Members are kept in join order.
#[derive(Debug, Clone)]
pub struct Room {
    pub room_id: RoomId,
    participants: Vec<ConnId>,
}

impl Room {
    pub fn new(room_id: RoomId) -> Self {
        Self {
            room_id,
            participants: Vec::with_capacity(ROOM_CAPACITY),
        }
    }

    /// Admit `conn_id` and return the members that were already present.
    /// A full room is left untouched.
    fn admit(&mut self, conn_id: &ConnId) -> Result<Vec<ConnId>, ServerError> {
        if self.participants.contains(conn_id) {
            return Ok(self.others(conn_id));
        }
        if self.is_full() {
            return Err(ServerError::RoomFull(self.room_id.clone()));
        }

        let existing = self.participants.clone();
        self.participants.push(conn_id.clone());

        info!(
            room = %self.room_id,
            conn = %conn_id.short(),
            participants = self.participants.len(),
            "Participant joined room"
        );

        Ok(existing)
    }

    fn remove(&mut self, conn_id: &ConnId) -> bool {
        let before = self.participants.len();
        self.participants.retain(|id| id != conn_id);
        before != self.participants.len()
    }

    fn others(&self, conn_id: &ConnId) -> Vec<ConnId> {
        self.participants
            .iter()
            .filter(|id| *id != conn_id)
            .cloned()
            .collect()
    }

    pub fn participants(&self) -> &[ConnId] {
        &self.participants
    }

    pub fn participant_count(&self) -> usize {
        self.participants.len()
    }

    pub fn is_full(&self) -> bool {
        self.participants.len() >= ROOM_CAPACITY
    }

    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }
}

/// Room membership for the whole broker.
///
/// The map is the only state mutated by independent connections, so every
/// join and leave runs under its write lock.
#[derive(Clone, Default)]
pub struct Registry {
    rooms: Arc<RwLock<HashMap<RoomId, Room>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Join a room (creating it if missing). Returns the participants that
    /// were already there, or `RoomFull` when two members hold it.
    pub async fn join(&self, room_id: &RoomId, conn_id: &ConnId) -> Result<Vec<ConnId>, ServerError> {
        let mut rooms = self.rooms.write().await;
        match rooms.get_mut(room_id) {
            Some(room) => room.admit(conn_id),
            None => {
                let mut room = Room::new(room_id.clone());
                let existing = room.admit(conn_id)?;
                rooms.insert(room_id.clone(), room);
                debug!(room = %room_id, "Created room");
                Ok(existing)
            }
        }
    }

    /// Remove `conn_id` from every room it belongs to and delete rooms that
    /// end up empty. Returns the rooms it was removed from.
    pub async fn leave(&self, conn_id: &ConnId) -> Vec<RoomId> {
        let mut rooms = self.rooms.write().await;
        let mut left = Vec::new();

        rooms.retain(|room_id, room| {
            if room.remove(conn_id) {
                info!(
                    room = %room_id,
                    conn = %conn_id.short(),
                    participants = room.participant_count(),
                    "Participant left room"
                );
                left.push(room_id.clone());
            }
            if room.is_empty() {
                info!(room = %room_id, "Removed empty room");
                return false;
            }
            true
        });

        left
    }

    pub async fn members(&self, room_id: &RoomId) -> Vec<ConnId> {
        self.rooms
            .read()
            .await
            .get(room_id)
            .map(|r| r.participants().to_vec())
            .unwrap_or_default()
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }
}
