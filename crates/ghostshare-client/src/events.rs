use ghostshare_shared::{ConnId, RoomId};

use crate::transfer::{ChatMessage, HistoryEntry, TransferSession};

/// Everything the presentation layer needs to render a room.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// The broker assigned this client its identity
    Registered { id: ConnId },
    /// Admitted to the room; `peers` were already there
    Joined { room: RoomId, peers: usize },
    RoomFull { room: RoomId },
    PeerConnected { peer: ConnId },
    PeerDisconnected { peer: ConnId },
    /// New state of the upload or download slot. `None` means idle.
    Transfer {
        direction: crate::transfer::Direction,
        session: Option<TransferSession>,
    },
    Chat(ChatMessage),
    History(HistoryEntry),
    Error(String),
}
