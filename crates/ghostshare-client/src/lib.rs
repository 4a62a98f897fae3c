//! GhostShare peer client: joins a room through the signaling broker, opens a
//! direct link to the other participant and exchanges files and chat over it.

pub mod config;
pub mod error;
pub mod events;
pub mod peer;
pub mod session;
pub mod signaling;
pub mod transfer;
pub mod transport;
pub mod webrtc_peer;

pub use config::ClientConfig;
pub use error::{ClientError, Result};
pub use events::SessionEvent;
pub use session::{Command, RoomSession};
