//! Types shared by the GhostShare broker and client: connection and room
//! identifiers, the broker wire protocol, and protocol constants.

pub mod constants;
pub mod error;
pub mod protocol;
pub mod types;

pub use error::ProtocolError;
pub use protocol::{ClientEvent, ServerEvent, SignalEnvelope};
pub use types::{ConnId, RoomId};
