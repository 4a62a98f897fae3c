use thiserror::Error;

use ghostshare_shared::ProtocolError;

use crate::peer::{LinkState, Role};

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Signaling error: {0}")]
    Signaling(String),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("WebRTC error: {0}")]
    WebRtc(#[from] webrtc::Error),

    #[error("Invalid link transition from {from:?} to {to:?}")]
    InvalidTransition { from: LinkState, to: LinkState },

    #[error("Operation requires the {expected:?} role")]
    RoleMismatch { expected: Role },

    #[error("No connected peer")]
    NotConnected,

    #[error("A transfer is already in progress")]
    TransferInProgress,

    #[error("Invalid file: {0}")]
    InvalidFile(String),

    #[error("Message too long: {len} bytes encoded, limit is {max}")]
    MessageTooLong { len: usize, max: usize },

    #[error("Sink error: {0}")]
    Sink(#[source] std::io::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ClientError>;
