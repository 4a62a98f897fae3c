//! Data channel framing.
//!
//! Control messages travel as JSON text frames, file data as raw binary
//! chunks, and the receiver tells them apart by size and parse result. A
//! small binary chunk that happens to be valid JSON with a known `type` is
//! misread as control; large JSON is never parsed. Both peers depend on this
//! exact rule, so it is kept as is.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use ghostshare_shared::constants::CONTROL_FRAME_THRESHOLD;

use crate::error::Result;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ControlMessage {
    /// Starts a file transfer
    #[serde(rename_all = "camelCase")]
    Header {
        file_name: String,
        file_size: u64,
        #[serde(default)]
        file_type: String,
    },

    /// Ends the current file transfer
    End,

    Chat {
        id: String,
        text: String,
        /// Unix milliseconds, set by the sender
        timestamp: i64,
    },
}

impl ControlMessage {
    pub fn encode(&self) -> Result<Bytes> {
        Ok(Bytes::from(serde_json::to_vec(self)?))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Control(ControlMessage),
    Chunk(Bytes),
}

pub fn classify(data: Bytes) -> Frame {
    if data.len() < CONTROL_FRAME_THRESHOLD {
        if let Ok(control) = serde_json::from_slice::<ControlMessage>(&data) {
            return Frame::Control(control);
        }
    }
    Frame::Chunk(data)
}
