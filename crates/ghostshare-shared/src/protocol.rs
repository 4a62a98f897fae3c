use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProtocolError;
use crate::types::{ConnId, RoomId};

/// Events sent by a client to the broker.
///
/// Each event travels as one WebSocket text frame of the form
/// `{"event": "<name>", "data": <payload>}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ClientEvent {
    /// Ask to be admitted to a room
    JoinRoom(RoomId),

    /// First handshake leg, from the joiner to an existing participant
    #[serde(rename_all = "camelCase")]
    SendingSignal {
        user_to_signal: ConnId,
        caller_id: ConnId,
        signal: Value,
    },

    /// Return handshake leg, back to the joiner
    #[serde(rename_all = "camelCase")]
    ReturningSignal { caller_id: ConnId, signal: Value },
}

/// Events sent by the broker to a client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerEvent {
    /// The connection's own identity, sent once right after the upgrade
    Connected { id: ConnId },

    /// Participants already in the room, sent to the joiner
    AllUsers(Vec<ConnId>),

    /// A newcomer's handshake offer, sent to the existing participant
    #[serde(rename_all = "camelCase")]
    UserJoined { signal: Value, caller_id: ConnId },

    /// The existing participant's answer, delivered to the joiner
    ReceivingReturnedSignal { signal: Value, id: ConnId },

    /// Admission rejected
    RoomFull,
}

/// Opaque handshake payload in flight between two connections.
///
/// The broker only reads `source` and `target`; `signal` belongs to the peer
/// transport library and is forwarded untouched.
#[derive(Debug, Clone, PartialEq)]
pub struct SignalEnvelope {
    pub source: ConnId,
    pub target: ConnId,
    pub signal: Value,
}

impl SignalEnvelope {
    /// Delivery form of the first leg (joiner -> existing participant).
    pub fn into_user_joined(self) -> ServerEvent {
        ServerEvent::UserJoined {
            signal: self.signal,
            caller_id: self.source,
        }
    }

    /// Delivery form of the return leg (existing participant -> joiner).
    pub fn into_returned_signal(self) -> ServerEvent {
        ServerEvent::ReceivingReturnedSignal {
            signal: self.signal,
            id: self.source,
        }
    }
}

impl ClientEvent {
    pub fn to_text(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_text(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }
}

impl ServerEvent {
    pub fn to_text(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_text(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_join_room_wire_shape() {
        let text = ClientEvent::JoinRoom(RoomId::from("r1")).to_text().unwrap();
        assert_eq!(text, r#"{"event":"join-room","data":"r1"}"#);
    }

    #[test]
    fn test_sending_signal_uses_camel_case_fields() {
        let text = r#"{"event":"sending-signal","data":{"userToSignal":"a","callerId":"b","signal":{"type":"offer","sdp":"v=0"}}}"#;
        let event = ClientEvent::from_text(text).unwrap();
        assert_eq!(
            event,
            ClientEvent::SendingSignal {
                user_to_signal: ConnId::from("a"),
                caller_id: ConnId::from("b"),
                signal: json!({"type": "offer", "sdp": "v=0"}),
            }
        );
    }

    #[test]
    fn test_room_full_has_no_payload() {
        let text = ServerEvent::RoomFull.to_text().unwrap();
        assert_eq!(text, r#"{"event":"room-full"}"#);
        assert_eq!(ServerEvent::from_text(&text).unwrap(), ServerEvent::RoomFull);
    }

    #[test]
    fn test_envelope_delivery_forms() {
        let envelope = SignalEnvelope {
            source: ConnId::from("joiner"),
            target: ConnId::from("host"),
            signal: json!({"type": "answer"}),
        };

        match envelope.clone().into_user_joined() {
            ServerEvent::UserJoined { caller_id, .. } => assert_eq!(caller_id.as_str(), "joiner"),
            other => panic!("unexpected event: {other:?}"),
        }
        match envelope.into_returned_signal() {
            ServerEvent::ReceivingReturnedSignal { id, signal } => {
                assert_eq!(id.as_str(), "joiner");
                assert_eq!(signal["type"], "answer");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_unknown_event_is_rejected() {
        assert!(ClientEvent::from_text(r#"{"event":"shout","data":1}"#).is_err());
    }
}
