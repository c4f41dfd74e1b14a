//! Relay protocol message types
//!
//! All messages are JSON-serialized and length-prefixed on the wire. Data
//! payloads are opaque bytes and travel base64-encoded.

use serde::{Deserialize, Serialize};

/// Identity of a room participant
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerInfo {
    pub identity: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl PeerInfo {
    pub fn new(identity: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            name: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Name to show for this peer
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.identity)
    }
}

/// An inbound data payload as seen by a room subscriber
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataPacket {
    pub payload: Vec<u8>,
    pub topic: Option<String>,
    /// Sender, if the transport knows it
    pub from: Option<PeerInfo>,
}

impl DataPacket {
    pub fn new(payload: Vec<u8>, topic: impl Into<String>, from: Option<PeerInfo>) -> Self {
        Self {
            payload,
            topic: Some(topic.into()),
            from,
        }
    }

    pub fn topic(&self) -> Option<&str> {
        self.topic.as_deref()
    }
}

/// Relay protocol messages
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Message {
    /// Client asks to join a room
    JoinRequest {
        room: String,
        token: String,
        peer: PeerInfo,
    },

    /// Server accepts the join
    JoinAccepted {
        room: String,
        participants: Vec<PeerInfo>,
    },

    /// Server rejects the join
    JoinRejected { reason: String },

    /// Topic data. `from` is stamped by the relay; whatever a client puts
    /// there is overwritten.
    Data {
        #[serde(default)]
        topic: Option<String>,
        #[serde(with = "payload_b64")]
        payload: Vec<u8>,
        reliable: bool,
        #[serde(default)]
        from: Option<PeerInfo>,
    },

    /// A peer joined the room
    ParticipantJoined { peer: PeerInfo },

    /// A peer left the room
    ParticipantLeft { identity: String },

    /// Keep-alive
    Ping,

    /// Response to ping
    Pong,

    /// Server is shutting down
    ServerShutdown,
}

impl Message {
    /// Serialize message to JSON bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Deserialize message from JSON bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

mod payload_b64 {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::{de::Error as _, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_payload_is_base64() {
        let msg = Message::Data {
            topic: Some("lk-chat-topic".into()),
            payload: b"{\"id\":\"x\"}".to_vec(),
            reliable: true,
            from: None,
        };

        let bytes = msg.to_bytes().unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["type"], "Data");
        assert!(value["payload"].is_string());

        match Message::from_bytes(&bytes).unwrap() {
            Message::Data { payload, topic, .. } => {
                assert_eq!(payload, b"{\"id\":\"x\"}");
                assert_eq!(topic.as_deref(), Some("lk-chat-topic"));
            }
            _ => panic!("Wrong message type"),
        }
    }

    #[test]
    fn test_bad_base64_rejected() {
        let raw = br#"{"type":"Data","payload":"***","reliable":true}"#;
        assert!(Message::from_bytes(raw).is_err());
    }

    #[test]
    fn test_display_name_falls_back_to_identity() {
        assert_eq!(PeerInfo::new("u-1").display_name(), "u-1");
        assert_eq!(PeerInfo::new("u-1").with_name("Ana").display_name(), "Ana");
    }
}
