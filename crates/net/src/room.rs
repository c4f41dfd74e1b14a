//! Room abstraction
//!
//! A room is a joined session on some pub-sub transport. Payloads are
//! published on named topics and every other participant receives them as
//! [`RoomEvent::Data`]. A room never delivers a participant's own packets back
//! to it.

use std::fmt;

use async_trait::async_trait;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::error::Result;
use crate::protocol::{DataPacket, PeerInfo};

/// Capacity of a room's event channel
pub const ROOM_EVENT_CAPACITY: usize = 256;

/// Identity of a joined room object (not of the remote room it is joined to)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RoomId(Uuid);

impl RoomId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RoomId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How to publish a payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishOptions {
    pub topic: String,
    /// Reliable packets are delivered in order or the publish fails;
    /// unreliable ones may be dropped under back-pressure
    pub reliable: bool,
}

impl PublishOptions {
    pub fn reliable(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            reliable: true,
        }
    }

    pub fn lossy(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            reliable: false,
        }
    }
}

/// Event observed on a room
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoomEvent {
    Data(DataPacket),
    ParticipantJoined(PeerInfo),
    ParticipantLeft { identity: String },
    /// The session ended; no further events follow
    Disconnected,
}

/// A joined room session
#[async_trait]
pub trait Room: Send + Sync {
    /// Identity of this room object
    fn id(&self) -> RoomId;

    /// The participant this session publishes as
    fn local_participant(&self) -> PeerInfo;

    /// Publish a payload on a topic
    async fn publish(&self, payload: Vec<u8>, options: PublishOptions) -> Result<()>;

    /// Subscribe to events from now on
    fn events(&self) -> broadcast::Receiver<RoomEvent>;

    fn is_connected(&self) -> bool;
}
