//! In-process rooms
//!
//! A [`MemoryHub`] plays the part of a room server inside one process. Every
//! [`MemoryRoom`] joined to the hub receives what the others publish. Useful
//! for tests and for embedding several clients (an agent and a user, or two
//! views of the same user) in one binary.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::protocol::{DataPacket, PeerInfo};
use crate::room::{PublishOptions, Room, RoomEvent, RoomId, ROOM_EVENT_CAPACITY};

struct Member {
    peer: PeerInfo,
    events: broadcast::Sender<RoomEvent>,
}

#[derive(Default)]
struct HubState {
    members: HashMap<RoomId, Member>,
}

/// Shared in-process room
#[derive(Clone, Default)]
pub struct MemoryHub {
    state: Arc<Mutex<HubState>>,
}

impl MemoryHub {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, HubState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Join the hub as `peer`
    pub fn join(&self, peer: PeerInfo) -> MemoryRoom {
        let id = RoomId::new();
        let (events, _) = broadcast::channel(ROOM_EVENT_CAPACITY);

        {
            let mut state = self.state();
            for member in state.members.values() {
                let _ = member
                    .events
                    .send(RoomEvent::ParticipantJoined(peer.clone()));
            }
            state.members.insert(
                id,
                Member {
                    peer: peer.clone(),
                    events: events.clone(),
                },
            );
        }

        info!(room_id = %id, identity = %peer.identity, "Joined memory room");

        MemoryRoom {
            id,
            peer,
            hub: self.clone(),
            events,
            connected: AtomicBool::new(true),
        }
    }

    /// Everyone currently joined
    pub fn participants(&self) -> Vec<PeerInfo> {
        self.state()
            .members
            .values()
            .map(|m| m.peer.clone())
            .collect()
    }

    fn deliver(&self, sender: RoomId, packet: DataPacket) -> usize {
        let state = self.state();
        let mut delivered = 0;
        for (id, member) in &state.members {
            if *id != sender && member.events.send(RoomEvent::Data(packet.clone())).is_ok() {
                delivered += 1;
            }
        }
        delivered
    }

    fn leave(&self, id: RoomId) {
        let mut state = self.state();
        if let Some(member) = state.members.remove(&id) {
            for other in state.members.values() {
                let _ = other.events.send(RoomEvent::ParticipantLeft {
                    identity: member.peer.identity.clone(),
                });
            }
        }
    }
}

/// One participant's session on a [`MemoryHub`]
pub struct MemoryRoom {
    id: RoomId,
    peer: PeerInfo,
    hub: MemoryHub,
    events: broadcast::Sender<RoomEvent>,
    connected: AtomicBool,
}

impl MemoryRoom {
    /// Leave the hub. Subscribers see [`RoomEvent::Disconnected`].
    pub fn disconnect(&self) {
        if self.connected.swap(false, Ordering::SeqCst) {
            self.hub.leave(self.id);
            let _ = self.events.send(RoomEvent::Disconnected);
            info!(room_id = %self.id, "Left memory room");
        }
    }
}

impl Drop for MemoryRoom {
    fn drop(&mut self) {
        self.disconnect();
    }
}

#[async_trait]
impl Room for MemoryRoom {
    fn id(&self) -> RoomId {
        self.id
    }

    fn local_participant(&self) -> PeerInfo {
        self.peer.clone()
    }

    async fn publish(&self, payload: Vec<u8>, options: PublishOptions) -> Result<()> {
        if !self.is_connected() {
            return Err(Error::NotConnected);
        }
        let packet = DataPacket::new(payload, options.topic, Some(self.peer.clone()));
        let delivered = self.hub.deliver(self.id, packet);
        debug!(room_id = %self.id, delivered, "Published to memory room");
        Ok(())
    }

    fn events(&self) -> broadcast::Receiver<RoomEvent> {
        self.events.subscribe()
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}
