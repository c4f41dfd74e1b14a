//! Topic subscription registry
//!
//! Several consumers may listen to the same topics of the same room. The
//! registry keeps one underlying room subscription (a pump task) per
//! `(room, topic set)` and fans its packets out to every consumer.
//!
//! Lifecycle:
//! - an entry is created on first subscribe
//! - dropping a [`Subscription`] releases only that consumer; the entry goes
//!   away with its last consumer
//! - when a room reports [`RoomEvent::Disconnected`] every entry of that room
//!   is cleared and its consumers see end-of-stream
//!
//! The registry is an explicit object. Whoever owns the room lifecycle creates
//! it and hands clones to the consumers.

use std::collections::hash_map::Entry as MapEntry;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::protocol::DataPacket;
use crate::room::{Room, RoomEvent, RoomId};

/// Set of topic names a subscription listens on
pub type TopicSet = BTreeSet<String>;

type Key = (RoomId, TopicSet);

struct Entry {
    sender: broadcast::Sender<DataPacket>,
    subscribers: HashSet<u64>,
    pump: JoinHandle<()>,
}

#[derive(Default)]
struct RegistryState {
    entries: HashMap<Key, Entry>,
    next_subscriber: u64,
}

fn lock(state: &Mutex<RegistryState>) -> MutexGuard<'_, RegistryState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Shared registry of room topic subscriptions
#[derive(Clone, Default)]
pub struct TopicRegistry {
    state: Arc<Mutex<RegistryState>>,
}

impl TopicRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to `topics` on `room`
    ///
    /// Must be called from within a tokio runtime; the first subscriber of a
    /// key spawns the pump task.
    pub fn subscribe<I, S>(
        &self,
        room: &Arc<dyn Room>,
        topics: I,
        capacity: usize,
    ) -> Result<Subscription>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let topics: TopicSet = topics.into_iter().map(Into::into).collect();
        let key = (room.id(), topics);

        let mut state = lock(&self.state);
        let id = state.next_subscriber;
        state.next_subscriber += 1;

        let entry = match state.entries.entry(key.clone()) {
            MapEntry::Occupied(occupied) => occupied.into_mut(),
            MapEntry::Vacant(vacant) => {
                // Take the receiver before checking the connection so a
                // disconnect in between is still observed by the pump.
                let events = room.events();
                if !room.is_connected() {
                    return Err(Error::NotConnected);
                }

                let (sender, _) = broadcast::channel(capacity.max(1));
                let pump = tokio::spawn(pump(
                    events,
                    sender.clone(),
                    key.clone(),
                    Arc::downgrade(&self.state),
                ));
                info!(room_id = %key.0, topics = ?key.1, "Opened room subscription");
                vacant.insert(Entry {
                    sender,
                    subscribers: HashSet::new(),
                    pump,
                })
            }
        };

        entry.subscribers.insert(id);
        let receiver = entry.sender.subscribe();
        debug!(room_id = %key.0, subscriber = id, "Added subscriber");

        Ok(Subscription {
            handle: SubscriptionHandle {
                id,
                key,
                registry: self.clone(),
            },
            inbound: Inbound { receiver },
        })
    }

    /// Clear every subscription of a room, whoever holds it
    pub fn clear_room(&self, room_id: RoomId) {
        clear_room(&self.state, room_id);
    }

    /// Number of live `(room, topic set)` entries
    pub fn len(&self) -> usize {
        lock(&self.state).entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of consumers currently subscribed to a room
    pub fn subscriber_count(&self, room_id: RoomId) -> usize {
        lock(&self.state)
            .entries
            .iter()
            .filter(|(key, _)| key.0 == room_id)
            .map(|(_, entry)| entry.subscribers.len())
            .sum()
    }

    fn inject(&self, key: &Key, packet: DataPacket) -> bool {
        match lock(&self.state).entries.get(key) {
            Some(entry) => entry.sender.send(packet).is_ok(),
            None => {
                debug!(room_id = %key.0, "Dropping local packet for a released subscription");
                false
            }
        }
    }

    fn release(&self, id: u64, key: &Key) {
        let mut state = lock(&self.state);
        let MapEntry::Occupied(mut occupied) = state.entries.entry(key.clone()) else {
            return;
        };
        occupied.get_mut().subscribers.remove(&id);
        debug!(room_id = %key.0, subscriber = id, "Released subscriber");

        if occupied.get().subscribers.is_empty() {
            let entry = occupied.remove();
            entry.pump.abort();
            info!(room_id = %key.0, topics = ?key.1, "Closed room subscription");
        }
    }
}

fn clear_room(state: &Mutex<RegistryState>, room_id: RoomId) {
    let mut state = lock(state);
    let before = state.entries.len();
    state.entries.retain(|key, entry| {
        if key.0 == room_id {
            entry.pump.abort();
            false
        } else {
            true
        }
    });
    info!(
        room_id = %room_id,
        cleared = before - state.entries.len(),
        "Cleared room subscriptions"
    );
}

/// Forward a room's data packets on the subscribed topics to the fan-out
async fn pump(
    mut events: broadcast::Receiver<RoomEvent>,
    sender: broadcast::Sender<DataPacket>,
    key: Key,
    registry: Weak<Mutex<RegistryState>>,
) {
    let (room_id, topics) = &key;
    loop {
        match events.recv().await {
            Ok(RoomEvent::Data(packet)) => {
                let wanted = packet.topic().is_some_and(|t| topics.contains(t));
                if wanted {
                    // No receivers just means nobody is listening right now
                    let _ = sender.send(packet);
                }
            }
            Ok(RoomEvent::Disconnected) => {
                debug!(room_id = %room_id, "Room disconnected");
                break;
            }
            Ok(_) => {}
            Err(RecvError::Lagged(skipped)) => {
                warn!(room_id = %room_id, skipped, "Room subscription lagged; packets dropped");
            }
            Err(RecvError::Closed) => {
                debug!(room_id = %room_id, "Room event channel closed");
                break;
            }
        }
    }

    if let Some(state) = registry.upgrade() {
        clear_room(&state, *room_id);
    }
}

/// One consumer's subscription
pub struct Subscription {
    handle: SubscriptionHandle,
    inbound: Inbound,
}

impl Subscription {
    /// Separate the release/inject handle from the packet stream
    pub fn split(self) -> (SubscriptionHandle, Inbound) {
        (self.handle, self.inbound)
    }

    pub async fn recv(&mut self) -> Option<DataPacket> {
        self.inbound.recv().await
    }

    pub fn inject(&self, packet: DataPacket) -> bool {
        self.handle.inject(packet)
    }

    pub fn room_id(&self) -> RoomId {
        self.handle.room_id()
    }
}

/// Keeps a subscription alive; releases it on drop
pub struct SubscriptionHandle {
    id: u64,
    key: Key,
    registry: TopicRegistry,
}

impl SubscriptionHandle {
    /// Feed a packet into the shared pipeline as if it had arrived from the
    /// room. Returns `false` if the subscription is gone.
    pub fn inject(&self, packet: DataPacket) -> bool {
        self.registry.inject(&self.key, packet)
    }

    pub fn room_id(&self) -> RoomId {
        self.key.0
    }

    /// Release explicitly
    pub fn close(self) {}
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.registry.release(self.id, &self.key);
    }
}

/// Stream of packets for one consumer
pub struct Inbound {
    receiver: broadcast::Receiver<DataPacket>,
}

impl Inbound {
    /// Next packet; `None` once the subscription has been torn down
    pub async fn recv(&mut self) -> Option<DataPacket> {
        loop {
            match self.receiver.recv().await {
                Ok(packet) => return Some(packet),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Subscriber lagged; packets dropped");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}
