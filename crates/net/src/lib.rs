//! Murmur Network Library
//!
//! Rooms are pub-sub sessions carrying opaque payloads on named topics.
//!
//! # Architecture
//!
//! - **Room**: the transport seam; publish on a topic, observe events
//! - **MemoryHub**: in-process rooms for tests and embedding
//! - **RelayServer / RemoteRoom**: one room relayed over TCP
//! - **TopicRegistry**: shared, session-scoped topic subscriptions
//! - **Protocol**: length-prefixed JSON frames
//!
//! # Usage
//!
//! ```ignore
//! // Host a relay
//! let server = RelayServer::start(7331, "lounge", generate_token()).await?;
//!
//! // Join it
//! let room: Arc<dyn Room> =
//!     Arc::new(RemoteRoom::connect(addr, PeerInfo::new("ana"), "lounge", token).await?);
//!
//! // Listen on some topics
//! let registry = TopicRegistry::new();
//! let mut sub = registry.subscribe(&room, ["lk-chat-topic"], 256)?;
//! while let Some(packet) = sub.recv().await {
//!     // handle packet.payload
//! }
//! ```

pub mod client;
pub mod error;
mod frame;
pub mod memory;
pub mod protocol;
pub mod registry;
pub mod room;
pub mod room_url;
pub mod server;

pub use client::{ConnectionState, RemoteRoom};
pub use error::{Error, Result};
pub use frame::MAX_FRAME_SIZE;
pub use memory::{MemoryHub, MemoryRoom};
pub use protocol::{DataPacket, Message, PeerInfo};
pub use registry::{Inbound, Subscription, SubscriptionHandle, TopicRegistry, TopicSet};
pub use room::{PublishOptions, Room, RoomEvent, RoomId};
pub use room_url::RoomUrl;
pub use server::{generate_token, RelayServer, MAX_PEERS};

/// Default port for Murmur relays
pub const DEFAULT_PORT: u16 = 7331;
