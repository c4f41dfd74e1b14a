//! Murmur Core Library
//!
//! Chat models, wire codec, conversation reducer and command handling for
//! Murmur rooms. Nothing in here touches the network; the transport lives in
//! `murmur-net` and the facade wiring both together lives in `murmur-app`.

pub mod agent;
pub mod codec;
pub mod command;
pub mod conversation;
pub mod error;
pub mod invariants;
pub mod models;
pub mod options;
pub mod selection;

pub use agent::{AgentPush, Transcription};
pub use codec::{JsonCodec, MessageCodec};
pub use command::{CommandKind, CommandRequest, ParsedCommand};
pub use conversation::{ChatEvent, Conversation};
pub use error::{Error, Result};
pub use models::*;
pub use options::{ChatOptions, ChatSettings, MessageDefaults, TopicKind, Topics};
pub use selection::Selection;
