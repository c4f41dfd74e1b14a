//! Chat options: topic names, outgoing message defaults and codec choice

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::codec::{JsonCodec, MessageCodec};

/// Default topic for new chat messages
pub const CHAT_TOPIC: &str = "lk-chat-topic";
/// Default topic for edits of existing messages
pub const CHAT_UPDATE_TOPIC: &str = "lk-chat-update-topic";
/// Topic carrying full history snapshots
pub const HISTORY_TOPIC: &str = "chat_history_update";
/// Topic carrying commands addressed to the agent
pub const COMMAND_TOPIC: &str = "command";

/// Default capacity of the per-room fan-out channel
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Named topics the chat layer publishes and listens on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Topics {
    pub chat: String,
    pub update: String,
    pub history: String,
    pub command: String,
}

impl Default for Topics {
    fn default() -> Self {
        Self {
            chat: CHAT_TOPIC.to_string(),
            update: CHAT_UPDATE_TOPIC.to_string(),
            history: HISTORY_TOPIC.to_string(),
            command: COMMAND_TOPIC.to_string(),
        }
    }
}

/// How the reducer treats a payload on a given topic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopicKind {
    /// One message, either new or an edit
    Message,
    /// An authoritative snapshot of the whole conversation
    History,
}

impl Topics {
    /// Classify a topic; `None` for topics the reducer does not consume
    pub fn classify(&self, topic: &str) -> Option<TopicKind> {
        if topic == self.history {
            Some(TopicKind::History)
        } else if topic == self.chat || topic == self.update {
            Some(TopicKind::Message)
        } else {
            None
        }
    }

    /// Topics the reducer subscribes to
    pub fn subscribed(&self) -> [&str; 3] {
        [&self.chat, &self.update, &self.history]
    }
}

/// Field values stamped on every message this client originates
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MessageDefaults {
    pub participant: String,
    pub conversation_id: String,
    pub character_id: String,
    pub model: String,
    #[serde(rename = "type")]
    pub kind: String,
}

impl Default for MessageDefaults {
    fn default() -> Self {
        Self {
            participant: String::new(),
            conversation_id: String::new(),
            character_id: String::new(),
            model: String::new(),
            kind: "message".to_string(),
        }
    }
}

/// Serializable part of the chat configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatSettings {
    pub topics: Topics,
    pub defaults: MessageDefaults,
    pub channel_capacity: usize,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            topics: Topics::default(),
            defaults: MessageDefaults::default(),
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

/// Options for a chat facade
#[derive(Clone)]
pub struct ChatOptions {
    pub topics: Topics,
    pub defaults: MessageDefaults,
    pub channel_capacity: usize,
    pub codec: Arc<dyn MessageCodec>,
}

impl ChatOptions {
    /// Replace the wire codec
    pub fn with_codec(mut self, codec: Arc<dyn MessageCodec>) -> Self {
        self.codec = codec;
        self
    }
}

impl Default for ChatOptions {
    fn default() -> Self {
        ChatSettings::default().into()
    }
}

impl From<ChatSettings> for ChatOptions {
    fn from(settings: ChatSettings) -> Self {
        Self {
            topics: settings.topics,
            defaults: settings.defaults,
            channel_capacity: settings.channel_capacity.max(1),
            codec: Arc::new(JsonCodec),
        }
    }
}

impl fmt::Debug for ChatOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChatOptions")
            .field("topics", &self.topics)
            .field("defaults", &self.defaults)
            .field("channel_capacity", &self.channel_capacity)
            .finish_non_exhaustive()
    }
}
