//! Message model for room chat

use std::ops::{Deref, DerefMut};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Transport identity of whoever sent a payload
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Participant {
    pub identity: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Participant {
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
}

/// A chat message as carried on the wire
///
/// Field names are snake_case on the wire, except `kind` which travels as
/// `type`. Only `id`, `timestamp` and `message` are required when decoding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    /// Logical send time in epoch milliseconds
    pub timestamp: i64,
    pub message: String,
    #[serde(default)]
    pub is_assistant: bool,
    /// Number of leading words the renderer should emphasize
    #[serde(default)]
    pub highlight_word_count: u32,
    /// Advisory soft-delete flag; never removes the message from a conversation
    #[serde(default)]
    pub deleted: bool,
    #[serde(default)]
    pub participant: String,
    /// Message this one replies to; empty for a root message
    #[serde(default)]
    pub parent_id: String,
    /// Alternative completions at this position, own id first
    #[serde(default)]
    pub alt_ids: Vec<String>,
    #[serde(default)]
    pub conversation_id: String,
    #[serde(default)]
    pub character_id: String,
    #[serde(default)]
    pub model: String,
    #[serde(rename = "type", default)]
    pub kind: String,
}

impl ChatMessage {
    /// Create a root message with the given id and body, stamped now
    pub fn new(id: impl Into<String>, message: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            alt_ids: vec![id.clone()],
            id,
            timestamp: now_millis(),
            message: message.into(),
            is_assistant: false,
            highlight_word_count: 0,
            deleted: false,
            participant: String::new(),
            parent_id: String::new(),
            conversation_id: String::new(),
            character_id: String::new(),
            model: String::new(),
            kind: String::new(),
        }
    }

    /// Create a root message with a fresh unique id
    pub fn with_fresh_id(message: impl Into<String>) -> Self {
        Self::new(Uuid::new_v4().to_string(), message)
    }

    pub fn at(mut self, timestamp: i64) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn is_root(&self) -> bool {
        self.parent_id.is_empty()
    }

    /// Number of branches recorded at this position (at least one)
    pub fn alt_count(&self) -> usize {
        self.alt_ids.len().max(1)
    }

    /// Restore `alt_ids = [id]` when a producer left the branch list empty
    pub fn normalize(&mut self) {
        if self.alt_ids.is_empty() {
            self.alt_ids.push(self.id.clone());
        }
    }

    /// Leading words to emphasize, clamped to the words actually present
    pub fn highlighted_words(&self) -> impl Iterator<Item = &str> {
        self.message
            .split_whitespace()
            .take(self.highlight_word_count as usize)
    }
}

/// A chat message annotated with where it came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceivedChatMessage {
    #[serde(flatten)]
    pub message: ChatMessage,
    /// Transport sender; filled in by the receiving pipeline, never on the wire
    #[serde(skip)]
    pub from: Option<Participant>,
    /// Time of the latest edit, set only once a message has been superseded
    #[serde(
        rename = "editTimestamp",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub edit_timestamp: Option<i64>,
}

impl ReceivedChatMessage {
    pub fn from_participant(message: ChatMessage, from: Option<Participant>) -> Self {
        Self {
            message,
            from,
            edit_timestamp: None,
        }
    }

    pub fn is_edited(&self) -> bool {
        self.edit_timestamp.is_some()
    }

    pub fn sender_identity(&self) -> Option<&str> {
        self.from.as_ref().map(|p| p.identity.as_str())
    }
}

impl From<ChatMessage> for ReceivedChatMessage {
    fn from(message: ChatMessage) -> Self {
        Self::from_participant(message, None)
    }
}

impl Deref for ReceivedChatMessage {
    type Target = ChatMessage;

    fn deref(&self) -> &ChatMessage {
        &self.message
    }
}

impl DerefMut for ReceivedChatMessage {
    fn deref_mut(&mut self) -> &mut ChatMessage {
        &mut self.message
    }
}

/// Current wall-clock time in epoch milliseconds
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}
