//! Conversation reducer
//!
//! Folds inbound chat events into the current list of messages. Each event is
//! one atomic transition; there is no state carried between events other than
//! the list itself, so events from different producers may interleave freely.
//!
//! Rules:
//! - a message whose id is new is appended
//! - a message whose id is known is an edit: it replaces the entry in place,
//!   keeps the original `timestamp` and records its own as `edit_timestamp`
//! - a history snapshot replaces everything
//! - the list is kept sorted ascending by `timestamp` (stable)

use std::collections::HashSet;

use tracing::{debug, warn};

use crate::codec::MessageCodec;
use crate::error::Result;
use crate::invariants::assert_conversation_invariants;
use crate::models::{ChatMessage, Participant, ReceivedChatMessage};
use crate::options::{TopicKind, Topics};

/// One reducer input
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatEvent {
    /// A new message or an edit of an existing one
    Message(ReceivedChatMessage),
    /// Authoritative snapshot replacing the conversation
    History(Vec<ChatMessage>),
}

impl ChatEvent {
    /// Decode a raw payload according to the topic it arrived on
    ///
    /// Returns `Ok(None)` for topics the reducer does not consume.
    pub fn decode(
        topic: &str,
        payload: &[u8],
        from: Option<Participant>,
        codec: &dyn MessageCodec,
        topics: &Topics,
    ) -> Result<Option<Self>> {
        let event = match topics.classify(topic) {
            Some(TopicKind::Message) => {
                let mut received = codec.decode(payload)?;
                received.from = from;
                ChatEvent::Message(received)
            }
            Some(TopicKind::History) => ChatEvent::History(codec.decode_history(payload)?),
            None => return Ok(None),
        };
        Ok(Some(event))
    }
}

/// The current, de-duplicated and edit-reconciled message list
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Conversation {
    messages: Vec<ReceivedChatMessage>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one event. Returns `true` if the visible list changed.
    pub fn apply(&mut self, event: ChatEvent) -> bool {
        let changed = match event {
            ChatEvent::Message(incoming) => self.apply_message(incoming),
            ChatEvent::History(snapshot) => {
                self.replace(snapshot);
                true
            }
        };

        if changed {
            self.messages.sort_by_key(|m| m.timestamp);
            assert_conversation_invariants(&self.messages);
        }
        changed
    }

    /// Decode and apply a raw payload
    ///
    /// A payload that fails to decode is logged and dropped; the conversation
    /// is left untouched and later payloads are unaffected.
    pub fn ingest(
        &mut self,
        topic: &str,
        payload: &[u8],
        from: Option<Participant>,
        codec: &dyn MessageCodec,
        topics: &Topics,
    ) -> bool {
        match ChatEvent::decode(topic, payload, from, codec, topics) {
            Ok(Some(event)) => self.apply(event),
            Ok(None) => {
                debug!(topic = %topic, "Ignoring payload on non-chat topic");
                false
            }
            Err(e) => {
                warn!(topic = %topic, error = %e, "Dropping undecodable chat payload");
                false
            }
        }
    }

    fn apply_message(&mut self, mut incoming: ReceivedChatMessage) -> bool {
        incoming.normalize();
        let Some(index) = self.position_of(&incoming.id) else {
            debug!(message_id = %incoming.id, "Appending message");
            // Nothing superseded yet, whatever the sender claimed
            incoming.edit_timestamp = None;
            self.messages.push(incoming);
            return true;
        };
        let existing = &mut self.messages[index];

        // A repeat of identical content (local echo meeting its network copy)
        if existing.message == incoming.message {
            return false;
        }

        debug!(message_id = %incoming.id, "Reconciling edit");
        let original_timestamp = existing.timestamp;
        let edit_timestamp = incoming.timestamp;
        *existing = ReceivedChatMessage {
            edit_timestamp: Some(edit_timestamp),
            ..incoming
        };
        existing.message.timestamp = original_timestamp;
        true
    }

    fn replace(&mut self, snapshot: Vec<ChatMessage>) {
        let mut seen = HashSet::with_capacity(snapshot.len());
        let mut messages = Vec::with_capacity(snapshot.len());
        for message in snapshot {
            if !seen.insert(message.id.clone()) {
                warn!(message_id = %message.id, "History snapshot repeats an id; keeping the first");
                continue;
            }
            let mut message = ReceivedChatMessage::from(message);
            message.normalize();
            messages.push(message);
        }
        debug!(count = messages.len(), "Replacing conversation from history");
        self.messages = messages;
    }

    /// Messages in display order
    pub fn messages(&self) -> &[ReceivedChatMessage] {
        &self.messages
    }

    /// Plain wire messages, as a history snapshot would carry them
    pub fn snapshot(&self) -> Vec<ChatMessage> {
        self.messages.iter().map(|m| m.message.clone()).collect()
    }

    pub fn get(&self, id: &str) -> Option<&ReceivedChatMessage> {
        self.messages.iter().find(|m| m.id == id)
    }

    pub fn position_of(&self, id: &str) -> Option<usize> {
        self.messages.iter().position(|m| m.id == id)
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

/// Pure form of [`Conversation::apply`]
pub fn reduce(mut state: Conversation, event: ChatEvent) -> Conversation {
    state.apply(event);
    state
}
