//! Wire codec for chat payloads
//!
//! The default codec is UTF-8 JSON. Decoding validates what it parsed and
//! fails closed: a payload missing required fields or carrying an empty id is
//! an error, never a half-filled message.

use tracing::debug;

use crate::error::{Error, Result};
use crate::models::{ChatMessage, ReceivedChatMessage};

/// Encodes and decodes chat payloads
///
/// Alternative codecs must keep these shapes; the reducer does not care about
/// the bytes in between.
pub trait MessageCodec: Send + Sync {
    fn encode(&self, message: &ChatMessage) -> Result<Vec<u8>>;

    fn encode_history(&self, messages: &[ChatMessage]) -> Result<Vec<u8>>;

    fn decode(&self, payload: &[u8]) -> Result<ReceivedChatMessage>;

    fn decode_history(&self, payload: &[u8]) -> Result<Vec<ChatMessage>>;
}

/// UTF-8 JSON codec
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl MessageCodec for JsonCodec {
    fn encode(&self, message: &ChatMessage) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(message)?)
    }

    fn encode_history(&self, messages: &[ChatMessage]) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(messages)?)
    }

    fn decode(&self, payload: &[u8]) -> Result<ReceivedChatMessage> {
        let mut received: ReceivedChatMessage = serde_json::from_slice(payload)?;
        validate(&mut received.message)?;
        Ok(received)
    }

    fn decode_history(&self, payload: &[u8]) -> Result<Vec<ChatMessage>> {
        let mut messages: Vec<ChatMessage> = serde_json::from_slice(payload)?;
        for message in &mut messages {
            validate(message)?;
        }
        Ok(messages)
    }
}

/// Check a decoded message and repair what can be repaired
pub fn validate(message: &mut ChatMessage) -> Result<()> {
    if message.id.trim().is_empty() {
        return Err(Error::InvalidMessage("empty id".into()));
    }
    if message.alt_ids.iter().any(|alt| alt.is_empty()) {
        return Err(Error::InvalidMessage(format!(
            "message {} has an empty alt id",
            message.id
        )));
    }
    if message.alt_ids.is_empty() {
        debug!(message_id = %message.id, "Filling empty alt_ids with own id");
        message.normalize();
    }
    Ok(())
}
