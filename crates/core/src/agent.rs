//! Auxiliary agent payloads
//!
//! The agent shares the room with the chat layer and pushes a few other
//! payloads on their own topics. They never reach the conversation reducer.

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::Result;
use crate::models::now_millis;

pub const TRANSCRIPTION_TOPIC: &str = "transcription";
pub const BACKGROUND_TOPIC: &str = "background";
pub const SD_PROMPT_TOPIC: &str = "sdprompt";
pub const CHARACTER_PROMPT_TOPIC: &str = "character_prompt";
pub const CHARACTER_CARD_TOPIC: &str = "character_card";

/// A speech transcript segment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transcription {
    pub text: String,
    /// Epoch millis; absent or non-positive means "when received"
    #[serde(default)]
    pub timestamp: i64,
    #[serde(default = "default_final")]
    pub is_final: bool,
}

fn default_final() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct BackgroundPayload {
    html: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PromptPayload {
    prompt: Option<String>,
}

/// Something the agent pushed outside the chat topics
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentPush {
    Transcription(Transcription),
    /// Replacement HTML for the canvas/background view
    Background(String),
    /// Image-generation prompt for the canvas
    SdPrompt(String),
}

impl AgentPush {
    /// Decode a payload by topic. `Ok(None)` for unknown topics and for
    /// payloads that carry nothing to show.
    pub fn decode(topic: &str, payload: &[u8]) -> Result<Option<Self>> {
        let push = match topic {
            TRANSCRIPTION_TOPIC => {
                let mut transcription: Transcription = serde_json::from_slice(payload)?;
                if transcription.timestamp <= 0 {
                    transcription.timestamp = now_millis();
                }
                Some(Self::Transcription(transcription))
            }
            BACKGROUND_TOPIC => serde_json::from_slice::<BackgroundPayload>(payload)?
                .html
                .filter(|html| !html.is_empty())
                .map(Self::Background),
            SD_PROMPT_TOPIC => serde_json::from_slice::<PromptPayload>(payload)?
                .prompt
                .filter(|prompt| !prompt.is_empty())
                .map(Self::SdPrompt),
            _ => None,
        };
        Ok(push)
    }

    pub fn topics() -> [&'static str; 3] {
        [TRANSCRIPTION_TOPIC, BACKGROUND_TOPIC, SD_PROMPT_TOPIC]
    }
}

/// `{"topic": "character_prompt", "prompt": ...}`
pub fn encode_character_prompt(prompt: &str) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(&json!({
        "topic": CHARACTER_PROMPT_TOPIC,
        "prompt": prompt,
    }))?)
}

/// `{"topic": "character_card", "character": ...}`
///
/// The card is forwarded as-is; its schema belongs to the agent.
pub fn encode_character_card(card: &serde_json::Value) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(&json!({
        "topic": CHARACTER_CARD_TOPIC,
        "character": card,
    }))?)
}
