//! App configuration
//!
//! Optional TOML file, by default `murmur.toml` in the platform config dir:
//!
//! ```toml
//! [identity]
//! identity = "ana"
//! name = "Ana"
//!
//! [topics]
//! chat = "lk-chat-topic"
//!
//! [conversation]
//! conversation_id = "c-1"
//! type = "message"
//! ```
//!
//! Every key is optional. Command line flags override the file.

use std::fs;
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use murmur_core::options::DEFAULT_CHANNEL_CAPACITY;
use murmur_core::{ChatOptions, ChatSettings, MessageDefaults, Topics};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::Result;

const CONFIG_FILE: &str = "murmur.toml";

/// Who this client is in the room
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    pub identity: Option<String>,
    pub name: Option<String>,
}

/// Values stamped on outgoing messages
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversationConfig {
    pub conversation_id: String,
    pub character_id: String,
    pub model: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub channel_capacity: usize,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        let defaults = MessageDefaults::default();
        Self {
            conversation_id: defaults.conversation_id,
            character_id: defaults.character_id,
            model: defaults.model,
            kind: defaults.kind,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub identity: IdentityConfig,
    pub topics: Topics,
    pub conversation: ConversationConfig,
}

impl AppConfig {
    /// `murmur.toml` in the platform config dir, if there is one
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("dev", "onyx", "murmur").map(|dirs| dirs.config_dir().join(CONFIG_FILE))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        let config = toml::from_str(&raw)?;
        info!(path = %path.display(), "Loaded config");
        Ok(config)
    }

    /// Load an explicit path (which must exist), else the default path if
    /// present, else defaults
    pub fn load_or_default(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        match Self::default_path() {
            Some(path) if path.exists() => Self::load(&path),
            _ => {
                debug!("No config file; using defaults");
                Ok(Self::default())
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Facade options for a client speaking as `identity`
    pub fn chat_options(&self, identity: &str) -> ChatOptions {
        let conversation = &self.conversation;
        ChatSettings {
            topics: self.topics.clone(),
            defaults: MessageDefaults {
                participant: identity.to_string(),
                conversation_id: conversation.conversation_id.clone(),
                character_id: conversation.character_id.clone(),
                model: conversation.model.clone(),
                kind: conversation.kind.clone(),
            },
            channel_capacity: conversation.channel_capacity,
        }
        .into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use tempfile::TempDir;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        fs::write(
            &path,
            r#"
[identity]
name = "Ana"

[topics]
chat = "room-chat"

[conversation]
type = "note"
"#,
        )
        .unwrap();

        let config = AppConfig::load(&path).unwrap();
        assert_eq!(config.identity.name.as_deref(), Some("Ana"));
        assert_eq!(config.identity.identity, None);
        assert_eq!(config.topics.chat, "room-chat");
        assert_eq!(config.topics.update, Topics::default().update);
        assert_eq!(config.conversation.kind, "note");
        assert_eq!(config.conversation.channel_capacity, DEFAULT_CHANNEL_CAPACITY);

        let options = config.chat_options("ana");
        assert_eq!(options.defaults.participant, "ana");
        assert_eq!(options.defaults.kind, "note");
        assert_eq!(options.topics.chat, "room-chat");
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join(CONFIG_FILE);

        let mut config = AppConfig::default();
        config.identity.identity = Some("ana".into());
        config.conversation.model = "gpt".into();
        config.save(&path).unwrap();

        assert_eq!(AppConfig::load_or_default(Some(&path)).unwrap(), config);
    }

    #[test]
    fn test_bad_files() {
        let dir = TempDir::new().unwrap();

        let missing = dir.path().join("missing.toml");
        assert!(matches!(
            AppConfig::load_or_default(Some(&missing)),
            Err(Error::Io(_))
        ));

        let broken = dir.path().join(CONFIG_FILE);
        fs::write(&broken, "[topics\nchat = 1").unwrap();
        assert!(matches!(AppConfig::load(&broken), Err(Error::Config(_))));
    }
}
