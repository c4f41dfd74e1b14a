//! Chat commands
//!
//! Commands are typed into the chat input and start with `!`:
//!
//! ```text
//! !help
//! !fw[2]        forward from the message at position 2
//! !rgen 1       regenerate the message at position 1
//! !alt[1][2]    switch position 1 to its branch 2
//! ```
//!
//! Positions index the list as it is currently rendered. A bare command
//! applies to the selected message, or to the last one when nothing is
//! selected.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::Result;
use crate::models::ReceivedChatMessage;

/// Prefix marking chat input as a command
pub const COMMAND_PREFIX: char = '!';

pub const HELP_TEXT: &str = "\
!help              list commands
!fw[n]             continue the conversation from message n
!rgen[n]           regenerate message n
!alt[n][b]         show branch b of message n";

/// Commands understood by the agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandKind {
    Help,
    Fw,
    Rgen,
    Alt,
}

impl CommandKind {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "help" => Some(Self::Help),
            "fw" => Some(Self::Fw),
            "rgen" => Some(Self::Rgen),
            "alt" => Some(Self::Alt),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Help => "help",
            Self::Fw => "fw",
            Self::Rgen => "rgen",
            Self::Alt => "alt",
        }
    }

    /// Whether the command addresses a message
    pub fn takes_target(self) -> bool {
        !matches!(self, Self::Help)
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A command as typed, before it is resolved against the message list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedCommand {
    pub kind: CommandKind,
    /// Index into the rendered message list
    pub position: Option<usize>,
    /// Index into the addressed message's `alt_ids` (only used by `alt`)
    pub branch: Option<usize>,
}

impl ParsedCommand {
    /// Parse raw input. Returns `None` for anything that is not a known,
    /// well-formed command.
    pub fn parse(raw: &str) -> Option<Self> {
        let body = raw.trim().strip_prefix(COMMAND_PREFIX)?;
        let name_len = body
            .find(|c: char| c == '[' || c.is_whitespace())
            .unwrap_or(body.len());
        let (name, rest) = body.split_at(name_len);

        let Some(kind) = CommandKind::from_name(name) else {
            warn!(command = %raw.trim(), "Unknown command");
            return None;
        };

        let Some(args) = parse_args(rest) else {
            warn!(command = %raw.trim(), "Malformed command arguments");
            return None;
        };
        if args.len() > 2 {
            warn!(command = %raw.trim(), "Too many command arguments");
            return None;
        }

        Some(Self {
            kind,
            position: args.first().copied(),
            branch: args.get(1).copied(),
        })
    }

    /// Resolve positions to durable ids
    ///
    /// `selected` is the cursor position used when no position was typed.
    /// Returns `None` (no-op) when the position does not address a message.
    pub fn resolve(
        &self,
        messages: &[ReceivedChatMessage],
        selected: Option<usize>,
    ) -> Option<CommandRequest> {
        if !self.kind.takes_target() {
            return Some(CommandRequest::new(self.kind, None));
        }

        let position = self
            .position
            .or(selected)
            .or_else(|| messages.len().checked_sub(1));
        let Some(message) = position.and_then(|p| messages.get(p)) else {
            debug!(
                command = %self.kind,
                position = ?position,
                len = messages.len(),
                "Command position addresses no message"
            );
            return None;
        };

        let target = match (self.kind, self.branch) {
            (CommandKind::Alt, Some(branch)) => match message.alt_ids.get(branch) {
                Some(alt_id) => alt_id.clone(),
                None => {
                    warn!(
                        message_id = %message.id,
                        branch,
                        alt_count = message.alt_ids.len(),
                        "Branch out of range, falling back to the message itself"
                    );
                    message.id.clone()
                }
            },
            _ => message.id.clone(),
        };

        Some(CommandRequest::new(self.kind, Some(target)))
    }
}

/// Parse `[n]` / space separated non-negative integers
fn parse_args(rest: &str) -> Option<Vec<usize>> {
    let mut args = Vec::new();
    let mut chars = rest.chars().peekable();

    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }

        let bracketed = c == '[';
        if bracketed {
            chars.next();
        }

        let mut digits = String::new();
        while let Some(&d) = chars.peek() {
            if !d.is_ascii_digit() {
                break;
            }
            digits.push(d);
            chars.next();
        }

        if bracketed && chars.next() != Some(']') {
            return None;
        }
        args.push(digits.parse().ok()?);
    }

    Some(args)
}

/// A resolved command, ready for the agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandRequest {
    pub command: CommandKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arg: Option<String>,
}

/// Wire envelope: `{"topic": "command", "data": {...}}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandEnvelope {
    pub topic: String,
    pub data: CommandRequest,
}

impl CommandRequest {
    pub fn new(command: CommandKind, arg: Option<String>) -> Self {
        Self { command, arg }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let envelope = CommandEnvelope {
            topic: "command".to_string(),
            data: self.clone(),
        };
        Ok(serde_json::to_vec(&envelope)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let envelope: CommandEnvelope = serde_json::from_slice(bytes)?;
        Ok(envelope.data)
    }
}

/// Parse and resolve in one step
pub fn interpret(
    raw: &str,
    messages: &[ReceivedChatMessage],
    selected: Option<usize>,
) -> Option<CommandRequest> {
    ParsedCommand::parse(raw)?.resolve(messages, selected)
}

/// Whether chat input should be treated as a command
pub fn is_command(raw: &str) -> bool {
    raw.trim_start().starts_with(COMMAND_PREFIX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ChatMessage;

    fn rendered() -> Vec<ReceivedChatMessage> {
        let mut b = ChatMessage::new("b", "two").at(2);
        b.alt_ids = vec!["b".into(), "b2".into(), "b3".into()];
        vec![
            ChatMessage::new("a", "one").at(1).into(),
            b.into(),
            ChatMessage::new("c", "three").at(3).into(),
        ]
    }

    fn target(raw: &str) -> Option<String> {
        interpret(raw, &rendered(), None).and_then(|r| r.arg)
    }

    #[test]
    fn test_resolution_examples() {
        assert_eq!(target("!alt[1][2]").as_deref(), Some("b3"));
        assert_eq!(target("!fw[0]").as_deref(), Some("a"));
        assert!(interpret("!rgen[5]", &rendered(), None).is_none());
    }

    #[test]
    fn test_space_separated_arguments() {
        assert_eq!(target("!alt 1 1").as_deref(), Some("b2"));
        assert_eq!(target("  !rgen 2 ").as_deref(), Some("c"));
    }

    #[test]
    fn test_alt_falls_back_to_base_id() {
        assert_eq!(target("!alt[1][3]").as_deref(), Some("b"));
        assert_eq!(target("!alt[1]").as_deref(), Some("b"));
        assert_eq!(target("!alt[0][0]").as_deref(), Some("a"));
    }

    #[test]
    fn test_default_target_uses_selection_then_last() {
        let messages = rendered();
        let selected = interpret("!rgen", &messages, Some(0)).unwrap();
        assert_eq!(selected.arg.as_deref(), Some("a"));

        let last = interpret("!fw", &messages, None).unwrap();
        assert_eq!(last.arg.as_deref(), Some("c"));

        assert!(interpret("!fw", &[], None).is_none());
        // An explicit position wins over the selection
        let explicit = interpret("!fw[1]", &messages, Some(0)).unwrap();
        assert_eq!(explicit.arg.as_deref(), Some("b"));
    }

    #[test]
    fn test_help_has_no_target() {
        let request = interpret("!help", &[], None).unwrap();
        assert_eq!(request.command, CommandKind::Help);
        assert!(request.arg.is_none());
    }

    #[test]
    fn test_unknown_and_malformed_are_noops() {
        assert!(ParsedCommand::parse("!dance").is_none());
        assert!(ParsedCommand::parse("!fw[x]").is_none());
        assert!(ParsedCommand::parse("!fw[1").is_none());
        assert!(ParsedCommand::parse("!fw[-1]").is_none());
        assert!(ParsedCommand::parse("!alt[1][2][3]").is_none());
        assert!(ParsedCommand::parse("hello").is_none());
        assert!(ParsedCommand::parse("!").is_none());
    }

    #[test]
    fn test_parse_positions() {
        let parsed = ParsedCommand::parse("!alt[4] [7]").unwrap();
        assert_eq!(parsed.kind, CommandKind::Alt);
        assert_eq!(parsed.position, Some(4));
        assert_eq!(parsed.branch, Some(7));
    }

    #[test]
    fn test_envelope_shape() {
        let request = CommandRequest::new(CommandKind::Alt, Some("b3".into()));
        let value: serde_json::Value = serde_json::from_slice(&request.to_bytes().unwrap()).unwrap();
        assert_eq!(value["topic"], "command");
        assert_eq!(value["data"]["command"], "alt");
        assert_eq!(value["data"]["arg"], "b3");

        let help = CommandRequest::new(CommandKind::Help, None);
        let value: serde_json::Value = serde_json::from_slice(&help.to_bytes().unwrap()).unwrap();
        assert!(value["data"].get("arg").is_none());
        assert_eq!(CommandRequest::from_bytes(&help.to_bytes().unwrap()).unwrap(), help);
    }

    #[test]
    fn test_is_command() {
        assert!(is_command("!fw"));
        assert!(is_command("  !help"));
        assert!(!is_command("hi !fw"));
    }
}
