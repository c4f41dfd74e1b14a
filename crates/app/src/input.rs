//! Chat input routing
//!
//! Lines starting with `!` are agent commands addressed by position in the
//! rendered list; everything else is a chat message.

use std::sync::Arc;

use murmur_core::command::{is_command, HELP_TEXT};
use murmur_core::{ChatMessage, CommandKind, CommandRequest, ParsedCommand, Selection};
use tracing::{debug, warn};

use crate::chat::Chat;
use crate::error::Result;
use crate::viewmodel::{self, MessageRow};

/// What a submitted line turned into
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputOutcome {
    /// Blank line
    Ignored,
    Sent(ChatMessage),
    Command(CommandRequest),
    /// `!help`: sent to the agent and answered locally
    Help(&'static str),
    /// A command that could not be parsed or resolved
    NoOp,
}

/// Input dispatcher owning the selection cursor
pub struct ChatInput {
    chat: Arc<Chat>,
    selection: Selection,
}

impl ChatInput {
    pub fn new(chat: Arc<Chat>) -> Self {
        Self {
            chat,
            selection: Selection::new(),
        }
    }

    pub fn chat(&self) -> &Arc<Chat> {
        &self.chat
    }

    /// Route one line of input
    pub async fn submit(&mut self, line: &str) -> Result<InputOutcome> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(InputOutcome::Ignored);
        }

        if !is_command(line) {
            let message = self.chat.send(line).await?;
            return Ok(InputOutcome::Sent(message));
        }

        let Some(parsed) = ParsedCommand::parse(line) else {
            warn!(input = %line, "Unrecognized command");
            return Ok(InputOutcome::NoOp);
        };

        let messages = self.chat.messages();
        let selected = self.selection.clamp(messages.len());
        let Some(request) = parsed.resolve(&messages, selected) else {
            debug!(input = %line, "Command resolved to nothing");
            return Ok(InputOutcome::NoOp);
        };

        self.chat.send_command(&request).await?;
        if request.command == CommandKind::Help {
            Ok(InputOutcome::Help(HELP_TEXT))
        } else {
            Ok(InputOutcome::Command(request))
        }
    }

    pub fn select_up(&mut self) -> Option<usize> {
        self.selection.up(self.chat.messages().len())
    }

    pub fn select_down(&mut self) -> Option<usize> {
        self.selection.down(self.chat.messages().len())
    }

    pub fn clear_selection(&mut self) {
        self.selection.clear();
    }

    pub fn selection(&self) -> &Selection {
        &self.selection
    }

    /// Current list as view rows
    pub fn rows(&mut self) -> Vec<MessageRow> {
        let messages = self.chat.messages();
        self.selection.clamp(messages.len());
        viewmodel::rows(&messages, &self.chat.local_identity(), &self.selection)
    }
}
