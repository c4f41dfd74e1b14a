//! Message list view model
//!
//! Flattens the conversation into rows a terminal (or any other front end)
//! can render without knowing about transport identities.

use std::fmt;

use chrono::{DateTime, Local, TimeZone};
use murmur_core::{ChatMessage, ReceivedChatMessage, Selection};

/// One rendered message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRow {
    pub position: usize,
    pub id: String,
    pub name: String,
    pub text: String,
    /// `text` with the highlighted leading words wrapped in `*`
    pub display_text: String,
    pub is_self: bool,
    pub is_assistant: bool,
    pub highlight_word_count: u32,
    pub is_selected: bool,
    pub edited: bool,
    pub alt_count: usize,
    /// Local wall clock, `%H:%M`
    pub time: String,
}

impl MessageRow {
    pub fn new(
        position: usize,
        message: &ReceivedChatMessage,
        local_identity: &str,
        selection: &Selection,
    ) -> Self {
        let is_self = is_own(message, local_identity);
        Self {
            position,
            id: message.id.clone(),
            name: display_name(message, is_self),
            text: message.message.message.clone(),
            display_text: emphasize(&message.message, is_self),
            is_self,
            is_assistant: message.is_assistant,
            highlight_word_count: message.highlight_word_count,
            is_selected: selection.is_selected(position),
            edited: message.is_edited(),
            alt_count: message.alt_count(),
            time: format_time(message.timestamp, &Local),
        }
    }
}

impl fmt::Display for MessageRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cursor = if self.is_selected { '>' } else { ' ' };
        write!(
            f,
            "{}[{}] {} {}: {}",
            cursor, self.position, self.time, self.name, self.display_text
        )?;
        if self.edited {
            f.write_str(" (edited)")?;
        }
        if self.alt_count > 1 {
            write!(f, " [{} alts]", self.alt_count)?;
        }
        Ok(())
    }
}

/// Rows for the whole list
pub fn rows(
    messages: &[ReceivedChatMessage],
    local_identity: &str,
    selection: &Selection,
) -> Vec<MessageRow> {
    messages
        .iter()
        .enumerate()
        .map(|(position, message)| MessageRow::new(position, message, local_identity, selection))
        .collect()
}

/// Sent by this client. Messages without a transport sender (history
/// snapshots) fall back to the participant field.
fn is_own(message: &ReceivedChatMessage, local_identity: &str) -> bool {
    message
        .sender_identity()
        .unwrap_or(message.participant.as_str())
        == local_identity
}

fn display_name(message: &ReceivedChatMessage, is_self: bool) -> String {
    if let Some(name) = message.from.as_ref().and_then(|p| p.name.as_deref()) {
        return name.to_string();
    }
    if message.is_assistant {
        "Agent".to_string()
    } else if is_self {
        "You".to_string()
    } else {
        "Unknown".to_string()
    }
}

/// Highlights only apply to what others sent
fn emphasize(message: &ChatMessage, is_self: bool) -> String {
    if is_self {
        return message.message.clone();
    }
    let lead: Vec<&str> = message.highlighted_words().collect();
    if lead.is_empty() {
        return message.message.clone();
    }
    let rest: Vec<&str> = message.message.split_whitespace().skip(lead.len()).collect();
    if rest.is_empty() {
        format!("*{}*", lead.join(" "))
    } else {
        format!("*{}* {}", lead.join(" "), rest.join(" "))
    }
}

fn format_time<Tz: TimeZone>(timestamp_ms: i64, tz: &Tz) -> String
where
    Tz::Offset: fmt::Display,
{
    DateTime::from_timestamp_millis(timestamp_ms)
        .map(|dt| dt.with_timezone(tz).format("%H:%M").to_string())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use murmur_core::{ChatMessage, Participant};

    fn received(id: &str, from: Option<Participant>) -> ReceivedChatMessage {
        ReceivedChatMessage::from_participant(ChatMessage::new(id, "hi").at(0), from)
    }

    #[test]
    fn test_display_names() {
        let named = received("a", Some(Participant::new("u2").with_name("Bo")));
        assert_eq!(MessageRow::new(0, &named, "me", &Selection::new()).name, "Bo");

        let mut agent = received("b", Some(Participant::new("agent")));
        agent.is_assistant = true;
        assert_eq!(MessageRow::new(0, &agent, "me", &Selection::new()).name, "Agent");

        let own = received("c", Some(Participant::new("me")));
        let row = MessageRow::new(0, &own, "me", &Selection::new());
        assert_eq!(row.name, "You");
        assert!(row.is_self);

        let stranger = received("d", None);
        let row = MessageRow::new(0, &stranger, "me", &Selection::new());
        assert_eq!(row.name, "Unknown");
        assert!(!row.is_self);
    }

    #[test]
    fn test_history_message_is_own_by_participant() {
        let mut message = received("a", None);
        message.participant = "me".into();
        assert!(MessageRow::new(0, &message, "me", &Selection::new()).is_self);
    }

    #[test]
    fn test_rows_mark_selection_and_edits() {
        let mut edited = received("b", None);
        edited.edit_timestamp = Some(5);
        edited.alt_ids = vec!["b".into(), "b2".into()];
        let messages = vec![received("a", None), edited];

        let mut selection = Selection::new();
        selection.up(messages.len());

        let rows = rows(&messages, "me", &selection);
        assert!(!rows[0].is_selected);
        assert!(rows[1].is_selected);
        assert!(rows[1].edited);
        assert_eq!(rows[1].alt_count, 2);
        assert!(rows[1].to_string().ends_with("(edited) [2 alts]"));
        assert!(rows[1].to_string().starts_with(">[1]"));
    }

    #[test]
    fn test_highlight_emphasizes_leading_words_of_others() {
        let mut theirs = received("a", Some(Participant::new("bo")));
        theirs.message.message = "look at this one".into();
        theirs.highlight_word_count = 2;
        let row = MessageRow::new(0, &theirs, "me", &Selection::new());
        assert_eq!(row.display_text, "*look at* this one");
        assert_eq!(row.text, "look at this one");
        assert!(row.to_string().ends_with("*look at* this one"));

        theirs.highlight_word_count = 9;
        let row = MessageRow::new(0, &theirs, "me", &Selection::new());
        assert_eq!(row.display_text, "*look at this one*");

        let mut mine = received("b", Some(Participant::new("me")));
        mine.highlight_word_count = 1;
        let row = MessageRow::new(0, &mine, "me", &Selection::new());
        assert_eq!(row.display_text, "hi");
    }

    #[test]
    fn test_format_time() {
        // 1970-01-01 13:05 UTC
        let ms = (13 * 60 + 5) * 60 * 1000;
        assert_eq!(format_time(ms, &Utc), "13:05");
    }
}
