//! Developer guardrails and invariants
//!
//! Debug assertions for detecting impossible states during development.
//! These checks are compiled out in release builds.

use std::collections::HashSet;

use crate::models::ReceivedChatMessage;

/// Validate that a reduced conversation is internally consistent
pub fn assert_conversation_invariants(messages: &[ReceivedChatMessage]) {
    // Display order is ascending by timestamp
    debug_assert!(
        messages.windows(2).all(|w| w[0].timestamp <= w[1].timestamp),
        "Conversation is not sorted by timestamp"
    );

    // At most one current message per id
    if cfg!(debug_assertions) {
        let mut seen = HashSet::with_capacity(messages.len());
        for message in messages {
            debug_assert!(
                seen.insert(message.id.as_str()),
                "Conversation holds message {} twice",
                message.id
            );
        }
    }

    for message in messages {
        assert_message_invariants(message);
    }
}

/// Validate a single message
pub fn assert_message_invariants(message: &ReceivedChatMessage) {
    debug_assert!(!message.id.is_empty(), "Message with empty id");

    debug_assert!(
        !message.alt_ids.is_empty(),
        "Message {} has no alt ids",
        message.id
    );
}
