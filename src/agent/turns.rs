//! Persisted conversation turns (spec.md §3 "Conversation turn").
//!
//! A turn is the durable, cross-session record of one exchange; it is
//! distinct from the transient [`crate::ai::types::Message`] list that lives
//! only for the duration of one agent loop.

use serde::{Deserialize, Serialize};

/// One `{ user, assistant, createdAt }` exchange, truncated to the configured
/// per-role caps before storage and optionally flagged by the injection
/// scanner (§4.3 "any turn previously flagged for injection gets a DATA-only
/// prefix").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub user: String,
    pub assistant: String,
    pub created_at_ms: i64,
    pub flagged_injection: bool,
}

impl ConversationTurn {
    pub fn new(
        user: impl Into<String>,
        assistant: impl Into<String>,
        created_at_ms: i64,
        user_cap: usize,
        assistant_cap: usize,
    ) -> Self {
        Self {
            user: truncate_chars(&user.into(), user_cap),
            assistant: truncate_chars(&assistant.into(), assistant_cap),
            created_at_ms,
            flagged_injection: false,
        }
    }

    /// Replaces the stored assistant text with a placeholder, as the
    /// sanitation pass does when it detects a hallucinated-action claim
    /// (spec.md §3: "mutated only by the assistant's own prompt-sanitation
    /// pass").
    pub fn redact_assistant(&mut self, placeholder: impl Into<String>) {
        self.assistant = placeholder.into();
        self.flagged_injection = true;
    }
}

fn truncate_chars(s: &str, cap: usize) -> String {
    if s.chars().count() <= cap {
        s.to_string()
    } else {
        s.chars().take(cap).collect()
    }
}

/// Keeps at most `max_turns`, dropping the oldest first (spec.md §3 MAX_TURNS invariant).
pub fn enforce_max_turns(turns: &mut Vec<ConversationTurn>, max_turns: usize) {
    if turns.len() > max_turns {
        let excess = turns.len() - max_turns;
        turns.drain(0..excess);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_truncates_to_caps() {
        let turn = ConversationTurn::new("a".repeat(10), "b".repeat(10), 0, 5, 3);
        assert_eq!(turn.user.len(), 5);
        assert_eq!(turn.assistant.len(), 3);
    }

    #[test]
    fn redact_assistant_flags_injection() {
        let mut turn = ConversationTurn::new("hi", "I deleted everything", 0, 500, 2000);
        turn.redact_assistant("[response withheld: unverified action claim]");
        assert!(turn.flagged_injection);
        assert!(turn.assistant.starts_with("[response withheld"));
    }

    #[test]
    fn enforce_max_turns_drops_oldest() {
        let mut turns: Vec<ConversationTurn> = (0..15)
            .map(|i| ConversationTurn::new(format!("u{i}"), format!("a{i}"), i, 500, 2000))
            .collect();
        enforce_max_turns(&mut turns, 12);
        assert_eq!(turns.len(), 12);
        assert_eq!(turns[0].user, "u3");
    }
}
