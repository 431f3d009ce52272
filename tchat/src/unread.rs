//! Per-conversation unread counters.
//!
//! Pure in-memory state: rebuilt from each chat-list fetch and bumped by the
//! realtime session for messages that arrive outside the open conversation.

use std::collections::HashMap;

/// Unread message counts keyed by contact id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnreadTracker {
    counts: HashMap<String, u32>,
}

impl UnreadTracker {
    /// Create an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace every counter with the server-reported counts. Zero counts
    /// are dropped.
    pub fn reset_from<I>(&mut self, server_counts: I)
    where
        I: IntoIterator<Item = (String, u32)>,
    {
        self.counts = server_counts
            .into_iter()
            .filter(|(_, count)| *count > 0)
            .collect();
    }

    /// Add one to `contact_id`'s counter, creating it if absent.
    pub fn increment(&mut self, contact_id: &str) {
        let count = self.counts.entry(contact_id.to_string()).or_insert(0);
        *count = count.saturating_add(1);
    }

    /// Drop the counter for a conversation the user has opened.
    ///
    /// The front end calls this once the conversation is shown; opening a
    /// [`Conversation`](crate::chat::Conversation) leaves counters alone.
    pub fn clear(&mut self, contact_id: &str) {
        self.counts.remove(contact_id);
    }

    /// Unread count for one contact; zero when untracked.
    #[must_use]
    pub fn get(&self, contact_id: &str) -> u32 {
        self.counts.get(contact_id).copied().unwrap_or(0)
    }

    /// Copy of the whole counter map.
    #[must_use]
    pub fn snapshot(&self) -> HashMap<String, u32> {
        self.counts.clone()
    }
}
