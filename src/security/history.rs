//! In-memory event history
//!
//! Bounded sliding-window store feeding the rule engine: per-user message
//! events and per-guild join events, never persisted. Old entries are evicted
//! by the periodic sweep; every windowed query takes the current time as a
//! parameter so window logic is deterministic under test.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;

/// How long message events are retained
#[must_use]
pub fn message_retention() -> Duration {
    Duration::minutes(10)
}

/// How long join events are retained
#[must_use]
pub fn join_retention() -> Duration {
    Duration::minutes(30)
}

/// A recorded message event
#[derive(Debug, Clone)]
pub struct MessageEvent {
    /// When the message arrived
    pub at: DateTime<Utc>,
    /// Channel the message was posted in
    pub channel_id: u64,
    /// The message id, for deletion
    pub message_id: u64,
    /// Message text, kept for similarity comparison
    pub content: String,
}

/// A recorded guild-join event
#[derive(Debug, Clone, Copy)]
pub struct JoinEvent {
    /// When the member joined
    pub at: DateTime<Utc>,
    /// The joining user
    pub user_id: u64,
}

/// Sliding-window history of messages and joins
#[derive(Debug, Default)]
pub struct EventHistoryStore {
    /// Message events keyed by (guild, user)
    messages: DashMap<(u64, u64), Vec<MessageEvent>>,
    /// Join events keyed by guild
    joins: DashMap<u64, Vec<JoinEvent>>,
}

impl EventHistoryStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message event for `user_id` in `guild_id`
    pub fn record_message(&self, guild_id: u64, user_id: u64, event: MessageEvent) {
        self.messages
            .entry((guild_id, user_id))
            .or_default()
            .push(event);
    }

    /// Append a join event for `guild_id`
    pub fn record_join(&self, guild_id: u64, event: JoinEvent) {
        self.joins.entry(guild_id).or_default().push(event);
    }

    /// Messages from `user_id` in `guild_id` newer than `now - window`,
    /// oldest first. Events are appended in arrival order so the stored
    /// order is already ascending.
    #[must_use]
    pub fn messages_within(
        &self,
        guild_id: u64,
        user_id: u64,
        window: Duration,
        now: DateTime<Utc>,
    ) -> Vec<MessageEvent> {
        let cutoff = now - window;
        self.messages
            .get(&(guild_id, user_id))
            .map(|events| {
                events
                    .iter()
                    .filter(|event| event.at > cutoff)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// The last `count` messages from `user_id` in `guild_id`, oldest first
    #[must_use]
    pub fn recent_messages(&self, guild_id: u64, user_id: u64, count: usize) -> Vec<MessageEvent> {
        self.messages
            .get(&(guild_id, user_id))
            .map(|events| {
                let start = events.len().saturating_sub(count);
                events[start..].to_vec()
            })
            .unwrap_or_default()
    }

    /// Remove and return all message history for `user_id` in `guild_id`.
    /// Called once a verdict fires so a single burst yields a single action.
    #[must_use]
    pub fn drain_messages(&self, guild_id: u64, user_id: u64) -> Vec<MessageEvent> {
        self.messages
            .remove(&(guild_id, user_id))
            .map(|(_, events)| events)
            .unwrap_or_default()
    }

    /// Joins in `guild_id` newer than `now - window`, oldest first
    #[must_use]
    pub fn joins_within(
        &self,
        guild_id: u64,
        window: Duration,
        now: DateTime<Utc>,
    ) -> Vec<JoinEvent> {
        let cutoff = now - window;
        self.joins
            .get(&guild_id)
            .map(|events| {
                events
                    .iter()
                    .filter(|event| event.at > cutoff)
                    .copied()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Evict events past their retention window, dropping empty entries
    pub fn sweep(&self, now: DateTime<Utc>) {
        let message_cutoff = now - message_retention();
        self.messages
            .retain(|_, events| {
                events.retain(|event| event.at > message_cutoff);
                !events.is_empty()
            });

        let join_cutoff = now - join_retention();
        self.joins.retain(|_, events| {
            events.retain(|event| event.at > join_cutoff);
            !events.is_empty()
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixed_now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-06-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn message_at(at: DateTime<Utc>, content: &str) -> MessageEvent {
        MessageEvent {
            at,
            channel_id: 100,
            message_id: 200,
            content: content.to_string(),
        }
    }

    #[test]
    fn test_windowed_messages_ascending() {
        let store = EventHistoryStore::new();
        let now = fixed_now();

        store.record_message(1, 2, message_at(now - Duration::seconds(15), "too old"));
        store.record_message(1, 2, message_at(now - Duration::seconds(8), "first"));
        store.record_message(1, 2, message_at(now - Duration::seconds(3), "second"));

        let window = store.messages_within(1, 2, Duration::seconds(10), now);
        assert_eq!(window.len(), 2);
        assert_eq!(window[0].content, "first");
        assert_eq!(window[1].content, "second");

        // Other users and guilds are unaffected
        assert!(store.messages_within(1, 3, Duration::seconds(10), now).is_empty());
        assert!(store.messages_within(9, 2, Duration::seconds(10), now).is_empty());
    }

    #[test]
    fn test_recent_messages_keeps_tail() {
        let store = EventHistoryStore::new();
        let now = fixed_now();

        for i in 0..7 {
            store.record_message(1, 2, message_at(now + Duration::seconds(i), &format!("m{i}")));
        }

        let recent = store.recent_messages(1, 2, 5);
        assert_eq!(recent.len(), 5);
        assert_eq!(recent[0].content, "m2");
        assert_eq!(recent[4].content, "m6");

        // Asking for more than exist returns all of them
        assert_eq!(store.recent_messages(1, 2, 50).len(), 7);
    }

    #[test]
    fn test_drain_empties_history() {
        let store = EventHistoryStore::new();
        let now = fixed_now();

        store.record_message(1, 2, message_at(now, "spam"));
        store.record_message(1, 2, message_at(now, "spam"));

        let drained = store.drain_messages(1, 2);
        assert_eq!(drained.len(), 2);
        assert!(store.messages_within(1, 2, Duration::minutes(10), now).is_empty());
        assert!(store.drain_messages(1, 2).is_empty());
    }

    #[test]
    fn test_join_window() {
        let store = EventHistoryStore::new();
        let now = fixed_now();

        store.record_join(1, JoinEvent { at: now - Duration::seconds(45), user_id: 10 });
        store.record_join(1, JoinEvent { at: now - Duration::seconds(20), user_id: 11 });
        store.record_join(1, JoinEvent { at: now - Duration::seconds(5), user_id: 12 });

        let joins = store.joins_within(1, Duration::seconds(30), now);
        assert_eq!(joins.len(), 2);
        assert_eq!(joins[0].user_id, 11);
        assert_eq!(joins[1].user_id, 12);
    }

    #[test]
    fn test_sweep_applies_retention() {
        let store = EventHistoryStore::new();
        let now = fixed_now();

        store.record_message(1, 2, message_at(now - Duration::minutes(11), "stale"));
        store.record_message(1, 2, message_at(now - Duration::minutes(2), "fresh"));
        store.record_join(1, JoinEvent { at: now - Duration::minutes(31), user_id: 10 });
        store.record_join(1, JoinEvent { at: now - Duration::minutes(29), user_id: 11 });
        store.record_message(3, 4, message_at(now - Duration::minutes(20), "all stale"));

        store.sweep(now);

        let kept = store.messages_within(1, 2, Duration::minutes(10), now);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].content, "fresh");

        let joins = store.joins_within(1, Duration::minutes(30), now);
        assert_eq!(joins.len(), 1);
        assert_eq!(joins[0].user_id, 11);

        // Fully-stale entries are dropped outright
        assert!(store.messages.get(&(3, 4)).is_none());
    }
}
