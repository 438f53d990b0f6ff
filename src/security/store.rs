//! Temporary-action store
//!
//! Centralized store for temporary moderation actions. At most one Active
//! record exists per (guild, user, kind); re-applying the same action renews
//! the existing record's expiry instead of inserting a duplicate.

use crate::security::{ModActionKind, SecurityError, SecurityResult, TempAction, TempActionState};
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::sync::Arc;

/// How long terminal records linger before pruning
#[must_use]
fn terminal_retention() -> Duration {
    Duration::hours(1)
}

/// Store for temporary-action records
#[derive(Clone, Default)]
pub struct ActionStore {
    /// Single map containing all records, keyed by record id
    records: Arc<DashMap<String, TempAction>>,
}

impl ActionStore {
    /// Create a new store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an action for (guild, user, kind). If an Active record
    /// already exists its expiry is renewed in place; otherwise a new record
    /// is created. Returns a clone of the resulting record.
    pub fn upsert(
        &self,
        guild_id: u64,
        user_id: u64,
        kind: ModActionKind,
        reason: impl Into<String>,
        now: DateTime<Utc>,
    ) -> SecurityResult<TempAction> {
        if let Some(existing) = self.active_record_id(guild_id, user_id, kind) {
            if let Some(mut record) = self.records.get_mut(&existing) {
                // A reversal may land between the lookup and this renewal;
                // a record no longer Active falls through to a fresh one
                if record.renew(now).is_ok() {
                    return Ok(record.clone());
                }
            }
        }

        let record = TempAction::new(guild_id, user_id, kind, reason, now)?;
        self.records.insert(record.id.clone(), record.clone());
        Ok(record)
    }

    fn active_record_id(&self, guild_id: u64, user_id: u64, kind: ModActionKind) -> Option<String> {
        self.records.iter().find_map(|entry| {
            let record = entry.value();
            (record.guild_id == guild_id
                && record.user_id == user_id
                && record.kind == kind
                && record.state == TempActionState::Active)
                .then(|| record.id.clone())
        })
    }

    /// Get a record by id
    #[must_use]
    pub fn get(&self, id: &str) -> Option<TempAction> {
        self.records.get(id).map(|entry| entry.value().clone())
    }

    /// The Active record for (guild, user, kind), if any
    #[must_use]
    pub fn active_for(
        &self,
        guild_id: u64,
        user_id: u64,
        kind: ModActionKind,
    ) -> Option<TempAction> {
        self.active_record_id(guild_id, user_id, kind)
            .and_then(|id| self.get(&id))
    }

    /// All Active records in a guild
    #[must_use]
    pub fn active_in_guild(&self, guild_id: u64) -> Vec<TempAction> {
        self.records
            .iter()
            .filter_map(|entry| {
                let record = entry.value();
                (record.guild_id == guild_id && record.state == TempActionState::Active)
                    .then(|| record.clone())
            })
            .collect()
    }

    /// Ids of Active records whose expiry has passed at `now`
    #[must_use]
    pub fn due_for_reversal(&self, now: DateTime<Utc>) -> Vec<String> {
        self.records
            .iter()
            .filter_map(|entry| {
                let record = entry.value();
                record.is_due(now).then(|| record.id.clone())
            })
            .collect()
    }

    /// Transition a record to Reversed, returning the updated clone
    ///
    /// # Errors
    /// Returns `NotFound` for unknown ids and `InvalidStateTransition` for
    /// records that are not Active.
    pub fn reverse(&self, id: &str, now: DateTime<Utc>) -> SecurityResult<TempAction> {
        let Some(mut record) = self.records.get_mut(id) else {
            return Err(SecurityError::NotFound(id.to_string()));
        };
        record.reverse(now)?;
        Ok(record.clone())
    }

    /// Transition a record to Cancelled, returning the updated clone
    ///
    /// # Errors
    /// Returns `NotFound` for unknown ids and `InvalidStateTransition` for
    /// records that are not Active.
    pub fn cancel(&self, id: &str, now: DateTime<Utc>) -> SecurityResult<TempAction> {
        let Some(mut record) = self.records.get_mut(id) else {
            return Err(SecurityError::NotFound(id.to_string()));
        };
        record.cancel(now)?;
        Ok(record.clone())
    }

    /// Drop terminal records older than the retention window
    pub fn prune_terminal(&self, now: DateTime<Utc>) {
        let cutoff = now - terminal_retention();
        self.records.retain(|_, record| {
            !(record.is_terminal() && record.reversed_at.is_some_and(|at| at <= cutoff))
        });
    }

    /// Number of Active records across all guilds
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.records
            .iter()
            .filter(|entry| entry.value().state == TempActionState::Active)
            .count()
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

    #[test]
    fn test_upsert_and_get() {
        let store = ActionStore::new();
        let now = fixed_now();

        let record = store
            .upsert(67890, 12345, ModActionKind::Mute, "spam", now)
            .unwrap();
        assert_eq!(record.state, TempActionState::Active);

        let retrieved = store.get(&record.id).unwrap();
        assert_eq!(retrieved.expires_at, now + Duration::seconds(900));
        assert_eq!(store.active_count(), 1);
    }

    #[test]
    fn test_upsert_renews_instead_of_duplicating() {
        let store = ActionStore::new();
        let now = fixed_now();

        let first = store
            .upsert(67890, 12345, ModActionKind::Mute, "spam", now)
            .unwrap();
        let later = now + Duration::seconds(300);
        let second = store
            .upsert(67890, 12345, ModActionKind::Mute, "more spam", later)
            .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.expires_at, later + Duration::seconds(900));
        assert_eq!(store.active_count(), 1);

        // A different kind for the same user is a separate record
        let ban = store
            .upsert(67890, 12345, ModActionKind::Ban, "scam", now)
            .unwrap();
        assert_ne!(ban.id, first.id);
        assert_eq!(store.active_count(), 2);
    }

    #[test]
    fn test_due_for_reversal_uses_injected_clock() {
        let store = ActionStore::new();
        let now = fixed_now();

        let mute = store
            .upsert(67890, 12345, ModActionKind::Mute, "spam", now)
            .unwrap();
        store
            .upsert(67890, 54321, ModActionKind::Ban, "scam", now)
            .unwrap();

        // Nothing due before any expiry
        assert!(store.due_for_reversal(now + Duration::seconds(899)).is_empty());

        // Mute (15 min) is due, ban (24 h) is not
        let due = store.due_for_reversal(now + Duration::seconds(900));
        assert_eq!(due, vec![mute.id.clone()]);

        // Both due after a day
        assert_eq!(store.due_for_reversal(now + Duration::days(2)).len(), 2);
    }

    #[test]
    fn test_reverse_and_cancel() {
        let store = ActionStore::new();
        let now = fixed_now();

        let record = store
            .upsert(67890, 12345, ModActionKind::Mute, "spam", now)
            .unwrap();

        let reversed = store.reverse(&record.id, now + Duration::seconds(901)).unwrap();
        assert_eq!(reversed.state, TempActionState::Reversed);

        // Double reversal is rejected
        assert!(matches!(
            store.reverse(&record.id, now),
            Err(SecurityError::InvalidStateTransition)
        ));
        assert!(matches!(
            store.reverse("no-such-id", now),
            Err(SecurityError::NotFound(_))
        ));

        let record = store
            .upsert(67890, 99999, ModActionKind::Ban, "scam", now)
            .unwrap();
        let cancelled = store.cancel(&record.id, now).unwrap();
        assert_eq!(cancelled.state, TempActionState::Cancelled);
    }

    #[test]
    fn test_active_for_ignores_terminal_records() {
        let store = ActionStore::new();
        let now = fixed_now();

        let record = store
            .upsert(67890, 12345, ModActionKind::Mute, "spam", now)
            .unwrap();
        assert!(store.active_for(67890, 12345, ModActionKind::Mute).is_some());

        store.reverse(&record.id, now).unwrap();
        assert!(store.active_for(67890, 12345, ModActionKind::Mute).is_none());

        // A fresh upsert after reversal creates a new record
        let second = store
            .upsert(67890, 12345, ModActionKind::Mute, "again", now)
            .unwrap();
        assert_ne!(second.id, record.id);
    }

    #[test]
    fn test_reapply_after_sweep_reversal_never_errors() {
        let store = ActionStore::new();
        let now = fixed_now();

        // A genuine violation right after the sweeper reversed the previous
        // mute must start a fresh record, not fail the action
        let first = store
            .upsert(67890, 12345, ModActionKind::Mute, "spam", now)
            .unwrap();
        store
            .reverse(&first.id, now + Duration::seconds(900))
            .unwrap();

        let second = store
            .upsert(67890, 12345, ModActionKind::Mute, "spam again", now + Duration::seconds(901))
            .unwrap();
        assert_ne!(second.id, first.id);
        assert_eq!(second.state, TempActionState::Active);
        assert_eq!(store.active_count(), 1);
    }

    #[test]
    fn test_prune_terminal() {
        let store = ActionStore::new();
        let now = fixed_now();

        let old = store
            .upsert(67890, 1, ModActionKind::Mute, "spam", now)
            .unwrap();
        let fresh = store
            .upsert(67890, 2, ModActionKind::Mute, "spam", now)
            .unwrap();
        store.reverse(&old.id, now).unwrap();
        store.reverse(&fresh.id, now + Duration::minutes(90)).unwrap();

        store.prune_terminal(now + Duration::minutes(100));

        assert!(store.get(&old.id).is_none());
        assert!(store.get(&fresh.id).is_some());
    }
}
