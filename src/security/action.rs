//! Moderation action types and temporary-action records
//!
//! This module defines the graduated moderation actions and the record
//! structure tracking temporary actions (mutes, bans) until they are
//! reversed.

use crate::security::{SecurityError, SecurityResult};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::info;
use uuid::Uuid;

/// Seconds a spam mute lasts before automatic unmute
pub const MUTE_DURATION_SECS: i64 = 900;
/// Seconds a temporary ban lasts before automatic unban
pub const BAN_DURATION_SECS: i64 = 86_400;

/// Kind of moderation action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModActionKind {
    /// DM warning, no restriction applied
    Warn,
    /// Muted role for a fixed duration
    Mute,
    /// Server kick
    Kick,
    /// Temporary server ban
    Ban,
}

impl fmt::Display for ModActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Warn => write!(f, "Warn"),
            Self::Mute => write!(f, "Mute"),
            Self::Kick => write!(f, "Kick"),
            Self::Ban => write!(f, "Ban"),
        }
    }
}

impl ModActionKind {
    /// Whether this action restricts the user and must be undone later
    #[must_use]
    pub fn needs_reversal(self) -> bool {
        matches!(self, Self::Mute | Self::Ban)
    }

    /// How long the restriction lasts, for reversible actions
    #[must_use]
    pub fn duration(self) -> Option<Duration> {
        match self {
            Self::Mute => Some(Duration::seconds(MUTE_DURATION_SECS)),
            Self::Ban => Some(Duration::seconds(BAN_DURATION_SECS)),
            Self::Warn | Self::Kick => None,
        }
    }
}

/// Temporary-action lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum TempActionState {
    /// Restriction applied, waiting for the expiry
    #[default]
    Active,
    /// Restriction undone by the sweeper or a manual command
    Reversed,
    /// Cancelled by a moderator before expiry
    Cancelled,
}

impl fmt::Display for TempActionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active => write!(f, "Active"),
            Self::Reversed => write!(f, "Reversed"),
            Self::Cancelled => write!(f, "Cancelled"),
        }
    }
}

/// Record of a temporary moderation action awaiting reversal
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TempAction {
    /// Unique ID of this record
    pub id: String,
    /// Guild where the action was applied
    pub guild_id: u64,
    /// User the action was applied to
    pub user_id: u64,
    /// The kind of restriction in force
    pub kind: ModActionKind,
    /// Reason recorded for audit
    pub reason: String,
    /// When the restriction was applied
    pub applied_at: DateTime<Utc>,
    /// When the restriction should be lifted
    pub expires_at: DateTime<Utc>,
    /// Current lifecycle state
    pub state: TempActionState,
    /// When the restriction was lifted, if it has been
    pub reversed_at: Option<DateTime<Utc>>,
}

impl TempAction {
    /// Create a new active record for `kind`, expiring after its standard
    /// duration. `kind` must be reversible.
    pub fn new(
        guild_id: u64,
        user_id: u64,
        kind: ModActionKind,
        reason: impl Into<String>,
        now: DateTime<Utc>,
    ) -> SecurityResult<Self> {
        let Some(duration) = kind.duration() else {
            return Err(SecurityError::Other(format!(
                "{kind} is not a temporary action"
            )));
        };

        Ok(Self {
            id: Uuid::new_v4().to_string(),
            guild_id,
            user_id,
            kind,
            reason: reason.into(),
            applied_at: now,
            expires_at: now + duration,
            state: TempActionState::Active,
            reversed_at: None,
        })
    }

    /// Push the expiry out to one full duration from `now`
    ///
    /// # Errors
    /// Returns an error if the record is not Active
    pub fn renew(&mut self, now: DateTime<Utc>) -> SecurityResult<()> {
        if self.state != TempActionState::Active {
            return Err(SecurityError::InvalidStateTransition);
        }
        // kind is reversible by construction
        if let Some(duration) = self.kind.duration() {
            self.expires_at = now + duration;
        }

        info!(
            action_id = %self.id,
            user_id = %self.user_id,
            guild_id = %self.guild_id,
            kind = %self.kind,
            expires_at = %self.expires_at,
            "Temporary action renewed"
        );

        Ok(())
    }

    /// Mark the restriction as lifted, transitioning to Reversed
    ///
    /// # Errors
    /// Returns an error if the record is not Active
    pub fn reverse(&mut self, now: DateTime<Utc>) -> SecurityResult<()> {
        if self.state != TempActionState::Active {
            return Err(SecurityError::InvalidStateTransition);
        }

        self.state = TempActionState::Reversed;
        self.reversed_at = Some(now);

        info!(
            action_id = %self.id,
            user_id = %self.user_id,
            guild_id = %self.guild_id,
            kind = %self.kind,
            "Temporary action reversed"
        );

        Ok(())
    }

    /// Cancel the record, transitioning to Cancelled
    ///
    /// # Errors
    /// Returns an error if the record is not Active
    pub fn cancel(&mut self, now: DateTime<Utc>) -> SecurityResult<()> {
        if self.state != TempActionState::Active {
            return Err(SecurityError::InvalidStateTransition);
        }

        self.state = TempActionState::Cancelled;
        self.reversed_at = Some(now);

        info!(
            action_id = %self.id,
            user_id = %self.user_id,
            guild_id = %self.guild_id,
            kind = %self.kind,
            "Temporary action cancelled"
        );

        Ok(())
    }

    /// Check if the restriction should be lifted at `now`
    #[must_use]
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.state == TempActionState::Active && self.expires_at <= now
    }

    /// Check if the record is in a terminal state
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.state,
            TempActionState::Reversed | TempActionState::Cancelled
        )
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
    fn test_durations() {
        assert!(ModActionKind::Mute.needs_reversal());
        assert!(ModActionKind::Ban.needs_reversal());
        assert!(!ModActionKind::Warn.needs_reversal());
        assert!(!ModActionKind::Kick.needs_reversal());

        assert_eq!(
            ModActionKind::Mute.duration(),
            Some(Duration::seconds(900))
        );
        assert_eq!(
            ModActionKind::Ban.duration(),
            Some(Duration::seconds(86_400))
        );
        assert_eq!(ModActionKind::Kick.duration(), None);
    }

    #[test]
    fn test_non_temporary_kind_rejected() {
        let now = fixed_now();
        assert!(TempAction::new(1, 2, ModActionKind::Warn, "spam", now).is_err());
        assert!(TempAction::new(1, 2, ModActionKind::Kick, "spam", now).is_err());
    }

    #[test]
    fn test_state_transitions() {
        let now = fixed_now();
        let mut record = TempAction::new(67890, 12345, ModActionKind::Mute, "spam", now).unwrap();

        assert_eq!(record.state, TempActionState::Active);
        assert_eq!(record.expires_at, now + Duration::seconds(900));
        assert!(record.reversed_at.is_none());

        record.reverse(now + Duration::seconds(901)).unwrap();
        assert_eq!(record.state, TempActionState::Reversed);
        assert!(record.reversed_at.is_some());
        assert!(record.is_terminal());

        // Cannot reverse or cancel again
        assert!(record.reverse(now).is_err());
        assert!(record.cancel(now).is_err());
    }

    #[test]
    fn test_cancellation() {
        let now = fixed_now();
        let mut record = TempAction::new(67890, 12345, ModActionKind::Ban, "raid", now).unwrap();

        record.cancel(now + Duration::seconds(60)).unwrap();
        assert_eq!(record.state, TempActionState::Cancelled);
        assert!(record.is_terminal());
        assert!(record.renew(now).is_err());
    }

    #[test]
    fn test_due_check_uses_expiry() {
        let now = fixed_now();
        let record = TempAction::new(67890, 12345, ModActionKind::Mute, "spam", now).unwrap();

        // Never due before the expiry
        assert!(!record.is_due(now));
        assert!(!record.is_due(now + Duration::seconds(899)));
        // Due at and after the expiry
        assert!(record.is_due(now + Duration::seconds(900)));
        assert!(record.is_due(now + Duration::seconds(10_000)));
    }

    #[test]
    fn test_renew_extends_expiry() {
        let now = fixed_now();
        let mut record = TempAction::new(67890, 12345, ModActionKind::Mute, "spam", now).unwrap();
        let first_expiry = record.expires_at;

        let later = now + Duration::seconds(600);
        record.renew(later).unwrap();
        assert_eq!(record.expires_at, later + Duration::seconds(900));
        assert!(record.expires_at > first_expiry);
        assert_eq!(record.state, TempActionState::Active);
    }
}
