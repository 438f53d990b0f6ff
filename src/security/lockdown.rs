//! Guild raid lockdown
//!
//! Per-guild NORMAL/LOCKDOWN state machine plus the guild-wide side effects:
//! invite toggling, send-permission denial for the default role, and kicking
//! of very recent joiners. Re-entering lockdown while active only ever
//! extends the deadline; the restriction pass runs once per entry.

use crate::security::{SecurityError, SecurityResult};
use chrono::{DateTime, Duration, Utc};
use poise::serenity_prelude::{
    ChannelId, ChannelType, GuildId, Http, PermissionOverwrite, PermissionOverwriteType,
    Permissions, RoleId, UserId,
};
use serde::{Deserialize, Serialize};
use serenity::builder::EditGuild;
use tracing::{info, warn};

/// Automatic lockdown length after a message-raid detection
pub const RAID_LOCKDOWN_MINUTES: i64 = 5;
/// Automatic lockdown length after a join-rate overflow
pub const JOIN_RATE_LOCKDOWN_MINUTES: i64 = 30;
/// Bounds for manually requested lockdowns
pub const MANUAL_LOCKDOWN_MIN_MINUTES: i64 = 5;
pub const MANUAL_LOCKDOWN_MAX_MINUTES: i64 = 1440;

/// Members who joined within this window are kicked on lockdown entry
#[must_use]
pub fn recent_join_window() -> Duration {
    Duration::minutes(10)
}

/// Outcome of an engage request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngageOutcome {
    /// Transitioned NORMAL to LOCKDOWN; the restriction pass must run
    Entered,
    /// Already locked down; the deadline moved out
    Extended,
    /// Already locked down with a later deadline; nothing changed
    Unchanged,
}

/// Per-guild lockdown state, persisted with the guild settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockdownState {
    /// Whether the guild is currently locked down
    pub active: bool,
    /// When the lockdown lifts automatically
    pub until: Option<DateTime<Utc>>,
    /// Why the lockdown was entered
    pub reason: Option<String>,
}

impl LockdownState {
    /// Request a lockdown until `now + duration`. When already active the
    /// deadline only moves outward, never inward.
    pub fn engage(
        &mut self,
        duration: Duration,
        reason: impl Into<String>,
        now: DateTime<Utc>,
    ) -> EngageOutcome {
        let until = now + duration;

        if !self.active {
            self.active = true;
            self.until = Some(until);
            self.reason = Some(reason.into());
            return EngageOutcome::Entered;
        }

        if self.until.is_none_or(|current| until > current) {
            self.until = Some(until);
            EngageOutcome::Extended
        } else {
            EngageOutcome::Unchanged
        }
    }

    /// Return to NORMAL
    ///
    /// # Errors
    /// Returns an error if the guild is not locked down. The guild id is
    /// only used for the error message.
    pub fn release(&mut self, guild_id: u64) -> SecurityResult<()> {
        if !self.active {
            return Err(SecurityError::NotLockedDown(guild_id));
        }
        self.active = false;
        self.until = None;
        self.reason = None;
        Ok(())
    }

    /// Whether the automatic deadline has passed
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.active && self.until.is_some_and(|until| until <= now)
    }
}

/// Validate a manually requested lockdown duration
pub fn manual_duration(minutes: i64) -> SecurityResult<Duration> {
    if !(MANUAL_LOCKDOWN_MIN_MINUTES..=MANUAL_LOCKDOWN_MAX_MINUTES).contains(&minutes) {
        return Err(SecurityError::InvalidDuration {
            min: MANUAL_LOCKDOWN_MIN_MINUTES,
            max: MANUAL_LOCKDOWN_MAX_MINUTES,
        });
    }
    Ok(Duration::minutes(minutes))
}

const INVITES_DISABLED: &str = "INVITES_DISABLED";

/// Toggle the guild's invite pause feature flag
async fn set_invites_disabled(http: &Http, guild_id: GuildId, disabled: bool) -> SecurityResult<()> {
    let guild = guild_id.to_partial_guild(http).await.map_err(|e| {
        SecurityError::GuildOrMemberNotFound(format!("Failed to get guild {guild_id}: {e}"))
    })?;

    let mut features = guild.features.clone();
    let currently_disabled = features.iter().any(|f| f == INVITES_DISABLED);
    if disabled == currently_disabled {
        return Ok(());
    }
    if disabled {
        features.push(INVITES_DISABLED.to_string());
    } else {
        features.retain(|f| f != INVITES_DISABLED);
    }

    guild_id
        .edit(http, EditGuild::new().features(features))
        .await?;
    Ok(())
}

/// Text channels where the default role can currently read
async fn public_text_channels(http: &Http, guild_id: GuildId) -> SecurityResult<Vec<ChannelId>> {
    let everyone = RoleId::new(guild_id.get());
    let channels = guild_id.channels(http).await?;

    Ok(channels
        .iter()
        .filter(|(_, channel)| {
            channel.kind == ChannelType::Text
                && !channel.permission_overwrites.iter().any(|overwrite| {
                    overwrite.kind == PermissionOverwriteType::Role(everyone)
                        && overwrite.deny.contains(Permissions::VIEW_CHANNEL)
                })
        })
        .map(|(id, _)| *id)
        .collect())
}

/// Restriction pass run once on lockdown entry: pause invites and deny send
/// for the default role on every public text channel. Failures on one
/// channel are logged and do not stop the others.
pub async fn apply_restrictions(http: &Http, guild_id: GuildId) -> SecurityResult<()> {
    if let Err(e) = set_invites_disabled(http, guild_id, true).await {
        warn!(guild_id = %guild_id, error = %e, "Failed to pause invites");
    }

    let everyone = RoleId::new(guild_id.get());
    let overwrite = PermissionOverwrite {
        allow: Permissions::empty(),
        deny: Permissions::SEND_MESSAGES,
        kind: PermissionOverwriteType::Role(everyone),
    };

    for channel_id in public_text_channels(http, guild_id).await? {
        if let Err(e) = channel_id.create_permission(http, overwrite.clone()).await {
            warn!(
                guild_id = %guild_id,
                channel_id = %channel_id,
                error = %e,
                "Failed to restrict channel"
            );
        }
    }

    info!(guild_id = %guild_id, "Lockdown restrictions applied");
    Ok(())
}

/// Reverse pass on lockdown exit: drop the default-role overwrite (the
/// channel falls back to inherited permissions) and resume invites.
pub async fn lift_restrictions(http: &Http, guild_id: GuildId) -> SecurityResult<()> {
    let everyone = RoleId::new(guild_id.get());

    for channel_id in public_text_channels(http, guild_id).await? {
        if let Err(e) = channel_id
            .delete_permission(http, PermissionOverwriteType::Role(everyone))
            .await
        {
            warn!(
                guild_id = %guild_id,
                channel_id = %channel_id,
                error = %e,
                "Failed to restore channel"
            );
        }
    }

    if let Err(e) = set_invites_disabled(http, guild_id, false).await {
        warn!(guild_id = %guild_id, error = %e, "Failed to resume invites");
    }

    info!(guild_id = %guild_id, "Lockdown restrictions lifted");
    Ok(())
}

/// Kick the given recent joiners, DM first. Entirely best-effort; a failed
/// kick is logged and the rest proceed.
pub async fn kick_recent_joiners(http: &Http, guild_id: GuildId, user_ids: &[u64]) {
    for &user_id in user_ids {
        let user = UserId::new(user_id);
        if let Ok(dm) = user.create_dm_channel(http).await {
            let _ = dm
                .say(
                    http,
                    "The server you just joined has entered raid lockdown. \
                     You have been removed as a precaution; please rejoin later.",
                )
                .await;
        }

        match guild_id
            .kick_with_reason(http, user, "Joined during raid lockdown")
            .await
        {
            Ok(()) => info!(guild_id = %guild_id, user_id, "Kicked recent joiner"),
            Err(e) => warn!(
                guild_id = %guild_id,
                user_id,
                error = %e,
                "Failed to kick recent joiner"
            ),
        }
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
    fn test_engage_from_normal() {
        let mut state = LockdownState::default();
        let now = fixed_now();

        let outcome = state.engage(Duration::minutes(5), "raid detected", now);
        assert_eq!(outcome, EngageOutcome::Entered);
        assert!(state.active);
        assert_eq!(state.until, Some(now + Duration::minutes(5)));
        assert_eq!(state.reason.as_deref(), Some("raid detected"));
    }

    #[test]
    fn test_reentrant_engage_only_extends() {
        let mut state = LockdownState::default();
        let now = fixed_now();

        state.engage(Duration::minutes(30), "join surge", now);
        let long_deadline = state.until;

        // A shorter re-entry never pulls the deadline in
        let outcome = state.engage(Duration::minutes(5), "raid", now);
        assert_eq!(outcome, EngageOutcome::Unchanged);
        assert_eq!(state.until, long_deadline);

        // A longer one pushes it out without re-entering
        let outcome = state.engage(Duration::minutes(60), "manual", now);
        assert_eq!(outcome, EngageOutcome::Extended);
        assert_eq!(state.until, Some(now + Duration::minutes(60)));
        // Original reason survives
        assert_eq!(state.reason.as_deref(), Some("join surge"));
    }

    #[test]
    fn test_release_requires_active() {
        let mut state = LockdownState::default();
        assert!(matches!(
            state.release(42),
            Err(SecurityError::NotLockedDown(42))
        ));

        let now = fixed_now();
        state.engage(Duration::minutes(5), "raid", now);
        state.release(42).unwrap();
        assert!(!state.active);
        assert!(state.until.is_none());
        assert!(state.reason.is_none());
    }

    #[test]
    fn test_expiry() {
        let mut state = LockdownState::default();
        let now = fixed_now();

        assert!(!state.is_expired(now));
        state.engage(Duration::minutes(5), "raid", now);

        assert!(!state.is_expired(now + Duration::minutes(4)));
        assert!(state.is_expired(now + Duration::minutes(5)));
        assert!(state.is_expired(now + Duration::minutes(50)));
    }

    #[test]
    fn test_manual_duration_bounds() {
        assert!(manual_duration(4).is_err());
        assert!(manual_duration(1441).is_err());
        assert_eq!(manual_duration(5).unwrap(), Duration::minutes(5));
        assert_eq!(manual_duration(1440).unwrap(), Duration::minutes(1440));
        assert!(matches!(
            manual_duration(0),
            Err(SecurityError::InvalidDuration { min: 5, max: 1440 })
        ));
    }
}
