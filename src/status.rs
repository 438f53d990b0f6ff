//! Status rendering
//!
//! Turns a [`StatusSnapshot`] from the security service into the embeds the
//! `/security status` and `/shield status` commands reply with.

use crate::security::service::StatusSnapshot;
use chrono::{DateTime, Utc};
use poise::serenity_prelude::{self as serenity, Colour};
use serenity::builder::CreateEmbed;
use std::fmt::Write as _;

/// Human form of a deadline relative to `now`, e.g. "4m" or "2h 30m"
#[must_use]
pub fn format_remaining(until: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let seconds = (until - now).num_seconds();
    if seconds <= 0 {
        return "now".to_string();
    }
    let minutes = seconds / 60;
    let hours = minutes / 60;
    if hours > 0 {
        format!("{hours}h {}m", minutes % 60)
    } else if minutes > 0 {
        format!("{minutes}m")
    } else {
        format!("{seconds}s")
    }
}

/// One line per active temporary action
#[must_use]
pub fn format_active_actions(snapshot: &StatusSnapshot, now: DateTime<Utc>) -> String {
    if snapshot.active_actions.is_empty() {
        return "None".to_string();
    }

    let mut result = String::new();
    for action in &snapshot.active_actions {
        let remaining = format_remaining(action.expires_at, now);
        let _ = writeln!(
            result,
            "<@{}> {} ({remaining} left): {}",
            action.user_id, action.kind, action.reason
        );
    }
    result
}

/// Embed for `/security status`
#[must_use]
pub fn security_status_embed(snapshot: &StatusSnapshot, now: DateTime<Utc>) -> CreateEmbed {
    let profile = snapshot.security_level.profile();
    let counters = snapshot.counters;

    CreateEmbed::new()
        .title("Security Status")
        .colour(Colour::BLURPLE)
        .field("Level", snapshot.security_level.to_string(), true)
        .field("Default Action", profile.action.to_string(), true)
        .field(
            "Thresholds",
            format!(
                "{} msgs/10s, {} mentions, {} URLs, {} emoji, {:.0}% similarity, raid at {} joins/30s",
                profile.message_rate,
                profile.mention_limit,
                profile.url_limit,
                profile.emoji_limit,
                profile.similarity_threshold * 100.0,
                profile.raid_threshold,
            ),
            false,
        )
        .field("Active Actions", format_active_actions(snapshot, now), false)
        .field(
            "Counters",
            format!(
                "{} messages checked, {} spam actions, {} raids detected",
                counters.messages_checked, counters.spam_actions, counters.raids_detected,
            ),
            false,
        )
        .timestamp(serenity::Timestamp::now())
}

/// Embed for `/shield status`
#[must_use]
pub fn shield_status_embed(snapshot: &StatusSnapshot, now: DateTime<Utc>) -> CreateEmbed {
    let profile = snapshot.shield_level.profile();
    let counters = snapshot.counters;

    let lockdown = if snapshot.lockdown.active {
        let remaining = snapshot
            .lockdown
            .until
            .map_or_else(|| "indefinite".to_string(), |at| format_remaining(at, now));
        let reason = snapshot.lockdown.reason.as_deref().unwrap_or("unspecified");
        format!("ACTIVE ({remaining} left): {reason}")
    } else {
        "Inactive".to_string()
    };

    let min_age = profile
        .min_account_age_days
        .map_or_else(|| "none".to_string(), |days| format!("{days} days"));

    CreateEmbed::new()
        .title("Shield Status")
        .colour(Colour::BLURPLE)
        .field("Level", snapshot.shield_level.to_string(), true)
        .field("Join Rate Limit", format!("{}/min", profile.join_rate_limit), true)
        .field(
            "Gates",
            format!(
                "verification: {}, invite restriction: {}, min account age: {min_age}, auto-ban suspicious: {}",
                profile.verification_required, profile.invite_restriction, profile.auto_ban_suspicious,
            ),
            false,
        )
        .field("Lockdown", lockdown, false)
        .field("Trusted Members", snapshot.trusted_count.to_string(), true)
        .field(
            "Counters",
            format!(
                "{} joins gated, {} suspicious accounts flagged",
                counters.joins_gated, counters.suspicious_flagged,
            ),
            false,
        )
        .timestamp(serenity::Timestamp::now())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn fixed_now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-06-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn test_format_remaining() {
        let now = fixed_now();
        assert_eq!(format_remaining(now, now), "now");
        assert_eq!(format_remaining(now + Duration::seconds(45), now), "45s");
        assert_eq!(format_remaining(now + Duration::minutes(14), now), "14m");
        assert_eq!(
            format_remaining(now + Duration::minutes(150), now),
            "2h 30m"
        );
        assert_eq!(format_remaining(now - Duration::minutes(5), now), "now");
    }
}
