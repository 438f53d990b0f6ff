//! Error types for the security subsystem
//!
//! This module defines the various errors that can occur while evaluating
//! events and applying moderation actions.

use thiserror::Error;

/// Errors that can occur during security operations
#[derive(Debug, Error)]
pub enum SecurityError {
    /// Unknown profile level name; the active profile is left untouched
    #[error("Unknown level: {0}")]
    InvalidLevel(String),

    /// Invalid state transition attempted on a temporary action
    #[error("Invalid state transition")]
    InvalidStateTransition,

    /// Temporary action record not found
    #[error("Temporary action not found: {0}")]
    NotFound(String),

    /// Manual unmute requested for a subject with no active mute
    #[error("User {0} is not muted")]
    NotMuted(u64),

    /// Manual unban requested for a subject with no active temporary ban
    #[error("User {0} is not banned")]
    NotBanned(u64),

    /// Manual unlock requested for a guild that is not in lockdown
    #[error("Guild {0} is not in lockdown")]
    NotLockedDown(u64),

    /// Lockdown duration outside the accepted range
    #[error("Lockdown duration must be between {min} and {max} minutes")]
    InvalidDuration { min: i64, max: i64 },

    /// Discord API error
    #[error("Discord API error: {0}")]
    DiscordApi(#[from] Box<poise::serenity_prelude::Error>),

    /// Failed to get guild or member
    #[error("Failed to get guild or member: {0}")]
    GuildOrMemberNotFound(String),

    /// Pattern file could not be read or parsed
    #[error("Pattern configuration error: {0}")]
    PatternConfig(String),

    /// Generic error
    #[error("Security error: {0}")]
    Other(String),
}

impl From<poise::serenity_prelude::Error> for SecurityError {
    fn from(error: poise::serenity_prelude::Error) -> Self {
        Self::DiscordApi(Box::new(error))
    }
}

impl From<String> for SecurityError {
    fn from(message: String) -> Self {
        Self::Other(message)
    }
}

/// Result type for security operations
pub type SecurityResult<T> = Result<T, SecurityError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = SecurityError::InvalidLevel("maximum".to_string());
        assert_eq!(error.to_string(), "Unknown level: maximum");

        let error = SecurityError::NotMuted(42);
        assert_eq!(error.to_string(), "User 42 is not muted");

        let error = SecurityError::InvalidDuration { min: 5, max: 1440 };
        assert_eq!(
            error.to_string(),
            "Lockdown duration must be between 5 and 1440 minutes"
        );

        let error = SecurityError::from("something went wrong".to_string());
        assert_eq!(error.to_string(), "Security error: something went wrong");
    }
}
