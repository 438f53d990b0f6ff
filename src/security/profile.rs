//! Threshold profiles
//!
//! Named configuration tiers for the spam rules and the shield (join/raid)
//! rules. Exactly one spam level is active at a time for the whole process;
//! the shield level is tracked per guild. Selecting an unknown level name is
//! rejected without mutating anything.

use crate::security::{ModActionKind, SecurityError, SecurityResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Named spam-protection tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SecurityLevel {
    Low,
    #[default]
    Medium,
    High,
    Extreme,
}

impl fmt::Display for SecurityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
            Self::Extreme => write!(f, "extreme"),
        }
    }
}

impl FromStr for SecurityLevel {
    type Err = SecurityError;

    fn from_str(s: &str) -> SecurityResult<Self> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "extreme" => Ok(Self::Extreme),
            other => Err(SecurityError::InvalidLevel(other.to_string())),
        }
    }
}

/// Numeric limits for the spam rule chain at one security level
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpamProfile {
    /// Max messages per 10 seconds
    pub message_rate: usize,
    /// Max mentions per message
    pub mention_limit: usize,
    /// Max URLs per message
    pub url_limit: usize,
    /// Max emojis per message
    pub emoji_limit: usize,
    /// Bigram-similarity threshold (0.0 to 1.0)
    pub similarity_threshold: f64,
    /// Max joins per 30 seconds before raid lockdown
    pub raid_threshold: usize,
    /// Action taken when a rule fires
    pub action: ModActionKind,
}

impl SecurityLevel {
    /// Limits for this level
    #[must_use]
    pub fn profile(self) -> SpamProfile {
        match self {
            Self::Low => SpamProfile {
                message_rate: 10,
                mention_limit: 5,
                url_limit: 3,
                emoji_limit: 10,
                similarity_threshold: 0.85,
                raid_threshold: 7,
                action: ModActionKind::Warn,
            },
            Self::Medium => SpamProfile {
                message_rate: 7,
                mention_limit: 4,
                url_limit: 2,
                emoji_limit: 8,
                similarity_threshold: 0.75,
                raid_threshold: 5,
                action: ModActionKind::Mute,
            },
            Self::High => SpamProfile {
                message_rate: 5,
                mention_limit: 3,
                url_limit: 1,
                emoji_limit: 5,
                similarity_threshold: 0.65,
                raid_threshold: 3,
                action: ModActionKind::Kick,
            },
            Self::Extreme => SpamProfile {
                message_rate: 3,
                mention_limit: 2,
                url_limit: 0,
                emoji_limit: 3,
                similarity_threshold: 0.50,
                raid_threshold: 2,
                action: ModActionKind::Ban,
            },
        }
    }
}

/// Named shield (join/raid) protection tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ShieldLevel {
    Low,
    #[default]
    Medium,
    High,
    Lockdown,
}

impl fmt::Display for ShieldLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
            Self::Lockdown => write!(f, "lockdown"),
        }
    }
}

impl FromStr for ShieldLevel {
    type Err = SecurityError;

    fn from_str(s: &str) -> SecurityResult<Self> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "lockdown" => Ok(Self::Lockdown),
            other => Err(SecurityError::InvalidLevel(other.to_string())),
        }
    }
}

/// Limits and toggles for the shield at one protection level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShieldProfile {
    /// Max joins per minute before lockdown
    pub join_rate_limit: usize,
    /// Whether new members must complete reaction verification
    pub verification_required: bool,
    /// Whether invites are restricted at this level
    pub invite_restriction: bool,
    /// Minimum account age in days, if new accounts are gated
    pub min_account_age_days: Option<i64>,
    /// Whether suspicious accounts are banned automatically
    pub auto_ban_suspicious: bool,
}

impl ShieldLevel {
    /// Limits for this level
    #[must_use]
    pub fn profile(self) -> ShieldProfile {
        match self {
            Self::Low => ShieldProfile {
                join_rate_limit: 5,
                verification_required: false,
                invite_restriction: false,
                min_account_age_days: None,
                auto_ban_suspicious: false,
            },
            Self::Medium => ShieldProfile {
                join_rate_limit: 3,
                verification_required: true,
                invite_restriction: false,
                min_account_age_days: Some(3),
                auto_ban_suspicious: false,
            },
            Self::High => ShieldProfile {
                join_rate_limit: 2,
                verification_required: true,
                invite_restriction: true,
                min_account_age_days: Some(7),
                auto_ban_suspicious: true,
            },
            Self::Lockdown => ShieldProfile {
                join_rate_limit: 1,
                verification_required: true,
                invite_restriction: true,
                min_account_age_days: Some(14),
                auto_ban_suspicious: true,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_security_level_parsing() {
        assert_eq!("medium".parse::<SecurityLevel>().unwrap(), SecurityLevel::Medium);
        assert_eq!("EXTREME".parse::<SecurityLevel>().unwrap(), SecurityLevel::Extreme);
        assert!(matches!(
            "nonexistent".parse::<SecurityLevel>(),
            Err(SecurityError::InvalidLevel(level)) if level == "nonexistent"
        ));
    }

    #[test]
    fn test_shield_level_parsing() {
        assert_eq!("lockdown".parse::<ShieldLevel>().unwrap(), ShieldLevel::Lockdown);
        assert!("fortress".parse::<ShieldLevel>().is_err());
    }

    #[test]
    fn test_profiles_tighten_with_level() {
        let low = SecurityLevel::Low.profile();
        let medium = SecurityLevel::Medium.profile();
        let high = SecurityLevel::High.profile();
        let extreme = SecurityLevel::Extreme.profile();

        assert!(low.message_rate > medium.message_rate);
        assert!(medium.message_rate > high.message_rate);
        assert!(high.message_rate > extreme.message_rate);

        assert!(low.similarity_threshold > extreme.similarity_threshold);
        assert_eq!(extreme.url_limit, 0);
        assert_eq!(medium.action, ModActionKind::Mute);
        assert_eq!(extreme.action, ModActionKind::Ban);
    }

    #[test]
    fn test_shield_profiles() {
        let low = ShieldLevel::Low.profile();
        assert!(!low.verification_required);
        assert!(low.min_account_age_days.is_none());

        let high = ShieldLevel::High.profile();
        assert!(high.auto_ban_suspicious);
        assert_eq!(high.min_account_age_days, Some(7));

        let lockdown = ShieldLevel::Lockdown.profile();
        assert_eq!(lockdown.join_rate_limit, 1);
        assert_eq!(lockdown.min_account_age_days, Some(14));
    }

    #[test]
    fn test_level_display_round_trip() {
        for level in [
            SecurityLevel::Low,
            SecurityLevel::Medium,
            SecurityLevel::High,
            SecurityLevel::Extreme,
        ] {
            assert_eq!(level.to_string().parse::<SecurityLevel>().unwrap(), level);
        }
        for level in [
            ShieldLevel::Low,
            ShieldLevel::Medium,
            ShieldLevel::High,
            ShieldLevel::Lockdown,
        ] {
            assert_eq!(level.to_string().parse::<ShieldLevel>().unwrap(), level);
        }
    }
}
