//! Shared bot state
//!
//! Per-guild settings with YAML persistence, plus the owned security
//! service. `Data` is handed to poise and also stored in serenity's type
//! map so the raw event handler can reach it.

use std::{
    collections::HashSet,
    ops::{Deref, DerefMut},
    sync::Arc,
};

use crate::security::{LockdownState, PatternSet, SecurityService, ShieldLevel};
use dashmap::DashMap;
use poise::serenity_prelude as serenity;
use serde::{Deserialize, Serialize};
use serenity::prelude::TypeMapKey;
use tracing::warn;

const SETTINGS_FILE: &str = "data/guild_settings.yaml";
const PATTERNS_FILE: &str = "config/patterns.yaml";

/// Persisted per-guild configuration and shield state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuildSettings {
    /// The ID of the guild
    pub guild_id: u64,
    /// Shield (join protection) level for this guild
    #[serde(default)]
    pub shield_level: ShieldLevel,
    /// Channel where verification prompts are posted
    pub verification_channel_id: Option<u64>,
    /// Channel receiving moderation log embeds
    pub log_channel_id: Option<u64>,
    /// Members exempt from the shield checks
    #[serde(default)]
    pub trusted_members: HashSet<u64>,
    /// Current lockdown state, kept across restarts
    #[serde(default)]
    pub lockdown: LockdownState,
}

impl GuildSettings {
    /// Fresh settings for a guild at the default shield level
    #[must_use]
    pub fn new(guild_id: u64) -> Self {
        Self {
            guild_id,
            shield_level: ShieldLevel::default(),
            verification_channel_id: None,
            log_channel_id: None,
            trusted_members: HashSet::new(),
            lockdown: LockdownState::default(),
        }
    }
}

/// Centralized data structure for the bot
#[derive(Clone)]
pub struct Data(pub Arc<DataInner>);

impl TypeMapKey for Data {
    type Value = Data;
}

impl Default for Data {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Data {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Data")
            .field("guilds", &self.settings.len())
            .finish_non_exhaustive()
    }
}

impl Deref for Data {
    type Target = DataInner;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for Data {
    fn deref_mut(&mut self) -> &mut Self::Target {
        Arc::make_mut(&mut self.0)
    }
}

impl Data {
    /// Create an empty instance with the built-in detection patterns
    #[must_use]
    pub fn new() -> Self {
        Self(Arc::new(DataInner::new(PatternSet::builtin())))
    }

    /// Load settings and detection patterns from disk
    pub async fn load() -> Self {
        Self(Arc::new(DataInner::load().await))
    }

    /// Save the per-guild settings to YAML
    ///
    /// # Errors
    /// Returns an error when the data directory cannot be created or the
    /// settings cannot be serialized or written.
    pub async fn save(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.0.save().await
    }

    /// Settings for one guild, defaults if never configured
    #[must_use]
    pub fn guild_settings(&self, guild_id: u64) -> GuildSettings {
        self.settings
            .get(&guild_id)
            .map(|entry| entry.value().clone())
            .unwrap_or_else(|| GuildSettings::new(guild_id))
    }

    /// Add a member to a guild's trust list. Returns false if already
    /// present.
    pub fn trust_add(&self, guild_id: u64, user_id: u64) -> bool {
        self.settings
            .entry(guild_id)
            .or_insert_with(|| GuildSettings::new(guild_id))
            .trusted_members
            .insert(user_id)
    }

    /// Remove a member from a guild's trust list. Returns false if they
    /// were not on it.
    pub fn trust_remove(&self, guild_id: u64, user_id: u64) -> bool {
        self.settings
            .get_mut(&guild_id)
            .is_some_and(|mut entry| entry.trusted_members.remove(&user_id))
    }

    /// Set the verification prompt channel for a guild
    pub fn set_verification_channel(&self, guild_id: u64, channel_id: u64) {
        self.settings
            .entry(guild_id)
            .or_insert_with(|| GuildSettings::new(guild_id))
            .verification_channel_id = Some(channel_id);
    }

    /// Set the moderation log channel for a guild
    pub fn set_log_channel(&self, guild_id: u64, channel_id: u64) {
        self.settings
            .entry(guild_id)
            .or_insert_with(|| GuildSettings::new(guild_id))
            .log_channel_id = Some(channel_id);
    }
}

/// Inner shared state
#[derive(Clone)]
pub struct DataInner {
    /// Map of guild_id -> persisted settings, shared with the service
    pub settings: Arc<DashMap<u64, GuildSettings>>,
    /// The security service
    pub security: Arc<SecurityService>,
}

impl Default for DataInner {
    fn default() -> Self {
        Self::new(PatternSet::builtin())
    }
}

impl DataInner {
    /// Create an empty instance
    #[must_use]
    pub fn new(patterns: PatternSet) -> Self {
        let settings = Arc::new(DashMap::new());
        let security = Arc::new(SecurityService::new(Arc::clone(&settings), patterns));
        Self { settings, security }
    }

    /// Load the guild settings YAML (missing file means empty settings)
    /// and the pattern override file.
    pub async fn load() -> Self {
        let patterns = match PatternSet::load(PATTERNS_FILE) {
            Ok(patterns) => patterns,
            Err(e) => {
                warn!(error = %e, "Pattern file invalid, using built-in defaults");
                PatternSet::builtin()
            }
        };
        let data = Self::new(patterns);

        if let Ok(file_content) = tokio::fs::read_to_string(SETTINGS_FILE).await {
            match serde_yaml::from_str::<Vec<GuildSettings>>(&file_content) {
                Ok(all_settings) => {
                    for settings in all_settings {
                        data.settings.insert(settings.guild_id, settings);
                    }
                }
                Err(e) => warn!(error = %e, "Failed to parse guild settings, starting empty"),
            }
        }
        data
    }

    /// Save all guild settings to YAML
    ///
    /// # Errors
    /// Returns an error when the data directory cannot be created or the
    /// settings cannot be serialized or written.
    pub async fn save(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        const DATA_DIR: &str = "data";

        if !std::path::Path::new(DATA_DIR).exists() {
            tokio::fs::create_dir_all(DATA_DIR).await?;
        }

        let all_settings: Vec<GuildSettings> = self
            .settings
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        let yaml = serde_yaml::to_string(&all_settings)?;
        tokio::fs::write(SETTINGS_FILE, yaml).await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_new() {
        let data = Data::new();
        assert_eq!(data.settings.len(), 0);
        assert_eq!(data.guild_settings(1).shield_level, ShieldLevel::Medium);
    }

    #[test]
    fn test_trust_list() {
        let data = Data::new();

        assert!(data.trust_add(1, 42));
        assert!(!data.trust_add(1, 42));
        assert!(data.security.is_trusted(1, 42));
        assert!(!data.security.is_trusted(1, 43));
        assert!(!data.security.is_trusted(2, 42));

        assert!(data.trust_remove(1, 42));
        assert!(!data.trust_remove(1, 42));
        assert!(!data.security.is_trusted(1, 42));
    }

    #[test]
    fn test_channel_configuration() {
        let data = Data::new();
        data.set_verification_channel(1, 100);
        data.set_log_channel(1, 200);

        let settings = data.guild_settings(1);
        assert_eq!(settings.verification_channel_id, Some(100));
        assert_eq!(settings.log_channel_id, Some(200));
    }

    #[test]
    fn test_guild_settings_serialization() {
        let mut settings = GuildSettings::new(12345);
        settings.shield_level = ShieldLevel::High;
        settings.verification_channel_id = Some(67890);
        settings.trusted_members.insert(42);

        let serialized = serde_yaml::to_string(&settings).expect("Failed to serialize");
        assert!(serialized.contains("guild_id: 12345"));
        assert!(serialized.contains("shield_level: high"));
        assert!(serialized.contains("verification_channel_id: 67890"));

        let deserialized: GuildSettings =
            serde_yaml::from_str(&serialized).expect("Failed to deserialize");
        assert_eq!(deserialized.guild_id, 12345);
        assert_eq!(deserialized.shield_level, ShieldLevel::High);
        assert!(deserialized.trusted_members.contains(&42));
        assert!(!deserialized.lockdown.active);
    }

    #[test]
    fn test_settings_deserialize_with_defaults() {
        // Old records without the newer fields still load
        let yaml = "guild_id: 7\nverification_channel_id: null\nlog_channel_id: null\n";
        let settings: GuildSettings = serde_yaml::from_str(yaml).expect("Failed to deserialize");
        assert_eq!(settings.guild_id, 7);
        assert_eq!(settings.shield_level, ShieldLevel::Medium);
        assert!(settings.trusted_members.is_empty());
    }
}
