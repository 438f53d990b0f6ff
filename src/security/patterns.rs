//! Detection patterns for scam and raid heuristics
//!
//! Compiled regex set backing the rule engine: URL and custom-emoji
//! extraction, suspicious-content patterns, known scam-domain fragments and
//! the random-username check. Patterns ship with compiled-in defaults and can
//! be overridden from a versioned YAML file so new scam waves don't require a
//! redeploy.

use crate::security::{SecurityError, SecurityResult};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

/// Pattern configuration, loadable from `config/patterns.yaml`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternConfig {
    /// Config schema version, bumped when the field layout changes
    #[serde(default = "default_version")]
    pub version: u32,

    /// Regexes that mark message content or usernames as suspicious
    #[serde(default = "default_suspicious_patterns")]
    pub suspicious_patterns: Vec<String>,

    /// Substrings of known scam/phishing domains
    #[serde(default = "default_scam_domains")]
    pub scam_domains: Vec<String>,
}

fn default_version() -> u32 {
    1
}

fn default_suspicious_patterns() -> Vec<String> {
    [
        r"discord\.gg/",
        r"[a-zA-Z0-9]{15,}",
        r"(?i)(nitro|free|gift|steam|airdrop)",
        r"(h-t-t-p-s|h\.t\.t\.p\.s|h_t_t_p_s)",
        r"[a-zA-Z0-9]+\.[a-z]{2,6}/[a-zA-Z0-9]+",
    ]
    .iter()
    .map(ToString::to_string)
    .collect()
}

fn default_scam_domains() -> Vec<String> {
    [
        "discordap.com",
        "discordnitro.fun",
        "discord-app.net",
        "steamcomunnity",
        "dlscrod",
        "discocl",
        "discordgift",
        "steancommunity",
    ]
    .iter()
    .map(ToString::to_string)
    .collect()
}

impl Default for PatternConfig {
    fn default() -> Self {
        Self {
            version: default_version(),
            suspicious_patterns: default_suspicious_patterns(),
            scam_domains: default_scam_domains(),
        }
    }
}

impl PatternConfig {
    /// Load the configuration from a YAML file, falling back to the defaults
    /// when the file does not exist.
    pub fn load(path: impl AsRef<Path>) -> SecurityResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            debug!(path = %path.display(), "No pattern file, using built-in defaults");
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(path)
            .map_err(|e| SecurityError::PatternConfig(format!("{}: {e}", path.display())))?;
        let config: Self = serde_yaml::from_str(&contents)
            .map_err(|e| SecurityError::PatternConfig(format!("{}: {e}", path.display())))?;

        debug!(
            path = %path.display(),
            version = config.version,
            patterns = config.suspicious_patterns.len(),
            domains = config.scam_domains.len(),
            "Loaded pattern configuration"
        );
        Ok(config)
    }
}

/// Compiled pattern set used by the rule engine
#[derive(Debug)]
pub struct PatternSet {
    config: PatternConfig,
    suspicious: Vec<Regex>,
    url: Regex,
    emoji: Regex,
    invite: Regex,
    random_name: Regex,
}

impl PatternSet {
    /// Compile the given configuration
    ///
    /// # Errors
    /// Returns `PatternConfig` if any configured regex is invalid.
    pub fn new(config: PatternConfig) -> SecurityResult<Self> {
        let mut suspicious = Vec::with_capacity(config.suspicious_patterns.len());
        for pattern in &config.suspicious_patterns {
            let regex = Regex::new(pattern).map_err(|e| {
                SecurityError::PatternConfig(format!("invalid pattern '{pattern}': {e}"))
            })?;
            suspicious.push(regex);
        }

        // The fixed regexes are compiled from literals and cannot fail.
        let url = Regex::new(
            r"https?://(?:[a-zA-Z0-9]|[$\-_@.&+]|[!*(),]|%[0-9a-fA-F]{2})+",
        )
        .map_err(|e| SecurityError::PatternConfig(e.to_string()))?;
        let emoji = Regex::new(r"<a?:[a-zA-Z0-9_]+:[0-9]+>|[\x{10000}-\x{10FFFF}]")
            .map_err(|e| SecurityError::PatternConfig(e.to_string()))?;
        let invite = Regex::new(r"discord\.gg/")
            .map_err(|e| SecurityError::PatternConfig(e.to_string()))?;
        let random_name = Regex::new(r"^[A-Za-z0-9]{8,}$")
            .map_err(|e| SecurityError::PatternConfig(e.to_string()))?;

        Ok(Self {
            config,
            suspicious,
            url,
            emoji,
            invite,
            random_name,
        })
    }

    /// Compile the defaults, with a YAML override file taking precedence
    pub fn load(path: impl AsRef<Path>) -> SecurityResult<Self> {
        Self::new(PatternConfig::load(path)?)
    }

    /// Pattern set built from the compiled-in defaults. Used at startup when
    /// no override file is configured.
    #[must_use]
    pub fn builtin() -> Self {
        Self::new(PatternConfig::default()).expect("Valid built-in patterns")
    }

    /// Number of URLs in `content`
    #[must_use]
    pub fn count_urls(&self, content: &str) -> usize {
        self.url.find_iter(content).count()
    }

    /// Number of custom or unicode emojis in `content`
    #[must_use]
    pub fn count_emojis(&self, content: &str) -> usize {
        self.emoji.find_iter(content).count()
    }

    /// Whether `content` contains a Discord invite link
    #[must_use]
    pub fn contains_invite(&self, content: &str) -> bool {
        self.invite.is_match(content)
    }

    /// Whether any suspicious pattern matches `text`
    #[must_use]
    pub fn matches_suspicious(&self, text: &str) -> bool {
        self.suspicious.iter().any(|regex| regex.is_match(text))
    }

    /// Whether `content` mentions a known scam domain
    #[must_use]
    pub fn contains_scam_domain(&self, content: &str) -> bool {
        let lowered = content.to_lowercase();
        self.config
            .scam_domains
            .iter()
            .any(|domain| lowered.contains(domain))
    }

    /// Whether `name` looks like a machine-generated username
    #[must_use]
    pub fn looks_generated(&self, name: &str) -> bool {
        self.random_name.is_match(name)
    }

    /// The configuration this set was compiled from
    #[must_use]
    pub fn config(&self) -> &PatternConfig {
        &self.config
    }
}

impl Default for PatternSet {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_counting() {
        let patterns = PatternSet::builtin();
        assert_eq!(patterns.count_urls("no links here"), 0);
        assert_eq!(patterns.count_urls("see https://example.com"), 1);
        assert_eq!(
            patterns.count_urls("http://a.com and https://b.org/page"),
            2
        );
    }

    #[test]
    fn test_emoji_counting() {
        let patterns = PatternSet::builtin();
        assert_eq!(patterns.count_emojis("plain text"), 0);
        assert_eq!(patterns.count_emojis("<:pepe:123456789>"), 1);
        assert_eq!(patterns.count_emojis("<a:party:987654321> 😀 😀"), 3);
    }

    #[test]
    fn test_invite_detection() {
        let patterns = PatternSet::builtin();
        assert!(patterns.contains_invite("join discord.gg/abc123"));
        assert!(!patterns.contains_invite("join my server"));
    }

    #[test]
    fn test_suspicious_patterns() {
        let patterns = PatternSet::builtin();
        assert!(patterns.matches_suspicious("FREE NITRO for everyone"));
        assert!(patterns.matches_suspicious("click h-t-t-p-s colon slash slash"));
        assert!(patterns.matches_suspicious("bit.ly/abc123"));
        assert!(!patterns.matches_suspicious("hello there"));
    }

    #[test]
    fn test_scam_domains() {
        let patterns = PatternSet::builtin();
        assert!(patterns.contains_scam_domain("go to dIscOrDaP.com now"));
        assert!(patterns.contains_scam_domain("steancommunity login"));
        assert!(!patterns.contains_scam_domain("discord.com/channels"));
    }

    #[test]
    fn test_generated_names() {
        let patterns = PatternSet::builtin();
        assert!(patterns.looks_generated("Xk9mPq2zL"));
        assert!(!patterns.looks_generated("alice"));
        assert!(!patterns.looks_generated("cool_name_42"));
    }

    #[test]
    fn test_invalid_pattern_rejected() {
        let config = PatternConfig {
            suspicious_patterns: vec!["[unclosed".to_string()],
            ..Default::default()
        };
        assert!(matches!(
            PatternSet::new(config),
            Err(SecurityError::PatternConfig(_))
        ));
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let config = PatternConfig::load("/nonexistent/patterns.yaml").unwrap();
        assert_eq!(config.scam_domains, default_scam_domains());
    }
}
