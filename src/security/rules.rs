//! Abuse rule evaluation
//!
//! Pure verdict functions over the event history. The engine only decides;
//! message deletion and moderation actions are signalled through the verdict
//! and performed by the executor. The spam checks short-circuit in priority
//! order: rate, mentions, URLs, emojis, similarity.

use crate::security::history::{JoinEvent, MessageEvent};
use crate::security::patterns::PatternSet;
use crate::security::profile::{ShieldProfile, SpamProfile};
use crate::security::ModActionKind;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashSet;

/// Sliding window the rate check counts messages over
#[must_use]
pub fn rate_window() -> Duration {
    Duration::seconds(10)
}

/// Sliding window the raid check counts joins over
#[must_use]
pub fn raid_window() -> Duration {
    Duration::seconds(30)
}

/// Messages considered by the similarity check
const SIMILARITY_SAMPLE: usize = 5;
/// Minimum history before the similarity check applies
const SIMILARITY_MIN_MESSAGES: usize = 3;
/// Prior messages that must exceed the threshold to fire
const SIMILARITY_MIN_MATCHES: usize = 2;

/// A positive rule-engine decision
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    /// Human-readable reason, used in logs and notifications
    pub reason: String,
    /// The action the profile prescribes
    pub action: ModActionKind,
    /// Whether the offending message should be deleted
    pub delete_message: bool,
}

/// One message as the rule engine sees it
#[derive(Debug, Clone)]
pub struct MessageFacts<'a> {
    /// Message text
    pub content: &'a str,
    /// User and role mentions in the message
    pub mention_count: usize,
}

/// Evaluate the spam rule chain for one message.
///
/// `windowed` holds the subject's messages within the rate window including
/// the current one; `recent` holds the last few messages (also including the
/// current one) for the similarity check. First violation wins.
#[must_use]
pub fn evaluate_message(
    facts: &MessageFacts<'_>,
    windowed: &[MessageEvent],
    recent: &[MessageEvent],
    profile: &SpamProfile,
    patterns: &PatternSet,
) -> Option<Verdict> {
    if windowed.len() > profile.message_rate {
        return Some(Verdict {
            reason: format!(
                "Message rate exceeded: {} messages in 10s (limit {})",
                windowed.len(),
                profile.message_rate
            ),
            action: profile.action,
            delete_message: false,
        });
    }

    if facts.mention_count > profile.mention_limit {
        return Some(Verdict {
            reason: format!(
                "Too many mentions: {} (limit {})",
                facts.mention_count, profile.mention_limit
            ),
            action: profile.action,
            delete_message: true,
        });
    }

    let urls = patterns.count_urls(facts.content);
    if urls > profile.url_limit {
        return Some(Verdict {
            reason: format!("Too many URLs: {urls} (limit {})", profile.url_limit),
            action: profile.action,
            delete_message: true,
        });
    }

    let emojis = patterns.count_emojis(facts.content);
    if emojis > profile.emoji_limit {
        return Some(Verdict {
            reason: format!("Too many emojis: {emojis} (limit {})", profile.emoji_limit),
            action: profile.action,
            delete_message: true,
        });
    }

    if let Some(matches) = similar_message_count(facts.content, recent, profile.similarity_threshold)
    {
        return Some(Verdict {
            reason: format!("Repeated similar messages ({matches} near-duplicates)"),
            action: profile.action,
            delete_message: true,
        });
    }

    None
}

/// Count prior messages too similar to the current one, returning `Some`
/// only when enough of them exceed the threshold to fire.
fn similar_message_count(
    content: &str,
    recent: &[MessageEvent],
    threshold: f64,
) -> Option<usize> {
    if recent.len() < SIMILARITY_MIN_MESSAGES {
        return None;
    }

    // The current message is the last element; compare against the priors.
    let start = recent.len().saturating_sub(SIMILARITY_SAMPLE);
    let priors = &recent[start..recent.len() - 1];
    let matches = priors
        .iter()
        .filter(|prior| bigram_similarity(content, &prior.content) > threshold)
        .count();

    (matches >= SIMILARITY_MIN_MATCHES).then_some(matches)
}

/// Jaccard index over overlapping 2-character substrings of the lower-cased
/// texts. Strings too short to form a bigram compare as 0 unless identical.
#[must_use]
pub fn bigram_similarity(a: &str, b: &str) -> f64 {
    let a = a.to_lowercase();
    let b = b.to_lowercase();

    if a == b {
        return 1.0;
    }

    let bigrams_a = bigrams(&a);
    let bigrams_b = bigrams(&b);
    if bigrams_a.is_empty() || bigrams_b.is_empty() {
        return 0.0;
    }

    let intersection = bigrams_a.intersection(&bigrams_b).count();
    let union = bigrams_a.union(&bigrams_b).count();
    intersection as f64 / union as f64
}

fn bigrams(text: &str) -> HashSet<(char, char)> {
    let chars: Vec<char> = text.chars().collect();
    chars.windows(2).map(|pair| (pair[0], pair[1])).collect()
}

/// Raid check: joins within the window reaching the threshold
#[must_use]
pub fn is_raid(joins: &[JoinEvent], profile: &SpamProfile) -> bool {
    joins.len() >= profile.raid_threshold
}

/// Shield join-rate check: joins within one minute over the tier limit
#[must_use]
pub fn join_rate_exceeded(join_count: usize, profile: &ShieldProfile) -> bool {
    join_count > profile.join_rate_limit
}

/// Suspicious-account heuristic: very young account, a scam-pattern name,
/// or a machine-looking name on a young account.
#[must_use]
pub fn is_suspicious_account(
    username: &str,
    display_name: &str,
    created_at: DateTime<Utc>,
    now: DateTime<Utc>,
    patterns: &PatternSet,
) -> bool {
    let age = now - created_at;
    if age < Duration::days(1) {
        return true;
    }
    if patterns.matches_suspicious(username) || patterns.matches_suspicious(display_name) {
        return true;
    }
    patterns.looks_generated(username) && age < Duration::days(7)
}

/// Sender permissions relevant to the malicious-content check
#[derive(Debug, Clone, Copy, Default)]
pub struct SenderPermissions {
    /// Whether the sender may post invite links
    pub can_invite: bool,
    /// Whether the sender may ping @everyone/@here
    pub can_mention_everyone: bool,
}

/// Malicious-content check, returning the reason when it flags
#[must_use]
pub fn malicious_content(
    content: &str,
    perms: SenderPermissions,
    patterns: &PatternSet,
) -> Option<String> {
    if !perms.can_invite && patterns.contains_invite(content) {
        return Some("Unauthorized invite link".to_string());
    }
    if patterns.matches_suspicious(content) {
        return Some("Suspicious content pattern".to_string());
    }
    if patterns.contains_scam_domain(content) {
        return Some("Known scam domain".to_string());
    }
    if !perms.can_mention_everyone
        && (content.contains("@everyone") || content.contains("@here"))
    {
        return Some("Unauthorized mass mention".to_string());
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::profile::SecurityLevel;

    fn fixed_now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-06-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn message(at: DateTime<Utc>, content: &str) -> MessageEvent {
        MessageEvent {
            at,
            channel_id: 100,
            message_id: 200,
            content: content.to_string(),
        }
    }

    fn burst(count: usize, content: &str) -> Vec<MessageEvent> {
        let now = fixed_now();
        (0..count)
            .map(|i| message(now + Duration::milliseconds(i as i64 * 100), content))
            .collect()
    }

    #[test]
    fn test_bigram_similarity_edge_cases() {
        assert_eq!(bigram_similarity("hello world", "hello world"), 1.0);
        assert_eq!(bigram_similarity("", "anything"), 0.0);
        assert_eq!(bigram_similarity("", ""), 1.0);
        assert_eq!(bigram_similarity("a", "a"), 1.0);
        assert_eq!(bigram_similarity("a", "b"), 0.0);
        // {"ab"} vs {"ba"}: intersection 0, union 2
        assert_eq!(bigram_similarity("ab", "ba"), 0.0);
        // Case-insensitive
        assert_eq!(bigram_similarity("Hello", "hello"), 1.0);
    }

    #[test]
    fn test_bigram_similarity_partial_overlap() {
        // "abc" -> {ab, bc}, "abd" -> {ab, bd}: 1 / 3
        let sim = bigram_similarity("abc", "abd");
        assert!((sim - 1.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_rate_check_fires_over_limit() {
        let profile = SecurityLevel::Medium.profile();
        let patterns = PatternSet::builtin();
        let facts = MessageFacts { content: "hi", mention_count: 0 };

        // At the limit: no violation
        let windowed = burst(7, "hi");
        assert!(evaluate_message(&facts, &windowed, &[], &profile, &patterns).is_none());

        // Over the limit: rate verdict with the profile action, no deletion
        let windowed = burst(8, "hi");
        let verdict = evaluate_message(&facts, &windowed, &[], &profile, &patterns).unwrap();
        assert!(verdict.reason.contains("Message rate"));
        assert_eq!(verdict.action, ModActionKind::Mute);
        assert!(!verdict.delete_message);
    }

    #[test]
    fn test_mention_check() {
        let profile = SecurityLevel::Medium.profile();
        let patterns = PatternSet::builtin();
        let facts = MessageFacts { content: "hi", mention_count: 5 };

        let verdict = evaluate_message(&facts, &[], &[], &profile, &patterns).unwrap();
        assert!(verdict.reason.contains("mentions"));
        assert!(verdict.delete_message);

        let facts = MessageFacts { content: "hi", mention_count: 4 };
        assert!(evaluate_message(&facts, &[], &[], &profile, &patterns).is_none());
    }

    #[test]
    fn test_url_and_emoji_checks() {
        let profile = SecurityLevel::Extreme.profile();
        let patterns = PatternSet::builtin();

        // url_limit is 0 at extreme: any URL fires
        let facts = MessageFacts { content: "see https://example.com", mention_count: 0 };
        let verdict = evaluate_message(&facts, &[], &[], &profile, &patterns).unwrap();
        assert!(verdict.reason.contains("URLs"));
        assert_eq!(verdict.action, ModActionKind::Ban);

        let facts = MessageFacts {
            content: "<:a:1> <:b:2> <:c:3> <:d:4>",
            mention_count: 0,
        };
        let verdict = evaluate_message(&facts, &[], &[], &profile, &patterns).unwrap();
        assert!(verdict.reason.contains("emojis"));
    }

    #[test]
    fn test_rate_takes_priority_over_mentions() {
        let profile = SecurityLevel::Medium.profile();
        let patterns = PatternSet::builtin();
        let facts = MessageFacts { content: "hi", mention_count: 50 };
        let windowed = burst(8, "hi");

        let verdict = evaluate_message(&facts, &windowed, &[], &profile, &patterns).unwrap();
        assert!(verdict.reason.contains("Message rate"));
    }

    #[test]
    fn test_similarity_needs_minimum_history() {
        let profile = SecurityLevel::Medium.profile();
        let patterns = PatternSet::builtin();
        let facts = MessageFacts { content: "buy cheap nitro now", mention_count: 0 };

        // Two messages only: below the minimum, no verdict
        let recent = burst(2, "buy cheap nitro now");
        assert!(evaluate_message(&facts, &[], &recent, &profile, &patterns).is_none());

        // Three near-identical messages: fires
        let recent = burst(3, "buy cheap nitro now");
        let verdict = evaluate_message(&facts, &[], &recent, &profile, &patterns).unwrap();
        assert!(verdict.reason.contains("similar"));
        assert!(verdict.delete_message);
    }

    #[test]
    fn test_similarity_requires_two_matches() {
        let profile = SecurityLevel::Medium.profile();
        let patterns = PatternSet::builtin();
        let now = fixed_now();
        let facts = MessageFacts { content: "identical text", mention_count: 0 };

        // Only one prior is similar
        let recent = vec![
            message(now, "completely different words here"),
            message(now, "identical text"),
            message(now, "identical text"),
        ];
        // priors are the first two; one match only
        assert!(evaluate_message(&facts, &[], &recent, &profile, &patterns).is_none());
    }

    #[test]
    fn test_raid_threshold_inclusive() {
        let profile = SecurityLevel::High.profile();
        let now = fixed_now();
        let joins: Vec<JoinEvent> = (0..3)
            .map(|i| JoinEvent { at: now, user_id: i })
            .collect();

        assert!(is_raid(&joins, &profile));
        assert!(!is_raid(&joins[..2], &profile));
    }

    #[test]
    fn test_suspicious_account() {
        let patterns = PatternSet::builtin();
        let now = fixed_now();

        // Brand-new account
        assert!(is_suspicious_account(
            "alice",
            "alice",
            now - Duration::hours(12),
            now,
            &patterns
        ));

        // Scam-pattern name
        assert!(is_suspicious_account(
            "free nitro",
            "free nitro",
            now - Duration::days(400),
            now,
            &patterns
        ));

        // Generated-looking name on a young account
        assert!(is_suspicious_account(
            "Xk9mPq2z",
            "display",
            now - Duration::days(3),
            now,
            &patterns
        ));
        // Same name on an old account is fine when short enough not to
        // match the long-run pattern
        assert!(!is_suspicious_account(
            "Xk9mPq2z",
            "display",
            now - Duration::days(30),
            now,
            &patterns
        ));

        assert!(!is_suspicious_account(
            "my_name",
            "My Name",
            now - Duration::days(30),
            now,
            &patterns
        ));
    }

    #[test]
    fn test_malicious_content() {
        let patterns = PatternSet::builtin();
        let none = SenderPermissions::default();

        assert_eq!(
            malicious_content("join discord.gg/raid", none, &patterns),
            Some("Unauthorized invite link".to_string())
        );
        assert_eq!(
            malicious_content("login at dlscrod.com", none, &patterns),
            Some("Known scam domain".to_string())
        );
        assert_eq!(
            malicious_content("free nitro here", none, &patterns),
            Some("Suspicious content pattern".to_string())
        );
        assert_eq!(
            malicious_content("hey @everyone", none, &patterns),
            Some("Unauthorized mass mention".to_string())
        );
        assert!(malicious_content("hello there", none, &patterns).is_none());

        // Permissions suppress the invite and mass-mention flags; an invite
        // link still trips the generic pattern check further down the chain
        let trusted = SenderPermissions { can_invite: true, can_mention_everyone: true };
        assert_eq!(
            malicious_content("join discord.gg/ours", trusted, &patterns),
            Some("Suspicious content pattern".to_string())
        );
        assert!(malicious_content("hey @here", trusted, &patterns).is_none());
    }
}
