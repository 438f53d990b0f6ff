//! Security service
//!
//! Orchestrates the whole subsystem: event intake from the gateway handlers,
//! rule evaluation, action execution, the periodic sweeper task and the
//! manual moderator operations. All read-evaluate-act sequences run under a
//! per-subject or per-guild lock, never a global one.

use crate::data::GuildSettings;
use crate::security::executor::{self, ActionExecutor};
use crate::security::history::{EventHistoryStore, JoinEvent, MessageEvent};
use crate::security::lockdown::{
    self, EngageOutcome, JOIN_RATE_LOCKDOWN_MINUTES, RAID_LOCKDOWN_MINUTES,
};
use crate::security::patterns::PatternSet;
use crate::security::rules::{self, MessageFacts, SenderPermissions, Verdict};
use crate::security::store::ActionStore;
use crate::security::{
    ModActionKind, SecurityError, SecurityLevel, SecurityResult, ShieldLevel, SweepRequest,
    TempAction,
};
use crate::{SECURITY_TARGET, SHIELD_TARGET};
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use poise::serenity_prelude::{
    ChannelId, Colour, GuildId, Http, MessageId, ReactionType, RoleId, UserId,
};
use serenity::builder::{CreateEmbed, CreateMessage, EditRole};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, RwLock};
use tokio::sync::mpsc::{self, Receiver, Sender};
use tokio::sync::Mutex;
use tracing::{error, info, warn};

/// Shield join-rate window
fn join_rate_window() -> Duration {
    Duration::minutes(1)
}

/// Sweep ticks between suspicious-member scans
const MEMBER_SCAN_EVERY_TICKS: u64 = 15;

const UNVERIFIED_ROLE: &str = "Unverified";
const VERIFIED_ROLE: &str = "Verified";
const VERIFY_EMOJI: &str = "✅";

/// Running totals, reported by the status commands
#[derive(Debug, Default)]
pub struct ServiceCounters {
    messages_checked: AtomicU64,
    spam_actions: AtomicU64,
    raids_detected: AtomicU64,
    joins_gated: AtomicU64,
    suspicious_flagged: AtomicU64,
}

/// Point-in-time copy of the counters
#[derive(Debug, Clone, Copy, Default)]
pub struct CounterSnapshot {
    pub messages_checked: u64,
    pub spam_actions: u64,
    pub raids_detected: u64,
    pub joins_gated: u64,
    pub suspicious_flagged: u64,
}

impl ServiceCounters {
    fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            messages_checked: self.messages_checked.load(Ordering::Relaxed),
            spam_actions: self.spam_actions.load(Ordering::Relaxed),
            raids_detected: self.raids_detected.load(Ordering::Relaxed),
            joins_gated: self.joins_gated.load(Ordering::Relaxed),
            suspicious_flagged: self.suspicious_flagged.load(Ordering::Relaxed),
        }
    }
}

/// Everything the status command renders for one guild
#[derive(Debug, Clone)]
pub struct StatusSnapshot {
    pub security_level: SecurityLevel,
    pub shield_level: ShieldLevel,
    pub lockdown: crate::security::LockdownState,
    pub active_actions: Vec<TempAction>,
    pub trusted_count: usize,
    pub counters: CounterSnapshot,
}

/// One inbound message, as extracted by the gateway handler
#[derive(Debug, Clone)]
pub struct MessageIntake {
    pub guild_id: u64,
    pub user_id: u64,
    pub channel_id: u64,
    pub message_id: u64,
    pub content: String,
    pub mention_count: usize,
    pub perms: SenderPermissions,
}

/// One guild join, as extracted by the gateway handler
#[derive(Debug, Clone)]
pub struct JoinIntake {
    pub guild_id: u64,
    pub user_id: u64,
    pub username: String,
    pub display_name: String,
    pub account_created_at: DateTime<Utc>,
}

/// Decision for one join after the raid triggers have been evaluated
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinGate {
    /// The guild is locked down; intake is closed
    RejectLockdown,
    /// Account younger than the tier's minimum age
    RejectTooNew { min_days: i64 },
    /// Suspicious account under an auto-ban tier
    BanSuspicious,
    /// Suspicious account, report only
    FlagSuspicious,
    /// Admitted pending reaction verification
    Verify,
    /// Admitted with no further steps
    Admit,
}

/// Central security service
pub struct SecurityService {
    settings: Arc<DashMap<u64, GuildSettings>>,
    history: EventHistoryStore,
    executor: ActionExecutor,
    patterns: PatternSet,
    security_level: RwLock<SecurityLevel>,
    subject_locks: DashMap<(u64, u64), Arc<Mutex<()>>>,
    guild_locks: DashMap<u64, Arc<Mutex<()>>>,
    /// Verification prompt message id -> (guild, user)
    pending_verifications: DashMap<u64, (u64, u64)>,
    counters: ServiceCounters,
    sweep_ticks: AtomicU64,
    tx: OnceLock<Sender<SweepRequest>>,
}

impl SecurityService {
    /// Create a service sharing the given settings map
    #[must_use]
    pub fn new(settings: Arc<DashMap<u64, GuildSettings>>, patterns: PatternSet) -> Self {
        Self {
            settings,
            history: EventHistoryStore::new(),
            executor: ActionExecutor::new(ActionStore::new(), Arc::new(DashMap::new())),
            patterns,
            security_level: RwLock::new(SecurityLevel::default()),
            subject_locks: DashMap::new(),
            guild_locks: DashMap::new(),
            pending_verifications: DashMap::new(),
            counters: ServiceCounters::default(),
            sweep_ticks: AtomicU64::new(0),
            tx: OnceLock::new(),
        }
    }

    /// The record store behind the executor
    #[must_use]
    pub fn store(&self) -> &ActionStore {
        self.executor.store()
    }

    fn subject_lock(&self, guild_id: u64, user_id: u64) -> Arc<Mutex<()>> {
        self.subject_locks
            .entry((guild_id, user_id))
            .or_default()
            .clone()
    }

    fn guild_lock(&self, guild_id: u64) -> Arc<Mutex<()>> {
        self.guild_locks.entry(guild_id).or_default().clone()
    }

    fn guild_settings(&self, guild_id: u64) -> GuildSettings {
        self.settings
            .get(&guild_id)
            .map(|entry| entry.value().clone())
            .unwrap_or_else(|| GuildSettings::new(guild_id))
    }

    /// The process-wide spam protection level
    #[must_use]
    pub fn security_level(&self) -> SecurityLevel {
        *self
            .security_level
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Switch the spam protection level
    pub fn set_security_level(&self, level: SecurityLevel) {
        let mut guard = self
            .security_level
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        info!(
            target: SECURITY_TARGET,
            from = %*guard,
            to = %level,
            "Security level changed"
        );
        *guard = level;
    }

    /// The shield level for a guild
    #[must_use]
    pub fn shield_level(&self, guild_id: u64) -> ShieldLevel {
        self.guild_settings(guild_id).shield_level
    }

    /// Switch a guild's shield level
    pub fn set_shield_level(&self, guild_id: u64, level: ShieldLevel) {
        let mut entry = self
            .settings
            .entry(guild_id)
            .or_insert_with(|| GuildSettings::new(guild_id));
        info!(
            target: SHIELD_TARGET,
            guild_id,
            from = %entry.shield_level,
            to = %level,
            "Shield level changed"
        );
        entry.shield_level = level;
    }

    /// Whether a subject is on the guild's trust list
    #[must_use]
    pub fn is_trusted(&self, guild_id: u64, user_id: u64) -> bool {
        self.settings
            .get(&guild_id)
            .is_some_and(|entry| entry.trusted_members.contains(&user_id))
    }

    /// Status for one guild
    #[must_use]
    pub fn status(&self, guild_id: u64) -> StatusSnapshot {
        let settings = self.guild_settings(guild_id);
        StatusSnapshot {
            security_level: self.security_level(),
            shield_level: settings.shield_level,
            lockdown: settings.lockdown,
            active_actions: self.store().active_in_guild(guild_id),
            trusted_count: settings.trusted_members.len(),
            counters: self.counters.snapshot(),
        }
    }

    /// Malicious-content check with the trust exemption applied. Trusted
    /// subjects never produce a flag.
    #[must_use]
    pub fn assess_shield_content(
        &self,
        guild_id: u64,
        user_id: u64,
        content: &str,
        perms: SenderPermissions,
    ) -> Option<String> {
        if self.is_trusted(guild_id, user_id) {
            return None;
        }
        rules::malicious_content(content, perms, &self.patterns)
    }

    /// Record a message and run the spam chain against the active profile.
    /// On a verdict the subject's history is drained so one burst produces
    /// one action.
    #[must_use]
    pub fn assess_message(&self, intake: &MessageIntake, now: DateTime<Utc>) -> Option<Verdict> {
        self.counters.messages_checked.fetch_add(1, Ordering::Relaxed);
        self.history.record_message(
            intake.guild_id,
            intake.user_id,
            MessageEvent {
                at: now,
                channel_id: intake.channel_id,
                message_id: intake.message_id,
                content: intake.content.clone(),
            },
        );

        let profile = self.security_level().profile();
        let windowed = self.history.messages_within(
            intake.guild_id,
            intake.user_id,
            rules::rate_window(),
            now,
        );
        let recent = self.history.recent_messages(intake.guild_id, intake.user_id, 5);
        let facts = MessageFacts {
            content: &intake.content,
            mention_count: intake.mention_count,
        };

        let verdict = rules::evaluate_message(&facts, &windowed, &recent, &profile, &self.patterns);
        if verdict.is_some() {
            let _ = self.history.drain_messages(intake.guild_id, intake.user_id);
            self.counters.spam_actions.fetch_add(1, Ordering::Relaxed);
        }
        verdict
    }

    /// Record a join and evaluate both raid triggers. Returns
    /// (message-raid fired, shield join-rate fired).
    pub fn note_join(&self, guild_id: u64, user_id: u64, now: DateTime<Utc>) -> (bool, bool) {
        self.history.record_join(guild_id, JoinEvent { at: now, user_id });

        let spam_profile = self.security_level().profile();
        let joins = self
            .history
            .joins_within(guild_id, rules::raid_window(), now);
        let raid = rules::is_raid(&joins, &spam_profile);

        let shield_profile = self.shield_level(guild_id).profile();
        let minute_joins = self.history.joins_within(guild_id, join_rate_window(), now);
        let surge = rules::join_rate_exceeded(minute_joins.len(), &shield_profile);

        (raid, surge)
    }

    /// Lockdown bookkeeping only; the caller runs the restriction pass when
    /// this returns `Entered`.
    pub fn engage_state(
        &self,
        guild_id: u64,
        duration: Duration,
        reason: &str,
        now: DateTime<Utc>,
    ) -> EngageOutcome {
        let mut entry = self
            .settings
            .entry(guild_id)
            .or_insert_with(|| GuildSettings::new(guild_id));
        let outcome = entry.lockdown.engage(duration, reason, now);
        info!(
            target: SHIELD_TARGET,
            guild_id,
            reason,
            ?outcome,
            until = ?entry.lockdown.until,
            "Lockdown engage requested"
        );
        outcome
    }

    /// Malicious-content decision for one message: the flag reason plus
    /// whether the guild's shield tier escalates the hit to a ban. Trusted
    /// subjects never produce a verdict here.
    #[must_use]
    pub fn content_verdict(
        &self,
        guild_id: u64,
        user_id: u64,
        content: &str,
        perms: SenderPermissions,
    ) -> Option<(String, bool)> {
        let reason = self.assess_shield_content(guild_id, user_id, content, perms)?;
        let ban = self.shield_level(guild_id).profile().auto_ban_suspicious;
        Some((reason, ban))
    }

    /// Full event-driven message path: shield content check, then the spam
    /// chain, then effects. Only the content check honours the trust list;
    /// the spam chain applies to everyone. Caller must have filtered bots
    /// out.
    pub async fn handle_message(
        &self,
        http: &Http,
        intake: MessageIntake,
        now: DateTime<Utc>,
    ) -> SecurityResult<()> {
        let lock = self.subject_lock(intake.guild_id, intake.user_id);
        let _guard = lock.lock().await;

        let settings = self.guild_settings(intake.guild_id);
        let log_channel = settings.log_channel_id.map(ChannelId::new);

        if let Some((reason, ban)) =
            self.content_verdict(intake.guild_id, intake.user_id, &intake.content, intake.perms)
        {
            self.counters
                .suspicious_flagged
                .fetch_add(1, Ordering::Relaxed);
            info!(
                target: SHIELD_TARGET,
                guild_id = intake.guild_id,
                user_id = intake.user_id,
                reason,
                ban,
                "Malicious content removed"
            );

            self.delete_message(http, intake.channel_id, intake.message_id)
                .await;
            if let Some(channel) = log_channel {
                self.post_log_embed(
                    http,
                    channel,
                    "Message removed",
                    &format!("<@{}>: {reason}", intake.user_id),
                )
                .await;
            }
            if ban {
                self.executor
                    .apply(
                        http,
                        GuildId::new(intake.guild_id),
                        UserId::new(intake.user_id),
                        ModActionKind::Ban,
                        &reason,
                        log_channel,
                        now,
                    )
                    .await?;
            } else {
                executor::notify_user(
                    http,
                    UserId::new(intake.user_id),
                    &format!("🛑 Your message was removed: {reason}"),
                )
                .await;
            }
            return Ok(());
        }

        if let Some(verdict) = self.assess_message(&intake, now) {
            info!(
                target: SECURITY_TARGET,
                guild_id = intake.guild_id,
                user_id = intake.user_id,
                action = %verdict.action,
                reason = %verdict.reason,
                "Spam verdict"
            );

            if verdict.delete_message {
                self.delete_message(http, intake.channel_id, intake.message_id)
                    .await;
            }
            self.executor
                .apply(
                    http,
                    GuildId::new(intake.guild_id),
                    UserId::new(intake.user_id),
                    verdict.action,
                    &verdict.reason,
                    log_channel,
                    now,
                )
                .await?;
        }
        Ok(())
    }

    /// Gate decision for one join, evaluated after the raid triggers.
    fn join_gate(
        &self,
        settings: &GuildSettings,
        intake: &JoinIntake,
        now: DateTime<Utc>,
    ) -> JoinGate {
        // An active lockdown closes intake entirely
        if settings.lockdown.active {
            return JoinGate::RejectLockdown;
        }
        if self.is_trusted(intake.guild_id, intake.user_id) {
            return JoinGate::Admit;
        }

        let profile = settings.shield_level.profile();
        if let Some(min_days) = profile.min_account_age_days {
            if now - intake.account_created_at < Duration::days(min_days) {
                return JoinGate::RejectTooNew { min_days };
            }
        }
        if rules::is_suspicious_account(
            &intake.username,
            &intake.display_name,
            intake.account_created_at,
            now,
            &self.patterns,
        ) {
            return if profile.auto_ban_suspicious {
                JoinGate::BanSuspicious
            } else {
                JoinGate::FlagSuspicious
            };
        }
        if profile.verification_required {
            JoinGate::Verify
        } else {
            JoinGate::Admit
        }
    }

    /// Full event-driven join path: raid triggers, lockdown intake gate,
    /// account gating, suspicious-account handling and the verification
    /// prompt.
    pub async fn handle_member_join(
        &self,
        http: &Http,
        intake: JoinIntake,
        now: DateTime<Utc>,
    ) -> SecurityResult<()> {
        let lock = self.guild_lock(intake.guild_id);
        let _guard = lock.lock().await;

        let (raid, surge) = self.note_join(intake.guild_id, intake.user_id, now);
        if raid || surge {
            let (duration, reason) = if raid {
                (
                    Duration::minutes(RAID_LOCKDOWN_MINUTES),
                    "Join raid detected",
                )
            } else {
                (
                    Duration::minutes(JOIN_RATE_LOCKDOWN_MINUTES),
                    "Join rate exceeded",
                )
            };
            self.engage_lockdown(http, intake.guild_id, duration, reason, now)
                .await;
            return Ok(());
        }

        let settings = self.guild_settings(intake.guild_id);
        let profile = settings.shield_level.profile();
        let log_channel = settings.log_channel_id.map(ChannelId::new);

        match self.join_gate(&settings, &intake, now) {
            JoinGate::RejectLockdown => {
                self.counters.joins_gated.fetch_add(1, Ordering::Relaxed);
                info!(
                    target: SHIELD_TARGET,
                    guild_id = intake.guild_id,
                    user_id = intake.user_id,
                    "Joiner removed during lockdown"
                );
                lockdown::kick_recent_joiners(
                    http,
                    GuildId::new(intake.guild_id),
                    &[intake.user_id],
                )
                .await;
            }
            JoinGate::RejectTooNew { min_days } => {
                self.counters.joins_gated.fetch_add(1, Ordering::Relaxed);
                info!(
                    target: SHIELD_TARGET,
                    guild_id = intake.guild_id,
                    user_id = intake.user_id,
                    age_days = (now - intake.account_created_at).num_days(),
                    min_days,
                    "Account too new, removing"
                );

                executor::notify_user(
                    http,
                    UserId::new(intake.user_id),
                    &format!(
                        "Your account must be at least {min_days} days old to join this server. \
                         Please come back later."
                    ),
                )
                .await;
                if let Err(e) = GuildId::new(intake.guild_id)
                    .kick_with_reason(http, UserId::new(intake.user_id), "Account too new")
                    .await
                {
                    warn!(
                        guild_id = intake.guild_id,
                        user_id = intake.user_id,
                        error = %e,
                        "Failed to kick underage account"
                    );
                }
            }
            JoinGate::BanSuspicious => {
                self.counters
                    .suspicious_flagged
                    .fetch_add(1, Ordering::Relaxed);
                info!(
                    target: SHIELD_TARGET,
                    guild_id = intake.guild_id,
                    user_id = intake.user_id,
                    username = %intake.username,
                    "Suspicious account banned on join"
                );
                self.executor
                    .apply(
                        http,
                        GuildId::new(intake.guild_id),
                        UserId::new(intake.user_id),
                        ModActionKind::Ban,
                        "Suspicious account pattern",
                        log_channel,
                        now,
                    )
                    .await?;
            }
            JoinGate::FlagSuspicious => {
                self.counters
                    .suspicious_flagged
                    .fetch_add(1, Ordering::Relaxed);
                if let Some(channel) = log_channel {
                    self.post_log_embed(
                        http,
                        channel,
                        "Suspicious account joined",
                        &format!("<@{}> ({})", intake.user_id, intake.username),
                    )
                    .await;
                }
                if profile.verification_required {
                    self.begin_verification(http, &settings, intake.user_id)
                        .await;
                }
            }
            JoinGate::Verify => {
                self.begin_verification(http, &settings, intake.user_id)
                    .await;
            }
            JoinGate::Admit => {}
        }
        Ok(())
    }

    /// Complete a pending verification when the member reacts with the
    /// check mark on their own prompt.
    pub async fn handle_reaction(
        &self,
        http: &Http,
        message_id: u64,
        user_id: u64,
        emoji: &ReactionType,
    ) -> SecurityResult<()> {
        if !matches!(emoji, ReactionType::Unicode(e) if e == VERIFY_EMOJI) {
            return Ok(());
        }
        let Some((_, (guild_id, pending_user))) = self
            .pending_verifications
            .remove_if(&message_id, |_, (_, pending)| *pending == user_id)
        else {
            return Ok(());
        };

        let guild = GuildId::new(guild_id);
        let user = UserId::new(pending_user);

        if let Ok(unverified) = self.ensure_role(http, guild, UNVERIFIED_ROLE).await {
            if let Err(e) = http
                .remove_member_role(guild, user, unverified, Some("Verification complete"))
                .await
            {
                warn!(guild_id, user_id, error = %e, "Failed to remove unverified role");
            }
        }
        match self.ensure_role(http, guild, VERIFIED_ROLE).await {
            Ok(verified) => {
                if let Err(e) = http
                    .add_member_role(guild, user, verified, Some("Verification complete"))
                    .await
                {
                    warn!(guild_id, user_id, error = %e, "Failed to grant verified role");
                }
            }
            Err(e) => warn!(guild_id, error = %e, "Failed to ensure verified role"),
        }

        info!(
            target: SHIELD_TARGET,
            guild_id,
            user_id,
            "Member verified"
        );
        executor::notify_user(http, user, "✅ You are verified. Welcome!").await;
        Ok(())
    }

    async fn begin_verification(&self, http: &Http, settings: &GuildSettings, user_id: u64) {
        let guild = GuildId::new(settings.guild_id);

        match self.ensure_role(http, guild, UNVERIFIED_ROLE).await {
            Ok(role) => {
                if let Err(e) = http
                    .add_member_role(guild, UserId::new(user_id), role, Some("Pending verification"))
                    .await
                {
                    warn!(
                        guild_id = settings.guild_id,
                        user_id,
                        error = %e,
                        "Failed to grant unverified role"
                    );
                }
            }
            Err(e) => warn!(guild_id = settings.guild_id, error = %e, "Failed to ensure unverified role"),
        }

        let Some(channel_id) = settings.verification_channel_id else {
            return;
        };
        let channel = ChannelId::new(channel_id);
        let prompt = format!(
            "<@{user_id}> welcome! React with {VERIFY_EMOJI} to verify you are human \
             and unlock the rest of the server."
        );
        match channel.say(http, prompt).await {
            Ok(message) => {
                if let Err(e) = message
                    .react(http, ReactionType::Unicode(VERIFY_EMOJI.to_string()))
                    .await
                {
                    warn!(channel_id, error = %e, "Failed to seed verification reaction");
                }
                self.pending_verifications
                    .insert(message.id.get(), (settings.guild_id, user_id));
            }
            Err(e) => warn!(channel_id, error = %e, "Failed to post verification prompt"),
        }
    }

    async fn ensure_role(
        &self,
        http: &Http,
        guild_id: GuildId,
        name: &str,
    ) -> SecurityResult<RoleId> {
        let roles = guild_id.roles(http).await?;
        if let Some((role_id, _)) = roles.iter().find(|(_, role)| role.name == name) {
            return Ok(*role_id);
        }
        let role = guild_id
            .create_role(http, EditRole::new().name(name))
            .await?;
        Ok(role.id)
    }

    async fn delete_message(&self, http: &Http, channel_id: u64, message_id: u64) {
        if let Err(e) = ChannelId::new(channel_id)
            .delete_message(http, MessageId::new(message_id))
            .await
        {
            warn!(channel_id, message_id, error = %e, "Failed to delete message");
        }
    }

    async fn post_log_embed(&self, http: &Http, channel: ChannelId, title: &str, body: &str) {
        let embed = CreateEmbed::new()
            .title(title.to_string())
            .description(body.to_string())
            .colour(Colour::ORANGE);
        if let Err(e) = channel
            .send_message(http, CreateMessage::new().embed(embed))
            .await
        {
            warn!(channel_id = %channel, error = %e, "Failed to post log embed");
        }
    }

    async fn engage_lockdown(
        &self,
        http: &Http,
        guild_id: u64,
        duration: Duration,
        reason: &str,
        now: DateTime<Utc>,
    ) {
        let outcome = self.engage_state(guild_id, duration, reason, now);
        if outcome != EngageOutcome::Entered {
            return;
        }
        self.counters.raids_detected.fetch_add(1, Ordering::Relaxed);

        let guild = GuildId::new(guild_id);
        if let Err(e) = lockdown::apply_restrictions(http, guild).await {
            error!(guild_id, error = %e, "Lockdown restriction pass failed");
        }

        let recent: Vec<u64> = self
            .history
            .joins_within(guild_id, lockdown::recent_join_window(), now)
            .iter()
            .map(|join| join.user_id)
            .collect();
        lockdown::kick_recent_joiners(http, guild, &recent).await;
    }

    /// Manually lock a guild down for `minutes`
    pub async fn manual_lockdown(
        &self,
        http: &Http,
        guild_id: u64,
        minutes: i64,
        reason: &str,
        now: DateTime<Utc>,
    ) -> SecurityResult<()> {
        let duration = lockdown::manual_duration(minutes)?;
        let lock = self.guild_lock(guild_id);
        let _guard = lock.lock().await;
        self.engage_lockdown(http, guild_id, duration, reason, now)
            .await;
        Ok(())
    }

    /// Manually release a guild from lockdown
    pub async fn manual_unlock(&self, http: &Http, guild_id: u64) -> SecurityResult<()> {
        let lock = self.guild_lock(guild_id);
        let _guard = lock.lock().await;

        {
            let Some(mut entry) = self.settings.get_mut(&guild_id) else {
                return Err(SecurityError::NotLockedDown(guild_id));
            };
            entry.lockdown.release(guild_id)?;
        }
        lockdown::lift_restrictions(http, GuildId::new(guild_id)).await?;
        info!(target: SHIELD_TARGET, guild_id, "Lockdown released manually");
        Ok(())
    }

    /// Manually lift an active mute
    pub async fn manual_unmute(
        &self,
        http: &Http,
        guild_id: u64,
        user_id: u64,
        now: DateTime<Utc>,
    ) -> SecurityResult<()> {
        self.manual_reverse(http, guild_id, user_id, ModActionKind::Mute, now)
            .await
    }

    /// Manually lift an active temporary ban
    pub async fn manual_unban(
        &self,
        http: &Http,
        guild_id: u64,
        user_id: u64,
        now: DateTime<Utc>,
    ) -> SecurityResult<()> {
        self.manual_reverse(http, guild_id, user_id, ModActionKind::Ban, now)
            .await
    }

    async fn manual_reverse(
        &self,
        http: &Http,
        guild_id: u64,
        user_id: u64,
        kind: ModActionKind,
        now: DateTime<Utc>,
    ) -> SecurityResult<()> {
        // Guild lock first, then the subject lock the message path holds
        let lock = self.guild_lock(guild_id);
        let _guard = lock.lock().await;
        let subject = self.subject_lock(guild_id, user_id);
        let _subject_guard = subject.lock().await;

        let Some(record) = self.store().active_for(guild_id, user_id, kind) else {
            return Err(match kind {
                ModActionKind::Mute => SecurityError::NotMuted(user_id),
                ModActionKind::Ban => SecurityError::NotBanned(user_id),
                _ => SecurityError::NotFound(format!("{kind} for user {user_id}")),
            });
        };

        self.executor.reverse(http, &record).await?;
        self.store().cancel(&record.id, now)?;
        info!(
            target: SECURITY_TARGET,
            guild_id,
            user_id,
            kind = %kind,
            "Action lifted manually"
        );
        Ok(())
    }

    /// One full sweep: evict stale history, reverse due actions, release
    /// expired lockdowns, prune terminal records, occasionally scan members.
    /// Failures on one item never block the rest.
    pub async fn sweep(&self, http: &Http, now: DateTime<Utc>) {
        self.history.sweep(now);

        for id in self.store().due_for_reversal(now) {
            let Some(record) = self.store().get(&id) else {
                continue;
            };
            let lock = self.guild_lock(record.guild_id);
            let _guard = lock.lock().await;
            let subject = self.subject_lock(record.guild_id, record.user_id);
            let _subject_guard = subject.lock().await;

            // Re-read under the locks; a manual command or a renewal on the
            // message path may have won
            let Some(record) = self.store().get(&id) else {
                continue;
            };
            if !record.is_due(now) {
                continue;
            }

            match self.executor.reverse(http, &record).await {
                Ok(()) => {
                    if let Err(e) = self.store().reverse(&id, now) {
                        warn!(record_id = %id, error = %e, "Reversal bookkeeping failed");
                    }
                }
                // Leave the record Active so the next sweep retries
                Err(e) => warn!(
                    record_id = %id,
                    guild_id = record.guild_id,
                    user_id = record.user_id,
                    error = %e,
                    "Reversal failed, will retry"
                ),
            }
        }
        self.store().prune_terminal(now);

        let expired: Vec<u64> = self
            .settings
            .iter()
            .filter(|entry| entry.lockdown.is_expired(now))
            .map(|entry| *entry.key())
            .collect();
        for guild_id in expired {
            let lock = self.guild_lock(guild_id);
            let _guard = lock.lock().await;

            let released = self
                .settings
                .get_mut(&guild_id)
                .is_some_and(|mut entry| {
                    entry.lockdown.is_expired(now) && entry.lockdown.release(guild_id).is_ok()
                });
            if released {
                if let Err(e) = lockdown::lift_restrictions(http, GuildId::new(guild_id)).await {
                    error!(guild_id, error = %e, "Failed to lift expired lockdown");
                }
                info!(target: SHIELD_TARGET, guild_id, "Lockdown expired");
            }
        }

        let tick = self.sweep_ticks.fetch_add(1, Ordering::Relaxed) + 1;
        if tick % MEMBER_SCAN_EVERY_TICKS == 0 {
            self.scan_members(http, now).await;
        }
    }

    /// Report suspicious non-trusted members of auto-ban guilds to their
    /// moderation log channel.
    async fn scan_members(&self, http: &Http, now: DateTime<Utc>) {
        let guilds: Vec<GuildSettings> = self
            .settings
            .iter()
            .filter(|entry| entry.shield_level.profile().auto_ban_suspicious)
            .map(|entry| entry.value().clone())
            .collect();

        for settings in guilds {
            let Some(log_channel) = settings.log_channel_id.map(ChannelId::new) else {
                continue;
            };
            let guild = GuildId::new(settings.guild_id);
            let members = match guild.members(http, Some(1000), None).await {
                Ok(members) => members,
                Err(e) => {
                    warn!(guild_id = settings.guild_id, error = %e, "Member scan fetch failed");
                    continue;
                }
            };

            let mut flagged = Vec::new();
            for member in &members {
                if member.user.bot || settings.trusted_members.contains(&member.user.id.get()) {
                    continue;
                }
                let created_at = member.user.id.created_at().to_utc();
                if rules::is_suspicious_account(
                    &member.user.name,
                    member.display_name(),
                    created_at,
                    now,
                    &self.patterns,
                ) {
                    flagged.push(format!("<@{}> ({})", member.user.id, member.user.name));
                }
            }

            if !flagged.is_empty() {
                info!(
                    target: SHIELD_TARGET,
                    guild_id = settings.guild_id,
                    count = flagged.len(),
                    "Member scan flagged accounts"
                );
                self.post_log_embed(
                    http,
                    log_channel,
                    "Suspicious members",
                    &flagged.join("\n"),
                )
                .await;
            }
        }
    }

    /// Ask the sweeper to run immediately
    pub async fn request_sweep(&self) -> SecurityResult<()> {
        let Some(tx) = self.tx.get() else {
            return Err(SecurityError::Other("Sweeper not running".to_string()));
        };
        tx.send(SweepRequest::Sweep)
            .await
            .map_err(|e| SecurityError::Other(format!("Failed to reach sweeper: {e}")))
    }

    /// Spawn the sweeper task, returning its request sender
    pub fn start_sweeper(
        self: &Arc<Self>,
        http: Arc<Http>,
        interval_seconds: u64,
    ) -> Sender<SweepRequest> {
        let (tx, rx) = mpsc::channel::<SweepRequest>(100);
        let _ = self.tx.set(tx.clone());

        let service = Arc::clone(self);
        tokio::spawn(async move {
            service.sweeper_task(http, rx, interval_seconds).await;
        });
        tx
    }

    async fn sweeper_task(
        &self,
        http: Arc<Http>,
        mut rx: Receiver<SweepRequest>,
        interval_seconds: u64,
    ) {
        info!("Starting sweeper task with {interval_seconds}s interval");
        let mut interval =
            tokio::time::interval(tokio::time::Duration::from_secs(interval_seconds));

        loop {
            tokio::select! {
                Some(request) = rx.recv() => {
                    match request {
                        SweepRequest::Sweep => {
                            self.sweep(&http, Utc::now()).await;
                        }
                        SweepRequest::Shutdown => {
                            info!("Sweeper task shutting down");
                            break;
                        }
                    }
                },
                _ = interval.tick() => {
                    self.sweep(&http, Utc::now()).await;
                }
            }
        }
    }
}
