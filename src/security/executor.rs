//! Moderation action execution
//!
//! Handlers for the graduated actions (warn, mute, kick, ban) behind a
//! common trait, plus the executor that records bookkeeping before running
//! side effects so the sweeper can always reverse deterministically. User
//! notification is best-effort everywhere; a closed DM never fails an
//! action.

use crate::security::store::ActionStore;
use crate::security::{ModActionKind, SecurityError, SecurityResult, TempAction};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use poise::serenity_prelude::{
    ChannelId, Colour, GuildId, Http, PermissionOverwrite, PermissionOverwriteType, Permissions,
    RoleId, UserId,
};
use serenity::builder::{CreateEmbed, CreateMessage, EditRole};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

const MUTED_ROLE_NAME: &str = "Muted";
/// Days of messages purged alongside a ban
const BAN_PURGE_DAYS: u8 = 1;

/// Best-effort DM; failures are logged and swallowed
pub async fn notify_user(http: &Http, user_id: UserId, text: &str) {
    match user_id.create_dm_channel(http).await {
        Ok(dm) => {
            if let Err(e) = dm.say(http, text).await {
                warn!(user_id = %user_id, error = %e, "Failed to DM user");
            }
        }
        Err(e) => warn!(user_id = %user_id, error = %e, "Failed to open DM channel"),
    }
}

/// Helper to fetch guild and member together
pub async fn get_guild_and_member(
    http: &Http,
    guild_id: GuildId,
    user_id: UserId,
) -> SecurityResult<(serenity::all::PartialGuild, serenity::all::Member)> {
    let guild = guild_id.to_partial_guild(http).await.map_err(|e| {
        SecurityError::GuildOrMemberNotFound(format!("Failed to get guild {guild_id}: {e}"))
    })?;

    let member = guild.member(http, user_id).await.map_err(|e| {
        SecurityError::GuildOrMemberNotFound(format!(
            "Failed to get member {user_id} in guild {guild_id}: {e}"
        ))
    })?;

    Ok((guild, member))
}

/// Find or create the guild's muted role, caching the id. Creation races
/// between concurrent evaluations resolve by re-reading the role list, so
/// an "already exists" outcome counts as success.
pub async fn ensure_muted_role(
    http: &Http,
    guild_id: GuildId,
    cache: &DashMap<u64, RoleId>,
) -> SecurityResult<RoleId> {
    if let Some(role_id) = cache.get(&guild_id.get()) {
        return Ok(*role_id);
    }

    let roles = guild_id.roles(http).await?;
    if let Some((role_id, _)) = roles.iter().find(|(_, role)| role.name == MUTED_ROLE_NAME) {
        cache.insert(guild_id.get(), *role_id);
        return Ok(*role_id);
    }

    let created = guild_id
        .create_role(
            http,
            EditRole::new()
                .name(MUTED_ROLE_NAME)
                .permissions(Permissions::empty())
                .colour(Colour::DARK_GREY),
        )
        .await;

    let role_id = match created {
        Ok(role) => role.id,
        Err(e) => {
            // Another evaluation may have created it in the meantime
            let roles = guild_id.roles(http).await?;
            match roles.iter().find(|(_, role)| role.name == MUTED_ROLE_NAME) {
                Some((role_id, _)) => *role_id,
                None => return Err(SecurityError::from(e)),
            }
        }
    };

    // Deny sending and speaking everywhere the role applies
    let overwrite = PermissionOverwrite {
        allow: Permissions::empty(),
        deny: Permissions::SEND_MESSAGES | Permissions::SPEAK | Permissions::ADD_REACTIONS,
        kind: PermissionOverwriteType::Role(role_id),
    };
    match guild_id.channels(http).await {
        Ok(channels) => {
            for channel_id in channels.keys() {
                if let Err(e) = channel_id.create_permission(http, overwrite.clone()).await {
                    warn!(
                        guild_id = %guild_id,
                        channel_id = %channel_id,
                        error = %e,
                        "Failed to deny permissions for muted role"
                    );
                }
            }
        }
        Err(e) => warn!(guild_id = %guild_id, error = %e, "Failed to list channels for muted role"),
    }

    cache.insert(guild_id.get(), role_id);
    info!(guild_id = %guild_id, role_id = %role_id, "Created muted role");
    Ok(role_id)
}

/// Trait for applying and reversing one action kind
#[async_trait::async_trait]
pub trait ActionHandler: Send + Sync {
    /// Apply the action to the user
    async fn apply(
        &self,
        http: &Http,
        guild_id: GuildId,
        user_id: UserId,
        reason: &str,
    ) -> SecurityResult<()>;

    /// Undo the action (if applicable)
    async fn reverse(&self, http: &Http, guild_id: GuildId, user_id: UserId)
        -> SecurityResult<()>;
}

/// Registry of action handlers
pub struct ActionHandlerRegistry {
    handlers: HashMap<ModActionKind, Box<dyn ActionHandler>>,
}

impl ActionHandlerRegistry {
    /// Create a registry with all four handlers registered
    #[must_use]
    pub fn new(role_cache: Arc<DashMap<u64, RoleId>>) -> Self {
        let mut handlers: HashMap<ModActionKind, Box<dyn ActionHandler>> = HashMap::new();
        handlers.insert(ModActionKind::Warn, Box::new(WarnHandler));
        handlers.insert(ModActionKind::Mute, Box::new(MuteHandler { role_cache }));
        handlers.insert(ModActionKind::Kick, Box::new(KickHandler));
        handlers.insert(ModActionKind::Ban, Box::new(BanHandler));
        Self { handlers }
    }

    fn get(&self, kind: ModActionKind) -> SecurityResult<&dyn ActionHandler> {
        self.handlers
            .get(&kind)
            .map(AsRef::as_ref)
            .ok_or_else(|| SecurityError::Other(format!("No handler for action: {kind}")))
    }

    /// Apply an action through its handler
    pub async fn apply(
        &self,
        http: &Http,
        guild_id: GuildId,
        user_id: UserId,
        kind: ModActionKind,
        reason: &str,
    ) -> SecurityResult<()> {
        self.get(kind)?.apply(http, guild_id, user_id, reason).await
    }

    /// Reverse an action through its handler
    pub async fn reverse(
        &self,
        http: &Http,
        guild_id: GuildId,
        user_id: UserId,
        kind: ModActionKind,
    ) -> SecurityResult<()> {
        self.get(kind)?.reverse(http, guild_id, user_id).await
    }
}

/// Handler for the Warn action: DM only, no guild state change
struct WarnHandler;

#[async_trait::async_trait]
impl ActionHandler for WarnHandler {
    async fn apply(
        &self,
        http: &Http,
        guild_id: GuildId,
        user_id: UserId,
        reason: &str,
    ) -> SecurityResult<()> {
        info!(guild_id = %guild_id, user_id = %user_id, reason, "Warning user");
        notify_user(
            http,
            user_id,
            &format!("⚠️ You have received a warning: {reason}"),
        )
        .await;
        Ok(())
    }

    async fn reverse(
        &self,
        _http: &Http,
        _guild_id: GuildId,
        _user_id: UserId,
    ) -> SecurityResult<()> {
        Ok(())
    }
}

/// Handler for the Mute action: grant the muted role
struct MuteHandler {
    role_cache: Arc<DashMap<u64, RoleId>>,
}

#[async_trait::async_trait]
impl ActionHandler for MuteHandler {
    async fn apply(
        &self,
        http: &Http,
        guild_id: GuildId,
        user_id: UserId,
        reason: &str,
    ) -> SecurityResult<()> {
        info!(guild_id = %guild_id, user_id = %user_id, reason, "Muting user");

        let role_id = ensure_muted_role(http, guild_id, &self.role_cache).await?;
        let (_, member) = get_guild_and_member(http, guild_id, user_id).await?;
        member.add_role(http, role_id).await?;

        notify_user(
            http,
            user_id,
            &format!("🔇 You have been muted for 15 minutes: {reason}"),
        )
        .await;
        Ok(())
    }

    async fn reverse(
        &self,
        http: &Http,
        guild_id: GuildId,
        user_id: UserId,
    ) -> SecurityResult<()> {
        info!(guild_id = %guild_id, user_id = %user_id, "Unmuting user");

        let role_id = ensure_muted_role(http, guild_id, &self.role_cache).await?;
        let (_, member) = get_guild_and_member(http, guild_id, user_id).await?;
        member.remove_role(http, role_id).await?;
        Ok(())
    }
}

/// Handler for the Kick action: notify first, then remove
struct KickHandler;

#[async_trait::async_trait]
impl ActionHandler for KickHandler {
    async fn apply(
        &self,
        http: &Http,
        guild_id: GuildId,
        user_id: UserId,
        reason: &str,
    ) -> SecurityResult<()> {
        info!(guild_id = %guild_id, user_id = %user_id, reason, "Kicking user");

        // The DM must go out before the kick closes the mutual guild
        notify_user(
            http,
            user_id,
            &format!("👢 You have been kicked: {reason}"),
        )
        .await;

        let (_, member) = get_guild_and_member(http, guild_id, user_id).await?;
        member.kick_with_reason(http, reason).await?;
        Ok(())
    }

    async fn reverse(
        &self,
        _http: &Http,
        guild_id: GuildId,
        user_id: UserId,
    ) -> SecurityResult<()> {
        info!(guild_id = %guild_id, user_id = %user_id, "Kick needs no reversal");
        Ok(())
    }
}

/// Handler for the Ban action: notify, ban with a short message purge
struct BanHandler;

#[async_trait::async_trait]
impl ActionHandler for BanHandler {
    async fn apply(
        &self,
        http: &Http,
        guild_id: GuildId,
        user_id: UserId,
        reason: &str,
    ) -> SecurityResult<()> {
        info!(guild_id = %guild_id, user_id = %user_id, reason, "Banning user");

        notify_user(
            http,
            user_id,
            &format!("🔨 You have been banned for 24 hours: {reason}"),
        )
        .await;

        guild_id
            .ban_with_reason(http, user_id, BAN_PURGE_DAYS, reason)
            .await?;
        Ok(())
    }

    async fn reverse(
        &self,
        http: &Http,
        guild_id: GuildId,
        user_id: UserId,
    ) -> SecurityResult<()> {
        info!(guild_id = %guild_id, user_id = %user_id, "Unbanning user");
        guild_id.unban(http, user_id).await?;
        Ok(())
    }
}

/// Applies verdict actions: records bookkeeping, runs the handler, posts a
/// mod-log embed.
pub struct ActionExecutor {
    registry: ActionHandlerRegistry,
    store: ActionStore,
}

impl ActionExecutor {
    /// Create an executor over the given store
    #[must_use]
    pub fn new(store: ActionStore, role_cache: Arc<DashMap<u64, RoleId>>) -> Self {
        Self {
            registry: ActionHandlerRegistry::new(role_cache),
            store,
        }
    }

    /// The underlying record store
    #[must_use]
    pub fn store(&self) -> &ActionStore {
        &self.store
    }

    /// Apply `kind` to the user. Temporary kinds register (or renew) their
    /// record before the side effect runs; a failed side effect leaves the
    /// record in place so the sweeper retries the reversal at the recorded
    /// expiry.
    pub async fn apply(
        &self,
        http: &Http,
        guild_id: GuildId,
        user_id: UserId,
        kind: ModActionKind,
        reason: &str,
        log_channel: Option<ChannelId>,
        now: DateTime<Utc>,
    ) -> SecurityResult<Option<TempAction>> {
        let record = if kind.needs_reversal() {
            Some(
                self.store
                    .upsert(guild_id.get(), user_id.get(), kind, reason, now)?,
            )
        } else {
            None
        };

        if let Err(e) = self
            .registry
            .apply(http, guild_id, user_id, kind, reason)
            .await
        {
            warn!(
                guild_id = %guild_id,
                user_id = %user_id,
                kind = %kind,
                error = %e,
                "Action side effect failed"
            );
        }

        if let Some(channel) = log_channel {
            self.post_mod_log(http, channel, user_id, kind, reason).await;
        }

        Ok(record)
    }

    /// Undo the restriction behind a record. The record itself is
    /// transitioned by the caller only after this succeeds.
    pub async fn reverse(&self, http: &Http, record: &TempAction) -> SecurityResult<()> {
        self.registry
            .reverse(
                http,
                GuildId::new(record.guild_id),
                UserId::new(record.user_id),
                record.kind,
            )
            .await
    }

    async fn post_mod_log(
        &self,
        http: &Http,
        channel: ChannelId,
        user_id: UserId,
        kind: ModActionKind,
        reason: &str,
    ) {
        let embed = CreateEmbed::new()
            .title(format!("Moderation action: {kind}"))
            .colour(Colour::RED)
            .field("User", format!("<@{user_id}>"), true)
            .field("Action", kind.to_string(), true)
            .field("Reason", reason.to_string(), false);

        if let Err(e) = channel
            .send_message(http, CreateMessage::new().embed(embed))
            .await
        {
            warn!(channel_id = %channel, error = %e, "Failed to post moderation log");
        }
    }
}
