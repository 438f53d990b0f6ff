use crate::security::{SecurityError, SecurityLevel, ShieldLevel};
use crate::{Data, Error, status};
use chrono::Utc;
use poise::serenity_prelude as serenity;
use poise::{Context, CreateReply, command};
use tracing::warn;

/// Basic ping command
/// This command is used to check if the bot is responsive.
#[command(prefix_command, slash_command, guild_only)]
pub async fn ping(ctx: Context<'_, Data, Error>) -> Result<(), Error> {
    ctx.say("Pong!").await?;
    Ok(())
}

fn guild_id(ctx: &Context<'_, Data, Error>) -> Result<u64, Error> {
    Ok(ctx
        .guild_id()
        .ok_or("This command only works in a server")?
        .get())
}

/// Persist the settings after a command mutated them
async fn save_settings(ctx: &Context<'_, Data, Error>) {
    if let Err(e) = ctx.data().save().await {
        warn!(error = %e, "Failed to save guild settings");
    }
}

/// Spam protection controls
#[command(
    slash_command,
    guild_only,
    required_permissions = "MODERATE_MEMBERS",
    subcommands("security_level", "security_status", "unmute", "unban", "sweep")
)]
pub async fn security(ctx: Context<'_, Data, Error>) -> Result<(), Error> {
    ctx.say("Use one of the subcommands: level, status, unmute, unban, sweep")
        .await?;
    Ok(())
}

/// Show or change the spam protection level
#[command(slash_command, guild_only, rename = "level")]
pub async fn security_level(
    ctx: Context<'_, Data, Error>,
    #[description = "low, medium, high or extreme (omit to show)"] level: Option<String>,
) -> Result<(), Error> {
    let security = &ctx.data().security;
    match level {
        None => {
            ctx.say(format!("Security level: **{}**", security.security_level()))
                .await?;
        }
        Some(level) => match level.parse::<SecurityLevel>() {
            Ok(level) => {
                security.set_security_level(level);
                ctx.say(format!("Security level set to **{level}**")).await?;
            }
            Err(SecurityError::InvalidLevel(name)) => {
                ctx.say(format!(
                    "Unknown level `{name}`. Valid levels: low, medium, high, extreme"
                ))
                .await?;
            }
            Err(e) => return Err(e.into()),
        },
    }
    Ok(())
}

/// Current spam protection state for this server
#[command(slash_command, guild_only, rename = "status")]
pub async fn security_status(ctx: Context<'_, Data, Error>) -> Result<(), Error> {
    let guild_id = guild_id(&ctx)?;
    let snapshot = ctx.data().security.status(guild_id);
    let embed = status::security_status_embed(&snapshot, Utc::now());
    ctx.send(CreateReply::default().embed(embed)).await?;
    Ok(())
}

/// Lift an active mute early
#[command(slash_command, guild_only)]
pub async fn unmute(
    ctx: Context<'_, Data, Error>,
    #[description = "The muted member"] user: serenity::User,
) -> Result<(), Error> {
    let guild_id = guild_id(&ctx)?;
    match ctx
        .data()
        .security
        .manual_unmute(ctx.http(), guild_id, user.id.get(), Utc::now())
        .await
    {
        Ok(()) => {
            ctx.say(format!("Unmuted <@{}>", user.id)).await?;
        }
        Err(SecurityError::NotMuted(_)) => {
            ctx.say(format!("<@{}> is not muted", user.id)).await?;
        }
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

/// Lift a temporary ban early
#[command(slash_command, guild_only, required_permissions = "BAN_MEMBERS")]
pub async fn unban(
    ctx: Context<'_, Data, Error>,
    #[description = "The banned user"] user: serenity::User,
) -> Result<(), Error> {
    let guild_id = guild_id(&ctx)?;
    match ctx
        .data()
        .security
        .manual_unban(ctx.http(), guild_id, user.id.get(), Utc::now())
        .await
    {
        Ok(()) => {
            ctx.say(format!("Unbanned <@{}>", user.id)).await?;
        }
        Err(SecurityError::NotBanned(_)) => {
            ctx.say(format!("<@{}> has no temporary ban on record", user.id))
                .await?;
        }
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

/// Run the maintenance sweep immediately
#[command(slash_command, guild_only)]
pub async fn sweep(ctx: Context<'_, Data, Error>) -> Result<(), Error> {
    ctx.data().security.request_sweep().await?;
    ctx.say("Sweep requested").await?;
    Ok(())
}

/// Join protection controls
#[command(
    slash_command,
    guild_only,
    required_permissions = "MANAGE_GUILD",
    subcommands(
        "shield_level",
        "shield_status",
        "trust",
        "untrust",
        "verificationchannel",
        "logchannel",
        "lockdown",
        "unlock"
    )
)]
pub async fn shield(ctx: Context<'_, Data, Error>) -> Result<(), Error> {
    ctx.say(
        "Use one of the subcommands: level, status, trust, untrust, \
         verificationchannel, logchannel, lockdown, unlock",
    )
    .await?;
    Ok(())
}

/// Show or change this server's shield level
#[command(slash_command, guild_only, rename = "level")]
pub async fn shield_level(
    ctx: Context<'_, Data, Error>,
    #[description = "low, medium, high or lockdown (omit to show)"] level: Option<String>,
) -> Result<(), Error> {
    let guild_id = guild_id(&ctx)?;
    let security = &ctx.data().security;
    match level {
        None => {
            ctx.say(format!(
                "Shield level: **{}**",
                security.shield_level(guild_id)
            ))
            .await?;
        }
        Some(level) => match level.parse::<ShieldLevel>() {
            Ok(level) => {
                security.set_shield_level(guild_id, level);
                save_settings(&ctx).await;
                ctx.say(format!("Shield level set to **{level}**")).await?;
            }
            Err(SecurityError::InvalidLevel(name)) => {
                ctx.say(format!(
                    "Unknown level `{name}`. Valid levels: low, medium, high, lockdown"
                ))
                .await?;
            }
            Err(e) => return Err(e.into()),
        },
    }
    Ok(())
}

/// Current join protection state for this server
#[command(slash_command, guild_only, rename = "status")]
pub async fn shield_status(ctx: Context<'_, Data, Error>) -> Result<(), Error> {
    let guild_id = guild_id(&ctx)?;
    let snapshot = ctx.data().security.status(guild_id);
    let embed = status::shield_status_embed(&snapshot, Utc::now());
    ctx.send(CreateReply::default().embed(embed)).await?;
    Ok(())
}

/// Exempt a member from the shield checks
#[command(slash_command, guild_only)]
pub async fn trust(
    ctx: Context<'_, Data, Error>,
    #[description = "The member to trust"] user: serenity::User,
) -> Result<(), Error> {
    let guild_id = guild_id(&ctx)?;
    let added = ctx.data().trust_add(guild_id, user.id.get());
    if added {
        save_settings(&ctx).await;
        ctx.say(format!("<@{}> is now trusted", user.id)).await?;
    } else {
        ctx.say(format!("<@{}> was already trusted", user.id))
            .await?;
    }
    Ok(())
}

/// Remove a member from the trust list
#[command(slash_command, guild_only)]
pub async fn untrust(
    ctx: Context<'_, Data, Error>,
    #[description = "The member to untrust"] user: serenity::User,
) -> Result<(), Error> {
    let guild_id = guild_id(&ctx)?;
    let removed = ctx.data().trust_remove(guild_id, user.id.get());
    if removed {
        save_settings(&ctx).await;
        ctx.say(format!("<@{}> is no longer trusted", user.id))
            .await?;
    } else {
        ctx.say(format!("<@{}> was not on the trust list", user.id))
            .await?;
    }
    Ok(())
}

/// Post verification prompts in the current channel
#[command(slash_command, guild_only)]
pub async fn verificationchannel(ctx: Context<'_, Data, Error>) -> Result<(), Error> {
    let guild_id = guild_id(&ctx)?;
    let channel_id = ctx.channel_id().get();
    ctx.data().set_verification_channel(guild_id, channel_id);
    save_settings(&ctx).await;
    ctx.say(format!("Verification prompts will be posted in <#{channel_id}>"))
        .await?;
    Ok(())
}

/// Send moderation logs to the current channel
#[command(slash_command, guild_only)]
pub async fn logchannel(ctx: Context<'_, Data, Error>) -> Result<(), Error> {
    let guild_id = guild_id(&ctx)?;
    let channel_id = ctx.channel_id().get();
    ctx.data().set_log_channel(guild_id, channel_id);
    save_settings(&ctx).await;
    ctx.say(format!("Moderation logs will be sent to <#{channel_id}>"))
        .await?;
    Ok(())
}

/// Lock the server down for a fixed number of minutes
#[command(slash_command, guild_only)]
pub async fn lockdown(
    ctx: Context<'_, Data, Error>,
    #[description = "Duration in minutes (5 to 1440)"] minutes: i64,
    #[description = "Reason shown in the status"] reason: Option<String>,
) -> Result<(), Error> {
    let guild_id = guild_id(&ctx)?;
    let reason = reason.unwrap_or_else(|| "Manual lockdown".to_string());
    match ctx
        .data()
        .security
        .manual_lockdown(ctx.http(), guild_id, minutes, &reason, Utc::now())
        .await
    {
        Ok(()) => {
            save_settings(&ctx).await;
            ctx.say(format!("🔒 Server locked down for {minutes} minutes"))
                .await?;
        }
        Err(SecurityError::InvalidDuration { min, max }) => {
            ctx.say(format!(
                "Lockdown duration must be between {min} and {max} minutes"
            ))
            .await?;
        }
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

/// Release the server from lockdown
#[command(slash_command, guild_only)]
pub async fn unlock(ctx: Context<'_, Data, Error>) -> Result<(), Error> {
    let guild_id = guild_id(&ctx)?;
    match ctx
        .data()
        .security
        .manual_unlock(ctx.http(), guild_id)
        .await
    {
        Ok(()) => {
            save_settings(&ctx).await;
            ctx.say("🔓 Server unlocked").await?;
        }
        Err(SecurityError::NotLockedDown(_)) => {
            ctx.say("The server is not locked down").await?;
        }
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    // Test that the ping command is properly defined
    #[test]
    fn test_ping_command_definition() {
        let cmd = ping();
        assert_eq!(cmd.name, "ping");
        assert!(cmd.guild_only);
    }

    #[test]
    fn test_security_command_tree() {
        let cmd = security();
        assert_eq!(cmd.name, "security");
        assert!(cmd.guild_only);

        let names: Vec<_> = cmd.subcommands.iter().map(|c| c.name.as_str()).collect();
        assert!(names.contains(&"level"));
        assert!(names.contains(&"status"));
        assert!(names.contains(&"unmute"));
        assert!(names.contains(&"unban"));
        assert!(names.contains(&"sweep"));
    }

    #[test]
    fn test_shield_command_tree() {
        let cmd = shield();
        assert_eq!(cmd.name, "shield");
        assert!(cmd.guild_only);

        let names: Vec<_> = cmd.subcommands.iter().map(|c| c.name.as_str()).collect();
        assert!(names.contains(&"level"));
        assert!(names.contains(&"status"));
        assert!(names.contains(&"trust"));
        assert!(names.contains(&"untrust"));
        assert!(names.contains(&"lockdown"));
        assert!(names.contains(&"unlock"));
    }

    #[test]
    fn test_commands_create_as_slash_commands() {
        assert!(security().create_as_slash_command().is_some());
        assert!(shield().create_as_slash_command().is_some());
    }
}
