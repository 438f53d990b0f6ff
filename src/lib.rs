pub mod commands;
pub mod data;
pub mod handlers;
pub mod logging;
pub mod security;
pub mod status;

pub const BOT_NAME: &str = "vigilant_warden";
pub const COMMAND_TARGET: &str = "vigilant_warden::command";
pub const ERROR_TARGET: &str = "vigilant_warden::error";
pub const EVENT_TARGET: &str = "vigilant_warden::handlers";
pub const CONSOLE_TARGET: &str = "vigilant_warden";
/// Target for spam detection and moderation action logs
pub const SECURITY_TARGET: &str = "vigilant_warden::security";
/// Target for join gating, verification, and lockdown logs
pub const SHIELD_TARGET: &str = "vigilant_warden::shield";

pub use data::{Data, DataInner, GuildSettings};
pub use security::{SecurityError, SecurityService};
pub type Error = Box<dyn std::error::Error + Send + Sync>;
pub type Context<'a> = poise::Context<'a, Data, Error>;
