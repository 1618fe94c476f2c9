use crate::{
    context::Context,
    cooldown::{self, Cooldown},
    event::{Event, EventHandled},
    log_error,
};
use anyhow::Result;
use serenity::all::{CreateEmbed, CreateMessage, Message, Timestamp};
use std::time::Duration;

mod afk_kicker;
mod debug;
mod guild_setup;
mod guilds;
mod help;
mod ignore_bots;
mod invite;
mod mark_files;
mod motd;
mod ping;
mod ready;
mod reload;
mod settings;
mod starred_files;

#[serenity::async_trait]
pub trait Plugin: Sync + Send {
    /// Plugin name.  For commands, also the command name.
    fn name(&self) -> &'static str;
    /// Alternative command names
    fn aliases(&self) -> &'static [&'static str] {
        &[]
    }
    /// Help message line.  None if no help message
    async fn usage(&self, ctx: &Context<'_>) -> Option<String>;
    /// Potentially handle event.  Returns:
    /// - Ok(EventHandled::Yes) if the event has been handled and no other plugin should attempt to
    /// handle it
    /// - Ok(EventHandled::No) if another plugin should attempt to handle the event
    /// - Err if an error occurred
    async fn handle(&self, ctx: &Context<'_>, event: &Event) -> Result<EventHandled>;
}

/// Ordered list of available plugins
pub fn plugins() -> Vec<Box<dyn Plugin>> {
    vec![
        // Core bot operations
        Box::new(debug::Debug),
        Box::new(ignore_bots::IgnoreBots),
        Box::new(ready::Ready),
        Box::new(guild_setup::GuildSetup),
        // Voice Chat
        Box::new(afk_kicker::AfkKicker),
        // Commands
        Box::new(help::Help),
        Box::new(ping::Ping),
        Box::new(motd::Motd),
        Box::new(settings::Settings),
        Box::new(invite::Invite),
        Box::new(starred_files::StarredFiles),
        Box::new(mark_files::MarkFiles),
        Box::new(guilds::Guilds),
        Box::new(reload::Reload),
    ]
}

/// Usage line for a prefixed command, e.g. `?motd - message of the day`.
async fn command_usage(ctx: &Context<'_>, command: &str, description: &str) -> String {
    let prefix = &ctx.cfg.read().await.general.command_prefix;
    format!("{}{} - {}", prefix, command, description)
}

/// Start the user's cooldown for `command`.  If it is already running, tell the user when to
/// retry and return false.  The notice is deleted once the cooldown is over.
async fn cooldown_ready(
    ctx: &Context<'_>,
    msg: &Message,
    command: &str,
    duration: Duration,
) -> Result<bool> {
    let retry_at = match cooldown::check(ctx.registry, command, msg.author.id, duration).await {
        Cooldown::Ready => return Ok(true),
        Cooldown::Active { retry_at } => retry_at,
    };

    let notice = msg
        .reply(
            ctx.cache_http,
            format!(
                "Cooldown is currently active, please try again <t:{}:R>.",
                retry_at
            ),
        )
        .await?;

    let wait = (retry_at - Timestamp::now().unix_timestamp()).max(0) as u64 + 1;
    let http = ctx.http.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(wait)).await;
        if let Err(err) = notice.delete(&http).await {
            log_error!("Could not delete cooldown notice: {}", err);
        }
    });

    Ok(false)
}

/// Reply with a short embed.
async fn reply_embed(ctx: &Context<'_>, msg: &Message, embed: CreateEmbed) -> Result<()> {
    msg.channel_id
        .send_message(
            ctx.cache_http,
            CreateMessage::new().embed(embed).reference_message(msg),
        )
        .await?;
    Ok(())
}

async fn deny_non_admin(ctx: &Context<'_>, msg: &Message) -> Result<EventHandled> {
    let embed = CreateEmbed::new()
        .title("Only **admins** can use this command.")
        .timestamp(Timestamp::now());
    reply_embed(ctx, msg, embed).await?;
    Ok(EventHandled::Yes)
}

async fn deny_non_owner(ctx: &Context<'_>, msg: &Message) -> Result<EventHandled> {
    msg.reply(
        ctx.cache_http,
        "Only my **developers** can use this command.",
    )
    .await?;
    Ok(EventHandled::Yes)
}
