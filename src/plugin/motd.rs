use crate::{context::Context, event::*, plugin::*};
use anyhow::Result;
use serenity::all::{CreateEmbed, Timestamp};
use std::time::Duration;

const COOLDOWN: Duration = Duration::from_secs(1);

/// Message of the day
pub struct Motd;

#[serenity::async_trait]
impl Plugin for Motd {
    fn name(&self) -> &'static str {
        "motd"
    }

    fn aliases(&self) -> &'static [&'static str] {
        &["message-of-the-day"]
    }

    async fn usage(&self, ctx: &Context<'_>) -> Option<String> {
        Some(command_usage(ctx, self.name(), "Message Of The Day!").await)
    }

    async fn handle(&self, ctx: &Context<'_>, event: &Event) -> Result<EventHandled> {
        let Some((msg, guild_id, _)) = event.is_bot_cmd(ctx, self.name(), self.aliases()).await
        else {
            return Ok(EventHandled::No);
        };

        if !cooldown_ready(ctx, msg, self.name(), COOLDOWN).await? {
            return Ok(EventHandled::Yes);
        }

        let motd = ctx
            .settings
            .load(guild_id)
            .await?
            .motd
            .filter(|motd| !motd.is_empty())
            .unwrap_or_else(|| "No MOTD set.".to_owned());

        let embed = CreateEmbed::new()
            .title("MOTD")
            .description(motd)
            .timestamp(Timestamp::now());
        reply_embed(ctx, msg, embed).await?;

        Ok(EventHandled::Yes)
    }
}
