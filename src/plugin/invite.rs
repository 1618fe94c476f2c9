use crate::{context::Context, event::*, plugin::*};
use anyhow::Result;
use serenity::all::{Permissions, UserId};
use std::time::Duration;

const COOLDOWN: Duration = Duration::from_secs(5);

pub struct Invite;

fn invite_url(bot_id: UserId) -> String {
    format!(
        "https://discord.com/oauth2/authorize?client_id={}&permissions={}&scope=bot%20applications.commands",
        bot_id,
        Permissions::ADMINISTRATOR.bits()
    )
}

#[serenity::async_trait]
impl Plugin for Invite {
    fn name(&self) -> &'static str {
        "invite"
    }

    async fn usage(&self, ctx: &Context<'_>) -> Option<String> {
        Some(command_usage(ctx, self.name(), "get the bot's invite link").await)
    }

    async fn handle(&self, ctx: &Context<'_>, event: &Event) -> Result<EventHandled> {
        let Some((msg, _, _)) = event.is_bot_cmd(ctx, self.name(), self.aliases()).await else {
            return Ok(EventHandled::No);
        };

        if !cooldown_ready(ctx, msg, self.name(), COOLDOWN).await? {
            return Ok(EventHandled::Yes);
        }

        let bot_id = ctx.cache.current_user().id;
        msg.reply(
            ctx.cache_http,
            format!("Here's my invite link:\n{}", invite_url(bot_id)),
        )
        .await?;
        Ok(EventHandled::Yes)
    }
}
