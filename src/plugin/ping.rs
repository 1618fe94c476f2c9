use crate::{context::Context, event::*, plugin::*};
use anyhow::Result;

pub struct Ping;

#[serenity::async_trait]
impl Plugin for Ping {
    fn name(&self) -> &'static str {
        "ping"
    }

    fn aliases(&self) -> &'static [&'static str] {
        &["pong"]
    }

    async fn usage(&self, ctx: &Context<'_>) -> Option<String> {
        Some(command_usage(ctx, self.name(), "Pong!").await)
    }

    async fn handle(&self, ctx: &Context<'_>, event: &Event) -> Result<EventHandled> {
        let Some((msg, _, _)) = event.is_bot_cmd(ctx, self.name(), self.aliases()).await else {
            return Ok(EventHandled::No);
        };

        msg.reply(ctx.cache_http, "Pong \u{1F3D3}").await?;
        Ok(EventHandled::Yes)
    }
}
