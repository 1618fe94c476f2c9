use crate::{context::Context, event::*, helper::MessageHelper, log_internal, plugin::*};
use anyhow::Result;

pub struct Reload;

#[serenity::async_trait]
impl Plugin for Reload {
    fn name(&self) -> &'static str {
        "reload"
    }

    async fn usage(&self, ctx: &Context<'_>) -> Option<String> {
        Some(command_usage(ctx, self.name(), "reload config (bot owner only)").await)
    }

    async fn handle(&self, ctx: &Context<'_>, event: &Event) -> Result<EventHandled> {
        let Some((msg, _, _)) = event.is_bot_cmd(ctx, self.name(), self.aliases()).await else {
            return Ok(EventHandled::No);
        };

        if !msg.is_from_owner(ctx).await {
            return deny_non_owner(ctx, msg).await;
        }

        ctx.cfg.write().await.reload().await?;

        // Takes effect the next time the shared timer starts.
        let tick_interval = ctx.cfg.read().await.registry.tick_interval();
        ctx.registry.set_interval(tick_interval).await;
        log_internal!("Configuration reloaded");

        msg.reply(ctx.cache_http, "Configuration reloaded successfully")
            .await?;
        Ok(EventHandled::Yes)
    }
}
