use crate::{context::Context, event::*, log_internal, plugin::*};
use anyhow::Result;
use serenity::all::ActivityData;

/// Sets the bot's presence once the connection to Discord is ready.
pub struct Ready;

#[serenity::async_trait]
impl Plugin for Ready {
    fn name(&self) -> &'static str {
        "ready"
    }

    async fn usage(&self, _ctx: &Context<'_>) -> Option<String> {
        None
    }

    async fn handle(&self, ctx: &Context<'_>, event: &Event) -> Result<EventHandled> {
        let Event::Ready(_) = event else {
            return Ok(EventHandled::No);
        };

        ctx.cache_http
            .set_activity(Some(ActivityData::watching("the voice calls.")));
        log_internal!("Presence set");

        Ok(EventHandled::Yes)
    }
}
