use crate::{
    config::Config, context::Context, event::Event, registry::Registry, settings::SettingsStore,
};
use serenity::all::{Guild, Message, Ready, UnavailableGuild, VoiceState};
use tokio::sync::RwLock;

/// Discord event handler
pub struct Handler {
    cfg: RwLock<Config>,
    settings: SettingsStore,
    registry: Registry,
}

impl<'a> Handler {
    pub fn new(cfg: Config, settings: SettingsStore, registry: Registry) -> Self {
        Self {
            cfg: RwLock::new(cfg),
            settings,
            registry,
        }
    }

    fn ctx(&'a self, discord_ctx: &'a serenity::all::Context) -> Context<'a> {
        Context {
            cfg: &self.cfg,
            settings: &self.settings,
            registry: &self.registry,
            cache: &discord_ctx.cache,
            http: &discord_ctx.http,
            cache_http: discord_ctx,
        }
    }
}

#[serenity::async_trait]
impl serenity::all::EventHandler for Handler {
    async fn ready(&self, discord_ctx: serenity::all::Context, ready: Ready) {
        Event::Ready(ready).handle(self.ctx(&discord_ctx)).await;
    }

    async fn message(&self, discord_ctx: serenity::all::Context, msg: Message) {
        Event::Message(msg).handle(self.ctx(&discord_ctx)).await;
    }

    async fn voice_state_update(
        &self,
        discord_ctx: serenity::all::Context,
        old: Option<VoiceState>,
        new: VoiceState,
    ) {
        Event::VoiceStateUpdate { old, new }
            .handle(self.ctx(&discord_ctx))
            .await;
    }

    async fn guild_create(
        &self,
        discord_ctx: serenity::all::Context,
        guild: Guild,
        _is_new: Option<bool>,
    ) {
        Event::GuildCreate { guild }
            .handle(self.ctx(&discord_ctx))
            .await;
    }

    async fn guild_delete(
        &self,
        discord_ctx: serenity::all::Context,
        incomplete: UnavailableGuild,
        _full: Option<Guild>,
    ) {
        Event::GuildDelete { incomplete }
            .handle(self.ctx(&discord_ctx))
            .await;
    }
}
