mod config;
mod context;
mod cooldown;
mod event;
mod handler;
mod helper;
mod logging;
mod plugin;
mod registry;
mod settings;

use serenity::{all::GatewayIntents, Client};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init();

    let cfg = config::Config::load().await?;
    let token = cfg.general.discord_token.clone();
    let registry = registry::Registry::new(
        cfg.registry.tick_interval(),
        cfg.registry.default_cache_ttl(),
    );
    let settings = settings::SettingsStore::new(
        cfg.data_dir()?,
        cfg.defaults.motd.clone(),
        registry.clone(),
    );
    let handler = handler::Handler::new(cfg, settings, registry);

    // Things we want discord to tell us about.
    let intents = GatewayIntents::GUILDS
        | GatewayIntents::GUILD_MEMBERS
        | GatewayIntents::GUILD_MESSAGES
        | GatewayIntents::GUILD_VOICE_STATES
        | GatewayIntents::MESSAGE_CONTENT;

    Client::builder(&token, intents)
        .event_handler(handler)
        .await?
        .start()
        .await
        .map_err(Into::into)
}
