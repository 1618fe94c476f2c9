use crate::{
    context::Context, event::*, log_internal, logging::*, plugin::*, registry::Scope,
};
use anyhow::Result;
use serenity::all::{EditRole, Guild, Permissions};

/// Role whose members may use admin-only commands
const ADMIN_ROLE_NAME: &str = "Purkachu Admin";

/// Prepares servers the bot joins and forgets servers it leaves.
pub struct GuildSetup;

#[serenity::async_trait]
impl Plugin for GuildSetup {
    fn name(&self) -> &'static str {
        "guild_setup"
    }

    async fn usage(&self, _ctx: &Context<'_>) -> Option<String> {
        None
    }

    async fn handle(&self, ctx: &Context<'_>, event: &Event) -> Result<EventHandled> {
        match event {
            Event::GuildCreate { guild } => ensure_admin_role(ctx, guild).await?,
            // Unavailable due to an outage; the guild is coming back.
            Event::GuildDelete { incomplete } if incomplete.unavailable => {}
            Event::GuildDelete { incomplete } => {
                ctx.registry
                    .remove_scope(Scope::Tenant(incomplete.id.get()))
                    .await;
                log_internal!("Dropped runtime state for server {}", incomplete.id);
            }
            _ => {}
        }

        // Other plugins may care about these events too.
        Ok(EventHandled::No)
    }
}

async fn ensure_admin_role(ctx: &Context<'_>, guild: &Guild) -> Result<()> {
    let existing = guild
        .roles
        .values()
        .find(|role| role.name == ADMIN_ROLE_NAME)
        .map(|role| role.id);

    let role_id = match existing {
        Some(role_id) => role_id,
        None => {
            let builder = EditRole::new()
                .name(ADMIN_ROLE_NAME)
                .permissions(Permissions::empty())
                .audit_log_reason("Default Purkachu Admin role for bot commands");
            let role = guild.id.create_role(ctx.http, builder).await?;
            log_internal!("Created role \"{}\" in {}", ADMIN_ROLE_NAME, guild.color());
            role.id
        }
    };

    let settings = ctx.settings.load(guild.id).await?;
    if !settings.admin_roles.contains(&role_id) {
        ctx.settings
            .update(guild.id, |s| s.admin_roles.insert(role_id))
            .await?;
        log_internal!("Registered \"{}\" as admin role in {}", ADMIN_ROLE_NAME, guild.color());
    }

    Ok(())
}
