//! Miscellaneous convenience methods

use crate::context::Context;
use anyhow::Result;
use serenity::all::{ChannelId, GuildId, UserId};

#[serenity::async_trait]
pub trait UserHelper {
    async fn nick_in_guild(&self, ctx: &Context<'_>, guild_id: Option<GuildId>) -> String;
}

#[serenity::async_trait]
impl UserHelper for serenity::all::User {
    async fn nick_in_guild(&self, ctx: &Context<'_>, guild_id: Option<GuildId>) -> String {
        let nick_in_guild = match guild_id {
            Some(guild_id) => self.nick_in(ctx.cache_http, guild_id).await,
            None => None,
        };

        // May not be in a guild, e.g. DM.  Fall back to global username.
        match nick_in_guild {
            Some(nick_in_guild) => nick_in_guild,
            None => self.name.clone(),
        }
    }
}

#[serenity::async_trait]
pub trait MessageHelper {
    async fn is_from_owner(&self, ctx: &Context<'_>) -> bool;
    async fn is_from_admin(&self, ctx: &Context<'_>) -> Result<bool>;
}

#[serenity::async_trait]
impl MessageHelper for serenity::all::Message {
    async fn is_from_owner(&self, ctx: &Context<'_>) -> bool {
        ctx.cfg.read().await.is_owner(self.author.id.get())
    }

    /// Owners, users listed as admins in the guild settings, and members holding an admin role.
    async fn is_from_admin(&self, ctx: &Context<'_>) -> Result<bool> {
        if self.is_from_owner(ctx).await {
            return Ok(true);
        }

        let Some(guild_id) = self.guild_id else {
            return Ok(false);
        };
        let roles = self
            .member
            .as_ref()
            .map(|member| member.roles.clone())
            .unwrap_or_default();

        Ok(ctx
            .settings
            .load(guild_id)
            .await?
            .is_admin(self.author.id, &roles))
    }
}

/// Parse a user mention (`<@123>`, `<@!123>`) or a bare user id.
pub fn parse_user(arg: &str) -> Option<UserId> {
    let id = arg
        .strip_prefix("<@")
        .and_then(|rest| rest.strip_suffix('>'))
        .map(|rest| rest.strip_prefix('!').unwrap_or(rest))
        .unwrap_or(arg);

    id.parse::<u64>()
        .ok()
        .filter(|id| *id != 0)
        .map(UserId::new)
}

/// Parse a channel mention (`<#123>`) or a bare channel id.
pub fn parse_channel(arg: &str) -> Option<ChannelId> {
    let id = arg
        .strip_prefix("<#")
        .and_then(|rest| rest.strip_suffix('>'))
        .unwrap_or(arg);

    id.parse::<u64>()
        .ok()
        .filter(|id| *id != 0)
        .map(ChannelId::new)
}

/// Join lines into chunks of at most `max_len` bytes, for messages with a length limit.  A single
/// line longer than `max_len` gets a chunk of its own.
pub fn chunk_lines(lines: &[String], max_len: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();

    for line in lines {
        if !current.is_empty() && current.len() + 1 + line.len() > max_len {
            chunks.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push('\n');
        }
        current.push_str(line);
    }
    if !current.is_empty() {
        chunks.push(current);
    }

    chunks
}
