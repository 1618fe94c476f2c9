use crate::{context::Context, event::*, helper::*, plugin::*};
use anyhow::Result;
use serenity::all::{Colour, CreateEmbed, CreateEmbedFooter, GuildId};
use std::time::Duration;

const COOLDOWN: Duration = Duration::from_secs(5);
/// Leaves headroom under Discord's embed description limit.
const MAX_CHUNK_LEN: usize = 1900;

/// Lists servers that have stored settings (bot owner only)
pub struct Guilds;

#[serenity::async_trait]
impl Plugin for Guilds {
    fn name(&self) -> &'static str {
        "guilds"
    }

    fn aliases(&self) -> &'static [&'static str] {
        &["guildlist"]
    }

    async fn usage(&self, ctx: &Context<'_>) -> Option<String> {
        Some(
            command_usage(
                ctx,
                self.name(),
                "list servers with stored settings (bot owner only)",
            )
            .await,
        )
    }

    async fn handle(&self, ctx: &Context<'_>, event: &Event) -> Result<EventHandled> {
        let Some((msg, _, _)) = event.is_bot_cmd(ctx, self.name(), self.aliases()).await else {
            return Ok(EventHandled::No);
        };

        if !msg.is_from_owner(ctx).await {
            return deny_non_owner(ctx, msg).await;
        }
        if !cooldown_ready(ctx, msg, self.name(), COOLDOWN).await? {
            return Ok(EventHandled::Yes);
        }

        let guild_ids = ctx.settings.guild_ids().await?;
        if guild_ids.is_empty() {
            let embed = CreateEmbed::new()
                .title("\u{1F3E0} Guild List")
                .description("No guild data files found.")
                .colour(Colour::GOLD);
            reply_embed(ctx, msg, embed).await?;
            return Ok(EventHandled::Yes);
        }

        let lines: Vec<String> = guild_ids
            .iter()
            .map(|guild_id| guild_line(ctx, *guild_id))
            .collect();

        for chunk in chunk_lines(&lines, MAX_CHUNK_LEN) {
            let embed = CreateEmbed::new()
                .title("\u{1F3E0} Guild List")
                .description(chunk)
                .colour(Colour::BLUE)
                .footer(CreateEmbedFooter::new(format!(
                    "{} guild(s) found",
                    guild_ids.len()
                )));
            reply_embed(ctx, msg, embed).await?;
        }

        Ok(EventHandled::Yes)
    }
}

fn guild_line(ctx: &Context<'_>, guild_id: GuildId) -> String {
    let (name, members) = match ctx.cache.guild(guild_id) {
        Some(guild) => (guild.name.clone(), guild.member_count.to_string()),
        None => ("(not in cache)".to_owned(), "Unknown".to_owned()),
    };
    format!("\u{2022} **{}** - {} ({} members)", guild_id, name, members)
}
