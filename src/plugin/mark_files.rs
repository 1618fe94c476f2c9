use super::starred_files::{check_channel, fetch_history, Unscannable, DOWN, STAR};
use crate::{context::Context, event::*, helper::*, log_error, plugin::*};
use anyhow::Result;
use serenity::all::{EditMessage, Message, ReactionType};
use std::time::Duration;

const COOLDOWN: Duration = Duration::from_secs(30);

/// Adds the ⭐ and ❌ vote reactions to every audio submission in a channel (admins only)
pub struct MarkFiles;

/// Messages with exactly one audio attachment that the bot has not voted on yet
fn needs_marking(msg: &Message) -> bool {
    let content_types: Vec<Option<&str>> = msg
        .attachments
        .iter()
        .map(|attachment| attachment.content_type.as_deref())
        .collect();
    is_unmarked_audio(&content_types, msg.reactions.iter().any(|reaction| reaction.me))
}

fn is_unmarked_audio(content_types: &[Option<&str>], bot_reacted: bool) -> bool {
    let [Some(content_type)] = content_types else {
        return false;
    };
    content_type.starts_with("audio") && !bot_reacted
}

#[serenity::async_trait]
impl Plugin for MarkFiles {
    fn name(&self) -> &'static str {
        "mark-files"
    }

    async fn usage(&self, ctx: &Context<'_>) -> Option<String> {
        Some(
            command_usage(
                ctx,
                "mark-files [#channel]",
                "add vote reactions to audio files (admins only)",
            )
            .await,
        )
    }

    async fn handle(&self, ctx: &Context<'_>, event: &Event) -> Result<EventHandled> {
        let Some((msg, guild_id, args)) = event.is_bot_cmd(ctx, self.name(), self.aliases()).await
        else {
            return Ok(EventHandled::No);
        };

        if !msg.is_from_admin(ctx).await? {
            return deny_non_admin(ctx, msg).await;
        }

        let channel_id = match args.as_slice() {
            [] => msg.channel_id,
            [channel] => match parse_channel(channel) {
                Some(channel_id) => channel_id,
                None => {
                    msg.reply(ctx.cache_http, "Please provide a valid text channel.")
                        .await?;
                    return Ok(EventHandled::Yes);
                }
            },
            _ => {
                msg.reply(ctx.cache_http, "Expected at most one channel").await?;
                return Ok(EventHandled::Yes);
            }
        };

        match check_channel(ctx, guild_id, channel_id, true) {
            Ok(()) => {}
            Err(Unscannable::NotText) => {
                msg.reply(ctx.cache_http, "Please provide a valid text channel.")
                    .await?;
                return Ok(EventHandled::Yes);
            }
            Err(Unscannable::MissingPermissions) => {
                msg.reply(
                    ctx.cache_http,
                    "I need permission to read messages and add reactions in this channel.",
                )
                .await?;
                return Ok(EventHandled::Yes);
            }
        }

        if !cooldown_ready(ctx, msg, self.name(), COOLDOWN).await? {
            return Ok(EventHandled::Yes);
        }

        let mut status = msg
            .reply(ctx.cache_http, "Scanning messages for audio files\u{2026}")
            .await?;
        let messages = fetch_history(ctx, channel_id, msg.channel_id, |_| None).await?;
        status
            .edit(
                ctx.cache_http,
                EditMessage::new().content(format!(
                    "Scanning messages\u{2026} ({} collected)",
                    messages.len()
                )),
            )
            .await?;

        let mut reacted = 0;
        for message in messages.iter().filter(|message| needs_marking(message)) {
            let marked = async {
                message
                    .react(ctx.cache_http, ReactionType::Unicode(STAR.to_owned()))
                    .await?;
                message
                    .react(ctx.cache_http, ReactionType::Unicode(DOWN.to_owned()))
                    .await
            };
            match marked.await {
                Ok(_) => reacted += 1,
                Err(err) => log_error!("Could not react to message {}: {}", message.id, err),
            }
        }

        status
            .edit(
                ctx.cache_http,
                EditMessage::new().content(format!(
                    "\u{2705} Finished! Added {} and {} to {} audio messages.",
                    STAR, DOWN, reacted
                )),
            )
            .await?;
        Ok(EventHandled::Yes)
    }
}
