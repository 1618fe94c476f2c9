//! Ranks file submissions in a channel by community votes: human ⭐ reactions minus human ❌
//! reactions on messages carrying exactly one attachment.

use crate::{context::Context, event::*, helper::*, plugin::*};
use anyhow::Result;
use serenity::all::{
    ChannelId, ChannelType, GetMessages, GuildId, Message, MessageId, ReactionType, UserId,
};
use std::time::Duration;
use tokio::time::Instant;

const COOLDOWN: Duration = Duration::from_secs(15);
const DEFAULT_TOP: usize = 24;
/// Discord's per-request maximum for both messages and reaction users.
const PAGE_SIZE: u8 = 100;
/// Replies must stay under Discord's 2000 character message limit.
const MAX_REPLY_LEN: usize = 1999;
const EXCERPT_LEN: usize = 100;
/// Scans slower than this get a heads-up, then periodic progress messages.
const SLOW_SCAN: Duration = Duration::from_secs(5);
const PROGRESS_EVERY: Duration = Duration::from_secs(4);

pub(super) const STAR: &str = "\u{2B50}";
pub(super) const DOWN: &str = "\u{274C}";

pub struct StarredFiles;

#[derive(Clone, Copy, Debug, PartialEq)]
enum Top {
    All,
    Limit(usize),
}

/// One voted-on file
#[derive(Clone, Debug, PartialEq)]
struct Submission {
    message_id: MessageId,
    file_name: String,
    excerpt: String,
    stars: u64,
    downs: u64,
}

impl Submission {
    fn net(&self) -> i64 {
        self.stars as i64 - self.downs as i64
    }
}

/// `[#channel] [top]`, in either order.  A negative `top` means all.
fn parse_args(args: &[&str]) -> Result<(Option<ChannelId>, Top), &'static str> {
    let mut channel_id = None;
    let mut top = Top::Limit(DEFAULT_TOP);

    for arg in args {
        if let Ok(n) = arg.parse::<i64>() {
            top = match usize::try_from(n) {
                Ok(n) => Top::Limit(n),
                Err(_) => Top::All,
            };
        } else if let Some(id) = parse_channel(arg) {
            channel_id = Some(id);
        } else {
            return Err("Expected a channel and/or a number of submissions");
        }
    }

    Ok((channel_id, top))
}

/// Keep submissions with a net score of at least one, best first.  Ties keep scan order.
fn rank(mut submissions: Vec<Submission>, top: Top) -> Vec<Submission> {
    submissions.retain(|s| s.net() >= 1);
    submissions.sort_by_key(|s| std::cmp::Reverse(s.net()));
    if let Top::Limit(limit) = top {
        submissions.truncate(limit);
    }
    submissions
}

/// Reply messages listing `ranked`, each under the message length limit.
fn render(
    ranked: &[Submission],
    top: Top,
    scanned: usize,
    guild_id: GuildId,
    channel_id: ChannelId,
) -> Vec<String> {
    let title = match top {
        Top::All => "**Top".to_owned(),
        Top::Limit(limit) => format!("**Top {}", limit),
    };
    let mut lines = vec![format!(
        "{} starred file(s)** (out of {} messages in <#{}>):\n",
        title, scanned, channel_id
    )];

    lines.extend(ranked.iter().enumerate().map(|(i, s)| {
        format!(
            "{}. [Link](https://discord.com/channels/{}/{}/{}) - **{}** \u{2728} - {} - {} {} / {} {}\n> {}",
            i + 1,
            guild_id,
            channel_id,
            s.message_id,
            s.net(),
            s.file_name,
            s.stars,
            STAR,
            s.downs,
            DOWN,
            s.excerpt,
        )
    }));
    if ranked.is_empty() {
        lines.push("No starred files found \u{1F614}".to_owned());
    }

    chunk_lines(&lines, MAX_REPLY_LEN)
}

fn excerpt(content: &str) -> String {
    if content.is_empty() {
        return "(No text)".to_owned();
    }
    content.chars().take(EXCERPT_LEN).collect()
}

/// Why a channel cannot be scanned
pub(super) enum Unscannable {
    NotText,
    MissingPermissions,
}

/// Check the channel is a text channel of this guild and the bot may read its history (and add
/// reactions, if `react` is set).
pub(super) fn check_channel(
    ctx: &Context<'_>,
    guild_id: GuildId,
    channel_id: ChannelId,
    react: bool,
) -> Result<(), Unscannable> {
    let bot_id = ctx.cache.current_user().id;
    let guild = ctx.cache.guild(guild_id).ok_or(Unscannable::NotText)?;
    let channel = guild
        .channels
        .get(&channel_id)
        .filter(|channel| matches!(channel.kind, ChannelType::Text | ChannelType::News))
        .ok_or(Unscannable::NotText)?;
    let member = guild
        .members
        .get(&bot_id)
        .ok_or(Unscannable::MissingPermissions)?;

    let permissions = guild.user_permissions_in(channel, member);
    if !permissions.read_message_history() || (react && !permissions.add_reactions()) {
        return Err(Unscannable::MissingPermissions);
    }
    Ok(())
}

/// Every message in a channel, newest first, fetched in pages of `PAGE_SIZE`.  After each page,
/// `progress` gets the running total and may return a notice to post in `status_channel_id`.
pub(super) async fn fetch_history(
    ctx: &Context<'_>,
    channel_id: ChannelId,
    status_channel_id: ChannelId,
    mut progress: impl FnMut(usize) -> Option<String> + Send,
) -> Result<Vec<Message>> {
    let mut messages: Vec<Message> = Vec::new();

    loop {
        let mut request = GetMessages::new().limit(PAGE_SIZE);
        if let Some(oldest) = messages.last() {
            request = request.before(oldest.id);
        }

        let page = channel_id.messages(ctx.cache_http, request).await?;
        if page.is_empty() {
            break;
        }
        messages.extend(page);
        if let Some(notice) = progress(messages.len()) {
            status_channel_id.say(ctx.cache_http, notice).await?;
        }
    }

    Ok(messages)
}

/// How many non-bot users reacted to `msg` with `emoji`.
async fn human_reactions(ctx: &Context<'_>, msg: &Message, emoji: &str) -> Result<u64> {
    let reacted = msg.reactions.iter().any(|reaction| {
        matches!(&reaction.reaction_type, ReactionType::Unicode(name) if name == emoji)
    });
    if !reacted {
        return Ok(0);
    }

    let mut humans = 0;
    let mut after: Option<UserId> = None;
    loop {
        let users = msg
            .channel_id
            .reaction_users(
                ctx.http,
                msg.id,
                ReactionType::Unicode(emoji.to_owned()),
                Some(PAGE_SIZE),
                after,
            )
            .await?;
        humans += users.iter().filter(|user| !user.bot).count() as u64;

        match users.last() {
            Some(last) if users.len() == PAGE_SIZE as usize => after = Some(last.id),
            _ => break,
        }
    }
    Ok(humans)
}

async fn submission(ctx: &Context<'_>, msg: &Message) -> Result<Option<Submission>> {
    let [attachment] = msg.attachments.as_slice() else {
        return Ok(None);
    };

    let stars = human_reactions(ctx, msg, STAR).await?;
    if stars == 0 {
        return Ok(None);
    }
    let downs = human_reactions(ctx, msg, DOWN).await?;

    Ok(Some(Submission {
        message_id: msg.id,
        file_name: attachment.filename.clone(),
        excerpt: excerpt(&msg.content),
        stars,
        downs,
    }))
}

#[serenity::async_trait]
impl Plugin for StarredFiles {
    fn name(&self) -> &'static str {
        "get-starred-files"
    }

    fn aliases(&self) -> &'static [&'static str] {
        &["starred"]
    }

    async fn usage(&self, ctx: &Context<'_>) -> Option<String> {
        Some(
            command_usage(
                ctx,
                "get-starred-files [#channel] [top]",
                "rank files in a channel by stars (top defaults to 24, -1 for all)",
            )
            .await,
        )
    }

    async fn handle(&self, ctx: &Context<'_>, event: &Event) -> Result<EventHandled> {
        let Some((msg, guild_id, args)) = event.is_bot_cmd(ctx, self.name(), self.aliases()).await
        else {
            return Ok(EventHandled::No);
        };

        let (channel_id, top) = match parse_args(&args) {
            Ok((channel_id, top)) => (channel_id.unwrap_or(msg.channel_id), top),
            Err(problem) => {
                msg.reply(ctx.cache_http, problem).await?;
                return Ok(EventHandled::Yes);
            }
        };

        match check_channel(ctx, guild_id, channel_id, false) {
            Ok(()) => {}
            Err(Unscannable::NotText) => {
                msg.reply(ctx.cache_http, "Please provide a valid text channel.")
                    .await?;
                return Ok(EventHandled::Yes);
            }
            Err(Unscannable::MissingPermissions) => {
                msg.reply(
                    ctx.cache_http,
                    "I do not have permission to read message history in that channel.",
                )
                .await?;
                return Ok(EventHandled::Yes);
            }
        }

        if !cooldown_ready(ctx, msg, self.name(), COOLDOWN).await? {
            return Ok(EventHandled::Yes);
        }

        msg.reply(ctx.cache_http, "Processing...").await?;

        let started = Instant::now();
        let mut last_notice: Option<Instant> = None;
        let messages = fetch_history(ctx, channel_id, msg.channel_id, |scanned| {
            let elapsed = started.elapsed();
            let notice = match last_notice {
                None if elapsed > SLOW_SCAN => {
                    "This might take a while, I'll send progress updates.".to_owned()
                }
                Some(at) if at.elapsed() > PROGRESS_EVERY => format!(
                    "Checked {} messages so far... ({:.1}s)",
                    scanned,
                    elapsed.as_secs_f64()
                ),
                _ => return None,
            };
            last_notice = Some(Instant::now());
            Some(notice)
        })
        .await?;

        let mut submissions = Vec::new();
        for message in &messages {
            if let Some(submission) = submission(ctx, message).await? {
                submissions.push(submission);
            }
        }

        let ranked = rank(submissions, top);
        for reply in render(&ranked, top, messages.len(), guild_id, channel_id) {
            msg.channel_id.say(ctx.cache_http, reply).await?;
        }

        Ok(EventHandled::Yes)
    }
}
