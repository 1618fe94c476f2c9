//! The Serenity crate we're using for the Discord API is designed around callbacks to handle
//! events.  However, this does not mesh well with our plugin framework here.  To resolve this,
//! the handler translates the callbacks into a distinct Event enum.

use crate::{context::Context, log_error};
use serenity::all::{Guild, GuildId, Message, Ready, UnavailableGuild, VoiceState};

/// A Discord event
pub enum Event {
    Ready(Ready),
    Message(Message),
    VoiceStateUpdate {
        old: Option<VoiceState>,
        new: VoiceState,
    },
    GuildCreate {
        guild: Guild,
    },
    GuildDelete {
        incomplete: UnavailableGuild,
    },
}

impl Event {
    // When an event occurs, iterate over all the plugins to see if any can/should handle it.
    pub async fn handle(self, ctx: Context<'_>) {
        for plugin in crate::plugin::plugins() {
            match plugin.handle(&ctx, &self).await {
                Ok(EventHandled::Yes) => return,
                Ok(EventHandled::No) => continue,
                Err(err) => log_error!("Error in plugin {}: {:#}", plugin.name(), err),
            }
        }
    }

    // Check if a message should be interpreted as a bot command.
    //
    // These are prefixed with the configured command prefix, e. g. `?cmd foo bar baz`.  Only
    // messages sent in a guild count.
    pub async fn is_bot_cmd(
        &self,
        ctx: &Context<'_>,
        cmd: &str,
        aliases: &[&str],
    ) -> Option<(&Message, GuildId, Vec<&str>)> {
        let Event::Message(msg) = self else {
            return None;
        };
        let guild_id = msg.guild_id?;

        let prefix = ctx.cfg.read().await.general.command_prefix.clone();
        let (name, args) = parse_command(&prefix, &msg.content)?;

        if name == cmd || aliases.contains(&name.as_str()) {
            Some((msg, guild_id, args))
        } else {
            None
        }
    }
}

/// Split `<prefix><name> args...` into a lowercased name and its arguments.
fn parse_command<'a>(prefix: &str, content: &'a str) -> Option<(String, Vec<&'a str>)> {
    let mut terms = content.strip_prefix(prefix)?.split_whitespace();
    let name = terms.next()?.to_lowercase();
    Some((name, terms.collect()))
}

pub enum EventHandled {
    Yes,
    No,
}
