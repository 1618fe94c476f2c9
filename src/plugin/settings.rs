use crate::{context::Context, event::*, helper::*, plugin::*};
use anyhow::Result;
use serenity::all::{Colour, CreateEmbed, UserId};
use std::time::Duration;

const COOLDOWN: Duration = Duration::from_secs(5);

/// View or update per-server bot settings (admins only)
pub struct Settings;

#[derive(Debug, PartialEq)]
enum SettingsCmd {
    Motd(String),
    AdminAdd(UserId),
    AdminRemove(UserId),
    AdminList,
}

impl SettingsCmd {
    /// Parse the arguments after `settings`.  On failure, returns what the user got wrong.
    fn parse(args: &[&str]) -> Result<Self, &'static str> {
        match args {
            ["motd"] => Err("Missing the new MOTD"),
            ["motd", motd @ ..] => Ok(Self::Motd(motd.join(" "))),
            ["admin", "list"] => Ok(Self::AdminList),
            ["admin", "add", user] => parse_user(user)
                .map(Self::AdminAdd)
                .ok_or("Invalid user, mention them or use their id"),
            ["admin", "remove", user] => parse_user(user)
                .map(Self::AdminRemove)
                .ok_or("Invalid user, mention them or use their id"),
            _ => Err("Invalid command"),
        }
    }
}

#[serenity::async_trait]
impl Plugin for Settings {
    fn name(&self) -> &'static str {
        "settings"
    }

    async fn usage(&self, ctx: &Context<'_>) -> Option<String> {
        let prefix = &ctx.cfg.read().await.general.command_prefix;
        Some(format!(
            "{0}{1} motd <text> - set the message of the day (admins only)\n\
             {0}{1} admin <add/remove> <@user> - manage bot admins (admins only)\n\
             {0}{1} admin list - list bot admins (admins only)",
            prefix,
            self.name()
        ))
    }

    async fn handle(&self, ctx: &Context<'_>, event: &Event) -> Result<EventHandled> {
        let Some((msg, guild_id, args)) = event.is_bot_cmd(ctx, self.name(), self.aliases()).await
        else {
            return Ok(EventHandled::No);
        };

        if !msg.is_from_admin(ctx).await? {
            return deny_non_admin(ctx, msg).await;
        }

        let cmd = match SettingsCmd::parse(&args) {
            Ok(cmd) => cmd,
            Err(problem) => {
                let prefix = ctx.cfg.read().await.general.command_prefix.clone();
                msg.reply(
                    ctx.cache_http,
                    format!("{}.  See `{}help`", problem, prefix),
                )
                .await?;
                return Ok(EventHandled::Yes);
            }
        };

        if !cooldown_ready(ctx, msg, self.name(), COOLDOWN).await? {
            return Ok(EventHandled::Yes);
        }

        let embed = match cmd {
            SettingsCmd::Motd(motd) => {
                ctx.settings
                    .update(guild_id, |s| s.motd = Some(motd.clone()))
                    .await?;
                CreateEmbed::new()
                    .title("MOTD updated")
                    .description(motd)
                    .colour(Colour::DARK_GREEN)
            }
            SettingsCmd::AdminAdd(user_id) => {
                let added = ctx
                    .settings
                    .update(guild_id, |s| s.admin_users.insert(user_id))
                    .await?;
                let description = if added {
                    format!("<@{}> is now a bot admin", user_id)
                } else {
                    format!("<@{}> is already a bot admin", user_id)
                };
                CreateEmbed::new()
                    .title("Admins")
                    .description(description)
                    .colour(Colour::DARK_GREEN)
            }
            SettingsCmd::AdminRemove(user_id) => {
                let removed = ctx
                    .settings
                    .update(guild_id, |s| s.admin_users.remove(&user_id))
                    .await?;
                let description = if removed {
                    format!("<@{}> is no longer a bot admin", user_id)
                } else {
                    format!("<@{}> was not a bot admin", user_id)
                };
                CreateEmbed::new()
                    .title("Admins")
                    .description(description)
                    .colour(Colour::DARK_GREEN)
            }
            SettingsCmd::AdminList => {
                let settings = ctx.settings.load(guild_id).await?;
                let mut lines: Vec<String> = settings
                    .admin_users
                    .iter()
                    .map(|id| format!("\u{2022} <@{}>", id))
                    .collect();
                lines.extend(
                    settings
                        .admin_roles
                        .iter()
                        .map(|id| format!("\u{2022} <@&{}> (role)", id)),
                );
                if lines.is_empty() {
                    lines.push("No admins set.".to_owned());
                }
                CreateEmbed::new()
                    .title("Admins")
                    .description(lines.join("\n"))
                    .colour(Colour::BLUE)
            }
        };

        reply_embed(ctx, msg, embed).await?;
        Ok(EventHandled::Yes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_subcommands() {
        assert_eq!(
            SettingsCmd::parse(&["motd", "Gotta", "catch", "em"]),
            Ok(SettingsCmd::Motd("Gotta catch em".to_owned()))
        );
        assert_eq!(
            SettingsCmd::parse(&["admin", "add", "<@!12>"]),
            Ok(SettingsCmd::AdminAdd(UserId::new(12)))
        );
        assert_eq!(
            SettingsCmd::parse(&["admin", "remove", "12"]),
            Ok(SettingsCmd::AdminRemove(UserId::new(12)))
        );
        assert_eq!(
            SettingsCmd::parse(&["admin", "list"]),
            Ok(SettingsCmd::AdminList)
        );
    }

    #[test]
    fn reports_what_is_wrong() {
        assert_eq!(SettingsCmd::parse(&["motd"]), Err("Missing the new MOTD"));
        assert!(SettingsCmd::parse(&["admin", "add", "<@&12>"]).is_err());
        assert_eq!(SettingsCmd::parse(&[]), Err("Invalid command"));
        assert_eq!(SettingsCmd::parse(&["admin"]), Err("Invalid command"));
    }
}
