//! Moves members who sit self-muted (or deafened) in voice for too long to the server's AFK
//! channel.
//!
//! Muted members are tracked per server in the registry.  While a server has anyone tracked, it
//! has an interval function on the shared timer checking who is overdue; the function removes
//! itself once nobody is left.

use crate::{
    context::Context,
    event::*,
    log_error, log_internal,
    logging::*,
    plugin::*,
    registry::{Key, Registry, WeakRegistry},
};
use anyhow::Result;
use serenity::all::{Cache, ChannelId, GuildId, Http, UserId};
use std::{collections::HashMap, future::Future, sync::Arc, time::Duration};
use tokio::time::Instant;

const MUTED_SLOT: &str = "afk_muted";
const CHECK_SLOT: &str = "afk_check";

pub struct AfkKicker;

#[derive(Clone, Copy, Debug, PartialEq)]
struct MutedSince {
    channel_id: ChannelId,
    since: Instant,
}

/// Self-muted members of one server
#[derive(Clone, Debug, Default)]
struct MutedMembers(HashMap<UserId, MutedSince>);

impl MutedMembers {
    /// Record a member's latest voice state.  Moving between channels while muted keeps the
    /// original mute time.
    fn track(&mut self, user_id: UserId, channel_id: Option<ChannelId>, muted: bool, now: Instant) {
        match channel_id {
            Some(channel_id) if muted => {
                let since = self.0.get(&user_id).map_or(now, |muted| muted.since);
                self.0.insert(user_id, MutedSince { channel_id, since });
            }
            _ => {
                self.0.remove(&user_id);
            }
        }
    }

    /// Stop tracking and return members muted for at least `limit` who are still in the channel
    /// they were last seen muted in.
    fn take_overdue(
        &mut self,
        now: Instant,
        limit: Duration,
        current_channel: impl Fn(UserId) -> Option<ChannelId>,
    ) -> Vec<UserId> {
        let overdue: Vec<UserId> = self
            .0
            .iter()
            .filter(|(user_id, muted)| {
                current_channel(**user_id) == Some(muted.channel_id)
                    && now.duration_since(muted.since) >= limit
            })
            .map(|(user_id, _)| *user_id)
            .collect();

        for user_id in &overdue {
            self.0.remove(user_id);
        }
        overdue
    }

    fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

fn muted_key(guild_id: GuildId) -> Key {
    Key::tenant(guild_id.get(), MUTED_SLOT)
}

fn check_key(guild_id: GuildId) -> Key {
    Key::tenant(guild_id.get(), CHECK_SLOT)
}

#[derive(Debug, PartialEq)]
enum MonitorChange {
    Started,
    Stopped,
    Unchanged,
}

/// Record a member's voice state.  Returns whether anyone in the guild is still tracked.
async fn track(
    registry: &Registry,
    guild_id: GuildId,
    user_id: UserId,
    channel_id: Option<ChannelId>,
    muted: bool,
) -> bool {
    registry
        .update_state_or_default(muted_key(guild_id), |members: &mut MutedMembers| {
            members.track(user_id, channel_id, muted, Instant::now());
            !members.is_empty()
        })
        .await
}

/// Register the guild's `check` while anyone is tracked, unregister it once nobody is.
async fn sync_monitor<F, Fut>(
    registry: &Registry,
    guild_id: GuildId,
    anyone_muted: bool,
    check: F,
) -> MonitorChange
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    let running = registry.has_interval_function(&check_key(guild_id)).await;
    if anyone_muted && !running {
        registry.set_interval_function(check_key(guild_id), check).await;
        MonitorChange::Started
    } else if !anyone_muted && running {
        forget_guild(registry, guild_id).await;
        MonitorChange::Stopped
    } else {
        MonitorChange::Unchanged
    }
}

async fn forget_guild(registry: &Registry, guild_id: GuildId) {
    registry.remove_interval_function(&check_key(guild_id)).await;
    registry.remove_state(&muted_key(guild_id)).await;
}

#[serenity::async_trait]
impl Plugin for AfkKicker {
    fn name(&self) -> &'static str {
        "afk_kicker"
    }

    async fn usage(&self, _ctx: &Context<'_>) -> Option<String> {
        None
    }

    async fn handle(&self, ctx: &Context<'_>, event: &Event) -> Result<EventHandled> {
        let Event::VoiceStateUpdate { old: _, new } = event else {
            return Ok(EventHandled::No);
        };
        let (enabled, limit) = {
            let cfg = ctx.cfg.read().await;
            (cfg.afk_kicker.enabled, cfg.afk_kicker.mute_limit())
        };
        let Some(guild_id) = new.guild_id else {
            return Ok(EventHandled::No);
        };
        if !enabled {
            return Ok(EventHandled::No);
        }

        let afk_channel_id = ctx
            .cache
            .guild(guild_id)
            .and_then(|guild| guild.afk_metadata.as_ref().map(|afk| afk.afk_channel_id));
        // Sitting in the AFK channel already is fine.
        let in_afk_channel = new.channel_id.is_some() && new.channel_id == afk_channel_id;
        let muted = (new.self_mute || new.self_deaf) && !in_afk_channel;

        let anyone_muted = track(ctx.registry, guild_id, new.user_id, new.channel_id, muted).await;

        let registry = ctx.registry.downgrade();
        let cache = ctx.cache.clone();
        let http = ctx.http.clone();
        let check = move || {
            check_guild(
                registry.clone(),
                cache.clone(),
                http.clone(),
                guild_id,
                limit,
            )
        };
        match sync_monitor(ctx.registry, guild_id, anyone_muted, check).await {
            MonitorChange::Started => {
                log_internal!("Started AFK monitor for {}", guild_id.color(ctx.http).await)
            }
            MonitorChange::Stopped => {
                log_internal!("Stopped AFK monitor for {}", guild_id.color(ctx.http).await)
            }
            MonitorChange::Unchanged => {}
        }

        // Other plugins may also want to act on voice state changes.
        Ok(EventHandled::No)
    }
}

async fn stop_monitor(registry: &Registry, http: &Arc<Http>, guild_id: GuildId) {
    forget_guild(registry, guild_id).await;
    log_internal!("Stopped AFK monitor for {}", guild_id.color(http).await);
}

/// What the cache knows about a server's voice channels.  `None` if the server is gone.
fn voice_snapshot(
    cache: &Cache,
    guild_id: GuildId,
) -> Option<(Option<ChannelId>, HashMap<UserId, ChannelId>)> {
    let guild = cache.guild(guild_id)?;
    let afk_channel_id = guild.afk_metadata.as_ref().map(|afk| afk.afk_channel_id);
    let channels = guild
        .voice_states
        .iter()
        .filter_map(|(user_id, state)| state.channel_id.map(|channel_id| (*user_id, channel_id)))
        .collect();
    Some((afk_channel_id, channels))
}

/// Interval function: move overdue members of one server to its AFK channel.
async fn check_guild(
    registry: WeakRegistry,
    cache: Arc<Cache>,
    http: Arc<Http>,
    guild_id: GuildId,
    limit: Duration,
) -> Result<()> {
    let Some(registry) = registry.upgrade() else {
        return Ok(());
    };
    let Some((afk_channel_id, voice_channels)) = voice_snapshot(&cache, guild_id) else {
        stop_monitor(&registry, &http, guild_id).await;
        return Ok(());
    };
    let Some(afk_channel_id) = afk_channel_id else {
        // Nowhere to move people to.  Keep tracking in case one gets configured.
        return Ok(());
    };

    let now = Instant::now();
    let Some((overdue, anyone_left)) = registry
        .update_state(&muted_key(guild_id), |members: &mut MutedMembers| {
            let overdue = members.take_overdue(now, limit, |user_id| {
                voice_channels.get(&user_id).copied()
            });
            (overdue, !members.is_empty())
        })
        .await
    else {
        stop_monitor(&registry, &http, guild_id).await;
        return Ok(());
    };

    for user_id in overdue {
        match guild_id.move_member(&http, user_id, afk_channel_id).await {
            Ok(_) => log_internal!(
                "Moved {} to AFK in {} (muted too long)",
                user_id.color(&http).await,
                guild_id.color(&http).await,
            ),
            Err(err) => log_error!(
                "Could not move {} to AFK in {}: {}",
                user_id.color(&http).await,
                guild_id.color(&http).await,
                err,
            ),
        }
    }

    if !anyone_left {
        stop_monitor(&registry, &http, guild_id).await;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIMIT: Duration = Duration::from_secs(20 * 60);

    fn user(id: u64) -> UserId {
        UserId::new(id)
    }

    fn channel(id: u64) -> ChannelId {
        ChannelId::new(id)
    }

    #[test]
    fn unmuting_or_leaving_stops_tracking() {
        let now = Instant::now();
        let mut members = MutedMembers::default();

        members.track(user(1), Some(channel(10)), true, now);
        members.track(user(2), Some(channel(10)), true, now);
        assert_eq!(members.0.len(), 2);

        members.track(user(1), Some(channel(10)), false, now);
        members.track(user(2), None, true, now);
        assert!(members.is_empty());
    }

    #[test]
    fn switching_channels_keeps_mute_time() {
        let start = Instant::now();
        let mut members = MutedMembers::default();

        members.track(user(1), Some(channel(10)), true, start);
        members.track(user(1), Some(channel(11)), true, start + LIMIT / 2);

        let muted = members.0[&user(1)];
        assert_eq!(muted.channel_id, channel(11));
        assert_eq!(muted.since, start);
    }

    #[test]
    fn only_overdue_members_in_their_channel_are_taken() {
        let start = Instant::now();
        let mut members = MutedMembers::default();

        members.track(user(1), Some(channel(10)), true, start);
        members.track(user(2), Some(channel(10)), true, start + LIMIT / 2);
        members.track(user(3), Some(channel(10)), true, start);

        // User 3 has since moved without a voice update reaching us.
        let current = |user_id: UserId| match user_id.get() {
            3 => Some(channel(12)),
            _ => Some(channel(10)),
        };

        let overdue = members.take_overdue(start + LIMIT, LIMIT, current);
        assert_eq!(overdue, [user(1)]);
        assert_eq!(members.0.len(), 2);

        let overdue = members.take_overdue(start + LIMIT * 2, LIMIT, current);
        assert_eq!(overdue, [user(2)]);
        assert!(!members.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn monitor_runs_exactly_while_someone_is_muted() {
        let registry = Registry::default();
        let guild_id = GuildId::new(5);
        let idle = || async { Ok::<(), anyhow::Error>(()) };

        let anyone = track(&registry, guild_id, user(1), Some(channel(10)), true).await;
        assert_eq!(
            sync_monitor(&registry, guild_id, anyone, idle).await,
            MonitorChange::Started
        );
        assert!(registry.has_interval_function(&check_key(guild_id)).await);
        assert!(registry.is_timer_running().await);

        // A second muted member needs no second monitor.
        let anyone = track(&registry, guild_id, user(2), Some(channel(10)), true).await;
        assert_eq!(
            sync_monitor(&registry, guild_id, anyone, idle).await,
            MonitorChange::Unchanged
        );
        assert_eq!(registry.interval_function_count().await, 1);

        track(&registry, guild_id, user(1), Some(channel(10)), false).await;
        let anyone = track(&registry, guild_id, user(2), None, true).await;
        assert!(!anyone);
        assert_eq!(
            sync_monitor(&registry, guild_id, anyone, idle).await,
            MonitorChange::Stopped
        );
        assert!(!registry.has_interval_function(&check_key(guild_id)).await);
        assert!(!registry.has_state(&muted_key(guild_id)).await);
        assert!(!registry.is_timer_running().await);
    }

    #[tokio::test(start_paused = true)]
    async fn monitors_are_per_guild() {
        let registry = Registry::default();
        let (first, second) = (GuildId::new(5), GuildId::new(6));
        let idle = || async { Ok::<(), anyhow::Error>(()) };

        for guild_id in [first, second] {
            let anyone = track(&registry, guild_id, user(1), Some(channel(10)), true).await;
            sync_monitor(&registry, guild_id, anyone, idle).await;
        }
        let anyone = track(&registry, first, user(1), Some(channel(10)), false).await;
        sync_monitor(&registry, first, anyone, idle).await;

        assert!(!registry.has_interval_function(&check_key(first)).await);
        assert!(registry.has_interval_function(&check_key(second)).await);
        assert!(registry.is_timer_running().await);
    }

    #[tokio::test(start_paused = true)]
    async fn tracking_lives_in_the_guild_scope() {
        let registry = Registry::default();
        let guild_id = GuildId::new(5);

        let anyone_muted = registry
            .update_state_or_default(muted_key(guild_id), |members: &mut MutedMembers| {
                members.track(user(1), Some(channel(10)), true, Instant::now());
                !members.is_empty()
            })
            .await;
        assert!(anyone_muted);

        registry
            .remove_scope(crate::registry::Scope::Tenant(guild_id.get()))
            .await;
        assert!(!registry.has_state(&muted_key(guild_id)).await);
    }
}
