//! Per-command, per-user rate limiting backed by the registry cache.

use crate::registry::{Key, Registry};
use serenity::all::{Timestamp, UserId};
use std::time::Duration;

#[derive(Debug, PartialEq, Eq)]
pub enum Cooldown {
    /// The command may run.  Its cooldown has been started.
    Ready,
    /// The user must wait.  `retry_at` is a unix timestamp in seconds.
    Active { retry_at: i64 },
}

fn key(command: &str, user_id: UserId) -> Key {
    Key::global(format!("cooldown/{}/{}", command, user_id))
}

fn whole_seconds(duration: Duration) -> Duration {
    let secs = duration.as_secs() + u64::from(duration.subsec_nanos() > 0);
    Duration::from_secs(secs)
}

/// Claim a cooldown slot for `user_id` running `command`.
pub async fn check(
    registry: &Registry,
    command: &str,
    user_id: UserId,
    duration: Duration,
) -> Cooldown {
    if duration.is_zero() {
        return Cooldown::Ready;
    }

    // Retry times are shown with one second precision, so the cooldown itself is whole seconds.
    let duration = whole_seconds(duration);
    let retry_at = Timestamp::now().unix_timestamp() + duration.as_secs() as i64;
    match registry
        .set_cache_if_absent(key(command, user_id), retry_at, duration)
        .await
    {
        None => Cooldown::Ready,
        Some(retry_at) => Cooldown::Active { retry_at },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn second_use_within_cooldown_is_rejected() {
        let registry = Registry::default();
        let user = UserId::new(1);
        let cooldown = Duration::from_secs(5);

        assert_eq!(check(&registry, "motd", user, cooldown).await, Cooldown::Ready);
        assert!(matches!(
            check(&registry, "motd", user, cooldown).await,
            Cooldown::Active { .. }
        ));

        tokio::time::advance(cooldown).await;
        assert!(matches!(
            check(&registry, "motd", user, cooldown).await,
            Cooldown::Active { .. }
        ));

        tokio::time::advance(Duration::from_millis(1)).await;
        assert_eq!(check(&registry, "motd", user, cooldown).await, Cooldown::Ready);
    }

    #[tokio::test(start_paused = true)]
    async fn fractional_cooldown_is_rounded_up_for_both_expiry_and_retry_time() {
        let registry = Registry::default();
        let user = UserId::new(1);
        let cooldown = Duration::from_millis(1_200);

        let before = Timestamp::now().unix_timestamp();
        check(&registry, "motd", user, cooldown).await;
        let Cooldown::Active { retry_at } = check(&registry, "motd", user, cooldown).await else {
            panic!("cooldown should be active");
        };
        assert!(retry_at >= before + 2 && retry_at <= Timestamp::now().unix_timestamp() + 2);

        // Still active past the fractional duration, free after the rounded one.
        tokio::time::advance(Duration::from_millis(1_500)).await;
        assert!(matches!(
            check(&registry, "motd", user, cooldown).await,
            Cooldown::Active { .. }
        ));
        tokio::time::advance(Duration::from_millis(501)).await;
        assert_eq!(check(&registry, "motd", user, cooldown).await, Cooldown::Ready);
    }

    #[test]
    fn whole_seconds_rounds_up() {
        assert_eq!(whole_seconds(Duration::from_secs(5)), Duration::from_secs(5));
        assert_eq!(whole_seconds(Duration::from_millis(1_001)), Duration::from_secs(2));
        assert_eq!(whole_seconds(Duration::from_millis(1)), Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn cooldowns_are_per_user_and_command() {
        let registry = Registry::default();
        let cooldown = Duration::from_secs(5);

        assert_eq!(check(&registry, "motd", UserId::new(1), cooldown).await, Cooldown::Ready);
        assert_eq!(check(&registry, "motd", UserId::new(2), cooldown).await, Cooldown::Ready);
        assert_eq!(check(&registry, "guilds", UserId::new(1), cooldown).await, Cooldown::Ready);
    }

    #[tokio::test(start_paused = true)]
    async fn active_cooldown_reports_original_expiry() {
        let registry = Registry::default();
        let user = UserId::new(1);
        let cooldown = Duration::from_secs(60);

        check(&registry, "guilds", user, cooldown).await;
        let Cooldown::Active { retry_at } = check(&registry, "guilds", user, cooldown).await else {
            panic!("cooldown should be active");
        };
        let now = Timestamp::now().unix_timestamp();
        assert!(retry_at > now && retry_at <= now + 60);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_cooldown_never_blocks() {
        let registry = Registry::default();
        for _ in 0..3 {
            assert_eq!(
                check(&registry, "ping", UserId::new(1), Duration::ZERO).await,
                Cooldown::Ready
            );
        }
        assert_eq!(registry.cache_len().await, 0);
    }
}
