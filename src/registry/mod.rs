//! Process-wide runtime state shared by every plugin.
//!
//! Three stores live behind one handle:
//! - named state slots that live until removed,
//! - a TTL cache with lazy (on read) and eager (on tick) eviction,
//! - periodic interval functions multiplexed onto a single shared timer.
//!
//! The timer only exists while at least one interval function is registered.  Every tick first
//! sweeps the cache, then runs each registered function once, in registration order.

mod cache;
mod key;
mod ticker;

pub use key::{Key, Scope};
pub use ticker::{IntervalFn, IntervalFuture};

use anyhow::Result;
use cache::TtlCache;
use std::{
    any::Any,
    collections::HashMap,
    future::Future,
    sync::{Arc, Weak},
    time::Duration,
};
use ticker::Ticker;
use tokio::{
    sync::Mutex,
    task::JoinHandle,
    time::{Instant, MissedTickBehavior},
};

pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(5_000);
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_millis(60_000);

/// `tokio::time::interval` rejects a zero period.
const MIN_TICK_INTERVAL: Duration = Duration::from_millis(1);

/// Cheaply cloneable handle to the shared registry.
#[derive(Clone)]
pub struct Registry {
    inner: Arc<Inner>,
}

/// Non-owning handle.  Interval functions should capture this rather than a `Registry`, otherwise
/// the registry keeps itself alive through its own callbacks.
#[derive(Clone)]
pub struct WeakRegistry {
    inner: Weak<Inner>,
}

struct Inner {
    states: Mutex<HashMap<Key, Box<dyn Any + Send + Sync>>>,
    cache: Mutex<TtlCache>,
    ticker: Mutex<Ticker>,
    default_ttl: Duration,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new(DEFAULT_TICK_INTERVAL, DEFAULT_CACHE_TTL)
    }
}

impl Registry {
    pub fn new(tick_interval: Duration, default_ttl: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                states: Mutex::new(HashMap::new()),
                cache: Mutex::new(TtlCache::default()),
                ticker: Mutex::new(Ticker::new(tick_interval.max(MIN_TICK_INTERVAL))),
                default_ttl,
            }),
        }
    }

    pub fn downgrade(&self) -> WeakRegistry {
        WeakRegistry {
            inner: Arc::downgrade(&self.inner),
        }
    }

    pub fn default_ttl(&self) -> Duration {
        self.inner.default_ttl
    }

    // ========== State ==========

    pub async fn set_state<T>(&self, key: Key, value: T)
    where
        T: Any + Send + Sync,
    {
        self.inner.states.lock().await.insert(key, Box::new(value));
    }

    /// Stores `value` only if nothing is stored under `key`.  Any stored value counts as set,
    /// including `false` and `0`.  Returns whether `value` was stored.
    pub async fn set_state_if_not_set<T>(&self, key: Key, value: T) -> bool
    where
        T: Any + Send + Sync,
    {
        use std::collections::hash_map::Entry::*;
        match self.inner.states.lock().await.entry(key) {
            Occupied(_) => false,
            Vacant(vacant) => {
                vacant.insert(Box::new(value));
                true
            }
        }
    }

    /// `None` if the slot is empty or holds a different type.
    pub async fn get_state<T>(&self, key: &Key) -> Option<T>
    where
        T: Any + Clone,
    {
        self.inner
            .states
            .lock()
            .await
            .get(key)
            .and_then(|value| value.downcast_ref::<T>())
            .cloned()
    }

    /// Mutate a slot in place.  `None` if the slot is empty or holds a different type.
    pub async fn update_state<T, R>(&self, key: &Key, f: impl FnOnce(&mut T) -> R) -> Option<R>
    where
        T: Any,
    {
        self.inner
            .states
            .lock()
            .await
            .get_mut(key)
            .and_then(|value| value.downcast_mut::<T>())
            .map(f)
    }

    /// Mutate a slot in place, first storing `T::default()` if the slot is empty or holds a
    /// different type.
    pub async fn update_state_or_default<T, R>(&self, key: Key, f: impl FnOnce(&mut T) -> R) -> R
    where
        T: Any + Default + Send + Sync,
    {
        let mut states = self.inner.states.lock().await;
        let slot = states
            .entry(key)
            .or_insert_with(|| Box::new(T::default()) as Box<dyn Any + Send + Sync>);
        if let Some(value) = slot.downcast_mut::<T>() {
            return f(value);
        }

        let mut value = T::default();
        let result = f(&mut value);
        *slot = Box::new(value);
        result
    }

    pub async fn has_state(&self, key: &Key) -> bool {
        self.inner.states.lock().await.contains_key(key)
    }

    /// Idempotent.  Returns whether anything was removed.
    pub async fn remove_state(&self, key: &Key) -> bool {
        self.inner.states.lock().await.remove(key).is_some()
    }

    // ========== Cache ==========

    pub async fn set_cache<T>(&self, key: Key, value: T, ttl: Duration)
    where
        T: Any + Send + Sync,
    {
        let now = Instant::now();
        self.inner.cache.lock().await.insert(key, value, ttl, now);
    }

    /// `set_cache` with the registry's default TTL.
    pub async fn set_cache_default<T>(&self, key: Key, value: T)
    where
        T: Any + Send + Sync,
    {
        self.set_cache(key, value, self.inner.default_ttl).await;
    }

    /// `None` if the entry is missing, expired (and then evicted) or holds a different type.
    pub async fn get_cache<T>(&self, key: &Key) -> Option<T>
    where
        T: Any + Clone,
    {
        let now = Instant::now();
        self.inner.cache.lock().await.get(key, now)
    }

    /// Atomically returns the live value under `key`, or stores `value` and returns `None`.
    pub async fn set_cache_if_absent<T>(&self, key: Key, value: T, ttl: Duration) -> Option<T>
    where
        T: Any + Clone + Send + Sync,
    {
        let now = Instant::now();
        self.inner
            .cache
            .lock()
            .await
            .insert_if_absent(key, value, ttl, now)
    }

    pub async fn remove_cache(&self, key: &Key) -> bool {
        self.inner.cache.lock().await.remove(key)
    }

    /// Evict every expired entry.  Runs automatically at the start of every tick.
    pub async fn clean_cache(&self) -> usize {
        let now = Instant::now();
        self.inner.cache.lock().await.sweep(now)
    }

    /// Number of entries physically stored, expired or not.
    pub async fn cache_len(&self) -> usize {
        self.inner.cache.lock().await.len()
    }

    // ========== Interval functions ==========

    /// Period used the next time the shared timer starts.  A running timer keeps its period.
    pub async fn set_interval(&self, period: Duration) {
        self.inner
            .ticker
            .lock()
            .await
            .set_period(period.max(MIN_TICK_INTERVAL));
    }

    pub async fn interval(&self) -> Duration {
        self.inner.ticker.lock().await.period()
    }

    /// Register `func` under `key`, replacing any earlier registration.  Starts the shared timer if
    /// it is not running.
    pub async fn set_interval_function<F, Fut>(&self, key: Key, func: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let func: IntervalFn = Arc::new(move || -> IntervalFuture { Box::pin(func()) });

        let mut ticker = self.inner.ticker.lock().await;
        ticker.insert(key.clone(), func);
        tracing::debug!(%key, count = ticker.len(), "Registered interval function");

        if !ticker.is_running() {
            let period = ticker.period();
            ticker.start(spawn_timer(self.downgrade(), period));
            tracing::debug!(?period, "Started shared timer");
        }
    }

    /// Unregister `key`.  Stops the shared timer if nothing is left.
    pub async fn remove_interval_function(&self, key: &Key) -> bool {
        let mut ticker = self.inner.ticker.lock().await;
        let removed = ticker.remove(key);
        if removed {
            tracing::debug!(%key, count = ticker.len(), "Removed interval function");
        }
        stop_if_idle(&mut ticker);
        removed
    }

    pub async fn has_interval_function(&self, key: &Key) -> bool {
        self.inner.ticker.lock().await.contains(key)
    }

    pub async fn interval_function_count(&self) -> usize {
        self.inner.ticker.lock().await.len()
    }

    pub async fn is_timer_running(&self) -> bool {
        self.inner.ticker.lock().await.is_running()
    }

    /// One timer firing: sweep the cache, then run every registered interval function.
    ///
    /// Functions run one after another on a snapshot of the registrations.  Each runs in its own
    /// task, so an error or a panic is logged and does not reach the other functions or the timer.
    pub async fn tick(&self) {
        let evicted = self.clean_cache().await;
        let functions = self.inner.ticker.lock().await.snapshot();

        tracing::debug!(
            functions = functions.len(),
            evicted,
            "Running interval functions"
        );

        for (key, func) in functions {
            tracing::trace!(%key, "Running interval function");
            match tokio::spawn(async move { func().await }).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => tracing::warn!(%key, "Interval function failed: {err:#}"),
                Err(err) if err.is_panic() => {
                    tracing::error!(%key, "Interval function panicked")
                }
                Err(err) => tracing::warn!(%key, "Interval function cancelled: {err}"),
            }
        }
    }

    // ========== Tenants ==========

    /// Drop every state slot, cache entry and interval function owned by `scope`.
    pub async fn remove_scope(&self, scope: Scope) {
        self.inner
            .states
            .lock()
            .await
            .retain(|key, _| !key.is_in(scope));
        self.inner.cache.lock().await.remove_scope(scope);

        let mut ticker = self.inner.ticker.lock().await;
        let removed = ticker.remove_scope(scope);
        tracing::debug!(?scope, interval_functions = removed, "Removed scope");
        stop_if_idle(&mut ticker);
    }
}

impl WeakRegistry {
    pub fn upgrade(&self) -> Option<Registry> {
        self.inner.upgrade().map(|inner| Registry { inner })
    }
}

fn stop_if_idle(ticker: &mut Ticker) {
    if ticker.is_empty() && ticker.is_running() {
        ticker.stop();
        tracing::debug!("Stopped shared timer");
    }
}

/// The shared timer.  First fires one `period` after starting.
///
/// Each tick runs in its own task: an interval function that unregisters the last function aborts
/// this timer task, but not the tick it is running in.  A tick never starts while the previous
/// one is still running; that firing is skipped instead.
fn spawn_timer(registry: WeakRegistry, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut previous: Option<JoinHandle<()>> = None;

        loop {
            interval.tick().await;
            if previous.as_ref().is_some_and(|tick| !tick.is_finished()) {
                tracing::debug!("Previous tick still running, skipping this one");
                continue;
            }
            let Some(registry) = registry.upgrade() else {
                break;
            };
            previous = Some(tokio::spawn(async move { registry.tick().await }));
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const PERIOD: Duration = Duration::from_millis(100);

    fn registry() -> Registry {
        Registry::new(PERIOD, DEFAULT_CACHE_TTL)
    }

    /// Interval function that records its name into `log` each time it runs.
    async fn register_logger(
        registry: &Registry,
        log: &Arc<std::sync::Mutex<Vec<&'static str>>>,
        name: &'static str,
    ) {
        let log = log.clone();
        registry
            .set_interval_function(Key::global(name), move || {
                let log = log.clone();
                async move {
                    log.lock().unwrap().push(name);
                    Ok(())
                }
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn state_upsert_and_idempotent_remove() {
        let registry = registry();
        let key = Key::global("motd");

        registry.set_state(key.clone(), 5u32).await;
        registry.set_state(key.clone(), 5u32).await;
        assert_eq!(registry.get_state::<u32>(&key).await, Some(5));

        assert!(registry.remove_state(&key).await);
        assert!(!registry.remove_state(&key).await);
        assert_eq!(registry.get_state::<u32>(&key).await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn set_if_not_set_treats_falsy_values_as_set() {
        let registry = registry();
        let key = Key::tenant(7u64, "afk_running");

        assert!(registry.set_state_if_not_set(key.clone(), false).await);
        assert!(!registry.set_state_if_not_set(key.clone(), true).await);
        assert_eq!(registry.get_state::<bool>(&key).await, Some(false));
    }

    #[tokio::test(start_paused = true)]
    async fn update_state_in_place() {
        let registry = registry();
        let key = Key::global("queue");

        assert_eq!(registry.update_state::<Vec<u8>, _>(&key, |q| q.len()).await, None);

        let len = registry
            .update_state_or_default::<Vec<u8>, _>(key.clone(), |q| {
                q.push(1);
                q.len()
            })
            .await;
        assert_eq!(len, 1);

        registry.update_state::<Vec<u8>, _>(&key, |q| q.push(2)).await;
        assert_eq!(registry.get_state::<Vec<u8>>(&key).await, Some(vec![1, 2]));
    }

    #[tokio::test(start_paused = true)]
    async fn cache_expires_after_ttl() {
        let registry = registry();
        let key = Key::global("species");

        registry
            .set_cache(key.clone(), "pikachu", Duration::from_millis(100))
            .await;
        assert_eq!(registry.get_cache::<&str>(&key).await, Some("pikachu"));

        tokio::time::advance(Duration::from_millis(100)).await;
        assert_eq!(registry.get_cache::<&str>(&key).await, Some("pikachu"));

        tokio::time::advance(Duration::from_millis(1)).await;
        assert_eq!(registry.get_cache::<&str>(&key).await, None);
        assert_eq!(registry.cache_len().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn default_ttl_is_applied() {
        let registry = Registry::new(PERIOD, Duration::from_millis(50));
        let key = Key::global("short");

        registry.set_cache_default(key.clone(), 1u8).await;
        tokio::time::advance(Duration::from_millis(49)).await;
        assert_eq!(registry.get_cache::<u8>(&key).await, Some(1));
        tokio::time::advance(Duration::from_millis(2)).await;
        assert_eq!(registry.get_cache::<u8>(&key).await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn tick_sweeps_unread_expired_entries() {
        let registry = registry();
        registry
            .set_cache(Key::global("a"), (), Duration::from_millis(10))
            .await;
        registry
            .set_cache(Key::global("b"), (), Duration::from_secs(60))
            .await;

        tokio::time::advance(Duration::from_millis(20)).await;
        registry.tick().await;

        assert_eq!(registry.cache_len().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn timer_follows_registration_set() {
        let registry = registry();
        let key = Key::global("a");
        assert!(!registry.is_timer_running().await);

        registry.set_interval_function(key.clone(), || async { Ok(()) }).await;
        assert!(registry.is_timer_running().await);

        assert!(registry.remove_interval_function(&key).await);
        assert!(!registry.is_timer_running().await);

        // A later registration starts it again.
        registry.set_interval_function(key.clone(), || async { Ok(()) }).await;
        assert!(registry.is_timer_running().await);
    }

    #[tokio::test(start_paused = true)]
    async fn every_function_runs_once_per_tick_in_order() {
        let registry = registry();
        let log = Arc::new(std::sync::Mutex::new(Vec::new()));
        for name in ["a", "b", "c"] {
            register_logger(&registry, &log, name).await;
        }

        tokio::time::sleep(PERIOD + Duration::from_millis(1)).await;
        assert_eq!(*log.lock().unwrap(), ["a", "b", "c"]);

        tokio::time::sleep(PERIOD).await;
        assert_eq!(log.lock().unwrap().len(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn self_removal_does_not_skip_siblings() {
        let registry = registry();
        let log = Arc::new(std::sync::Mutex::new(Vec::new()));

        register_logger(&registry, &log, "a").await;
        {
            let weak = registry.downgrade();
            let log = log.clone();
            registry
                .set_interval_function(Key::global("once"), move || {
                    let weak = weak.clone();
                    let log = log.clone();
                    async move {
                        log.lock().unwrap().push("once");
                        if let Some(registry) = weak.upgrade() {
                            registry.remove_interval_function(&Key::global("once")).await;
                        }
                        Ok(())
                    }
                })
                .await;
        }
        register_logger(&registry, &log, "c").await;

        registry.tick().await;
        registry.tick().await;

        assert_eq!(*log.lock().unwrap(), ["a", "once", "c", "a", "c"]);
        assert!(registry.is_timer_running().await);
    }

    #[tokio::test(start_paused = true)]
    async fn removing_last_function_from_inside_a_tick_stops_timer() {
        let registry = registry();
        let runs = Arc::new(AtomicUsize::new(0));
        let weak = registry.downgrade();
        let counter = runs.clone();

        registry
            .set_interval_function(Key::global("only"), move || {
                let weak = weak.clone();
                let counter = counter.clone();
                async move {
                    if let Some(registry) = weak.upgrade() {
                        registry.remove_interval_function(&Key::global("only")).await;
                    }
                    // Still runs after the timer task was aborted.
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            })
            .await;

        tokio::time::sleep(PERIOD * 3).await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(!registry.is_timer_running().await);
    }

    #[tokio::test(start_paused = true)]
    async fn failures_are_isolated() {
        let registry = registry();
        let log = Arc::new(std::sync::Mutex::new(Vec::new()));

        register_logger(&registry, &log, "before").await;
        registry
            .set_interval_function(Key::global("errors"), || async {
                Err(anyhow!("voice connection already destroyed"))
            })
            .await;
        registry
            .set_interval_function(Key::global("panics"), || async {
                panic!("interval function bug");
            })
            .await;
        register_logger(&registry, &log, "after").await;

        tokio::time::sleep(PERIOD + Duration::from_millis(1)).await;
        assert_eq!(*log.lock().unwrap(), ["before", "after"]);
        assert!(registry.is_timer_running().await);

        tokio::time::sleep(PERIOD).await;
        assert_eq!(log.lock().unwrap().len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn replacing_a_function_does_not_run_both() {
        let registry = registry();
        let runs = Arc::new(AtomicUsize::new(0));

        for increment in [1, 10] {
            let runs = runs.clone();
            registry
                .set_interval_function(Key::global("counter"), move || {
                    let runs = runs.clone();
                    async move {
                        runs.fetch_add(increment, Ordering::SeqCst);
                        Ok(())
                    }
                })
                .await;
        }

        registry.tick().await;
        assert_eq!(runs.load(Ordering::SeqCst), 10);
        assert_eq!(registry.interval_function_count().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn new_period_applies_on_next_start() {
        let registry = registry();
        let runs = Arc::new(AtomicUsize::new(0));
        let register = |registry: Registry, runs: Arc<AtomicUsize>| async move {
            registry
                .set_interval_function(Key::global("count"), move || {
                    let runs = runs.clone();
                    async move {
                        runs.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    }
                })
                .await;
        };

        register(registry.clone(), runs.clone()).await;
        registry.set_interval(PERIOD * 10).await;

        // Running timer keeps the old period.
        tokio::time::sleep(PERIOD + Duration::from_millis(1)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        registry.remove_interval_function(&Key::global("count")).await;
        register(registry.clone(), runs.clone()).await;

        tokio::time::sleep(PERIOD * 5).await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        tokio::time::sleep(PERIOD * 6).await;
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_function_never_overlaps_itself() {
        let registry = registry();
        let running = Arc::new(AtomicUsize::new(0));
        let most_at_once = Arc::new(AtomicUsize::new(0));
        let runs = Arc::new(AtomicUsize::new(0));

        {
            let (running, most_at_once, runs) = (running.clone(), most_at_once.clone(), runs.clone());
            registry
                .set_interval_function(Key::global("slow"), move || {
                    let (running, most_at_once, runs) =
                        (running.clone(), most_at_once.clone(), runs.clone());
                    async move {
                        let now_running = running.fetch_add(1, Ordering::SeqCst) + 1;
                        most_at_once.fetch_max(now_running, Ordering::SeqCst);
                        // Takes longer than two periods.
                        tokio::time::sleep(PERIOD * 5 / 2).await;
                        running.fetch_sub(1, Ordering::SeqCst);
                        runs.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    }
                })
                .await;
        }

        tokio::time::sleep(PERIOD * 10).await;
        assert_eq!(most_at_once.load(Ordering::SeqCst), 1);
        assert!(runs.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test(start_paused = true)]
    async fn remove_scope_drops_tenant_everything() {
        let registry = registry();
        let guild = 99u64;

        registry.set_state(Key::tenant(guild, "afk_muted"), 1u8).await;
        registry.set_state(Key::global("client"), 2u8).await;
        registry
            .set_cache_default(Key::tenant(guild, "settings"), 3u8)
            .await;
        registry
            .set_interval_function(Key::tenant(guild, "afk_check"), || async { Ok(()) })
            .await;

        registry.remove_scope(Scope::Tenant(guild)).await;

        assert!(!registry.has_state(&Key::tenant(guild, "afk_muted")).await);
        assert!(registry.has_state(&Key::global("client")).await);
        assert_eq!(
            registry.get_cache::<u8>(&Key::tenant(guild, "settings")).await,
            None
        );
        assert_eq!(registry.interval_function_count().await, 0);
        assert!(!registry.is_timer_running().await);
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_the_registry_stops_the_timer() {
        let registry = registry();
        let weak = registry.downgrade();
        registry
            .set_interval_function(Key::global("a"), || async { Ok(()) })
            .await;

        drop(registry);
        tokio::time::sleep(PERIOD * 2).await;
        assert!(weak.upgrade().is_none());
    }
}
