use super::{Key, Scope};
use anyhow::Result;
use std::{future::Future, pin::Pin, sync::Arc, time::Duration};
use tokio::task::JoinHandle;

pub type IntervalFuture = Pin<Box<dyn Future<Output = Result<()>> + Send + 'static>>;

/// A zero-argument periodic callback.
///
/// Runs once per tick.  Ticks do not overlap, so a callback slower than the period is never
/// running twice at the same time; the firings it overruns are skipped.
pub type IntervalFn = Arc<dyn Fn() -> IntervalFuture + Send + Sync + 'static>;

/// Registered interval functions plus the handle of the shared timer driving them.
///
/// `timer` is `Some` exactly when `functions` is non-empty.  The registry keeps that invariant by
/// starting the timer on the first registration and stopping it on the last removal.
pub(super) struct Ticker {
    /// Registration order.  Re-registering a key keeps its slot.
    functions: Vec<(Key, IntervalFn)>,
    period: Duration,
    timer: Option<JoinHandle<()>>,
}

impl Ticker {
    pub fn new(period: Duration) -> Self {
        Self {
            functions: Vec::new(),
            period,
            timer: None,
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn set_period(&mut self, period: Duration) {
        self.period = period;
    }

    /// Returns true if this was the first registration.
    pub fn insert(&mut self, key: Key, func: IntervalFn) -> bool {
        let was_empty = self.functions.is_empty();
        match self.functions.iter_mut().find(|(k, _)| *k == key) {
            Some((_, existing)) => *existing = func,
            None => self.functions.push((key, func)),
        }
        was_empty
    }

    pub fn remove(&mut self, key: &Key) -> bool {
        let before = self.functions.len();
        self.functions.retain(|(k, _)| k != key);
        before != self.functions.len()
    }

    pub fn remove_scope(&mut self, scope: Scope) -> usize {
        let before = self.functions.len();
        self.functions.retain(|(k, _)| !k.is_in(scope));
        before - self.functions.len()
    }

    pub fn contains(&self, key: &Key) -> bool {
        self.functions.iter().any(|(k, _)| k == key)
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    /// Copy of the current registrations, so callbacks may (un)register while a tick iterates.
    pub fn snapshot(&self) -> Vec<(Key, IntervalFn)> {
        self.functions.clone()
    }

    pub fn is_running(&self) -> bool {
        self.timer.as_ref().is_some_and(|timer| !timer.is_finished())
    }

    pub fn start(&mut self, timer: JoinHandle<()>) {
        if let Some(old) = self.timer.replace(timer) {
            old.abort();
        }
    }

    pub fn stop(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

impl Drop for Ticker {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop() -> IntervalFn {
        Arc::new(|| Box::pin(async { Ok(()) }))
    }

    fn names(ticker: &Ticker) -> Vec<String> {
        ticker
            .snapshot()
            .into_iter()
            .map(|(key, _)| key.to_string())
            .collect()
    }

    #[test]
    fn first_insert_is_reported() {
        let mut ticker = Ticker::new(Duration::from_secs(5));
        assert!(ticker.insert(Key::global("a"), noop()));
        assert!(!ticker.insert(Key::global("b"), noop()));
        assert_eq!(ticker.len(), 2);
    }

    #[test]
    fn reinsert_keeps_registration_order() {
        let mut ticker = Ticker::new(Duration::from_secs(5));
        ticker.insert(Key::global("a"), noop());
        ticker.insert(Key::global("b"), noop());
        ticker.insert(Key::global("c"), noop());
        ticker.insert(Key::global("a"), noop());

        assert_eq!(names(&ticker), ["global/a", "global/b", "global/c"]);
    }

    #[test]
    fn remove_scope_leaves_other_tenants() {
        let mut ticker = Ticker::new(Duration::from_secs(5));
        ticker.insert(Key::tenant(1u64, "afk_check"), noop());
        ticker.insert(Key::tenant(2u64, "afk_check"), noop());
        ticker.insert(Key::global("sweep"), noop());

        assert_eq!(ticker.remove_scope(Scope::Tenant(1)), 1);
        assert_eq!(names(&ticker), ["2/afk_check", "global/sweep"]);
        assert!(!ticker.remove(&Key::tenant(1u64, "afk_check")));
    }
}
