use super::{Key, Scope};
use std::{any::Any, collections::HashMap, time::Duration};
use tokio::time::Instant;

/// Values with an absolute expiry.
///
/// An entry is live while `now <= set_at + ttl`.  Reads after that miss and evict the entry;
/// `sweep` evicts everything that has expired whether or not it was read.
#[derive(Default)]
pub(super) struct TtlCache {
    entries: HashMap<Key, CacheEntry>,
}

struct CacheEntry {
    value: Box<dyn Any + Send + Sync>,
    expires: Instant,
}

impl CacheEntry {
    fn is_live(&self, now: Instant) -> bool {
        now <= self.expires
    }
}

impl TtlCache {
    pub fn insert<T>(&mut self, key: Key, value: T, ttl: Duration, now: Instant)
    where
        T: Any + Send + Sync,
    {
        let entry = CacheEntry {
            value: Box::new(value),
            expires: now + ttl,
        };
        self.entries.insert(key, entry);
    }

    pub fn get<T>(&mut self, key: &Key, now: Instant) -> Option<T>
    where
        T: Any + Clone,
    {
        let entry = self.entries.get(key)?;
        if !entry.is_live(now) {
            self.entries.remove(key);
            return None;
        }
        entry.value.downcast_ref::<T>().cloned()
    }

    /// Returns the live value under `key`, or stores `value` and returns `None`.
    pub fn insert_if_absent<T>(&mut self, key: Key, value: T, ttl: Duration, now: Instant) -> Option<T>
    where
        T: Any + Clone + Send + Sync,
    {
        if let Some(existing) = self.entries.get(&key).filter(|entry| entry.is_live(now)) {
            if let Some(existing) = existing.value.downcast_ref::<T>() {
                return Some(existing.clone());
            }
        }
        self.insert(key, value, ttl, now);
        None
    }

    pub fn remove(&mut self, key: &Key) -> bool {
        self.entries.remove(key).is_some()
    }

    pub fn remove_scope(&mut self, scope: Scope) {
        self.entries.retain(|key, _| !key.is_in(scope));
    }

    /// Evict every expired entry.  Returns the number evicted.
    pub fn sweep(&mut self, now: Instant) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.is_live(now));
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
