use crate::domain::ports::CacheHandle;
use crate::error::Result;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, warn};

/// Key layout shared by every service that touches the cache.
pub mod keys {
    use crate::domain::Page;
    use crate::domain::cylinder::{CylinderFilter, CylinderId};
    use crate::domain::order::OrderId;

    pub const CYLINDER_LIST: &str = "cylinder:list:";

    pub fn cylinder(id: CylinderId) -> String {
        format!("cylinder:{id}")
    }

    pub fn cylinder_list(filter: &CylinderFilter, page: Page) -> String {
        format!(
            "{CYLINDER_LIST}{}:{}:{}",
            filter.cache_key(),
            page.offset,
            page.limit
        )
    }

    pub fn order(id: OrderId) -> String {
        format!("order:{id}")
    }

    pub fn delivery(id: OrderId) -> String {
        format!("delivery:{id}")
    }
}

/// Write generations per cache key.
///
/// Keys hash onto a fixed set of counters, so two keys may share one; that
/// only costs an extra miss. Prefix invalidations count separately and apply
/// to every key under the prefix.
#[derive(Default)]
struct Generations {
    stripes: [AtomicU64; STRIPES],
    prefixes: Mutex<HashMap<String, u64>>,
}

const STRIPES: usize = 32;

impl Generations {
    fn stripe(&self, key: &str) -> &AtomicU64 {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        &self.stripes[hasher.finish() as usize % STRIPES]
    }

    fn current(&self, key: &str) -> u64 {
        let prefixes = self.prefixes.lock().unwrap_or_else(PoisonError::into_inner);
        let under_prefix: u64 = prefixes
            .iter()
            .filter(|(prefix, _)| key.starts_with(prefix.as_str()))
            .map(|(_, count)| *count)
            .sum();
        self.stripe(key).load(Ordering::SeqCst) + under_prefix
    }

    fn bump(&self, key: &str) {
        self.stripe(key).fetch_add(1, Ordering::SeqCst);
    }

    fn bump_prefix(&self, prefix: &str) {
        let mut prefixes = self.prefixes.lock().unwrap_or_else(PoisonError::into_inner);
        *prefixes.entry(prefix.to_string()).or_default() += 1;
    }
}

/// Typed, failure-tolerant front for the side-car cache.
///
/// Every cache error is logged and swallowed: a failed read is a miss and a
/// failed write is skipped, so callers fall back to the store.
///
/// Writers only ever invalidate, after their commit. Readers populate through
/// [`EntityCache::get_or_load`], which drops its own entry again when a write
/// to the same key landed while the store read or the cache write was in
/// flight. A value read before a commit therefore never outlives it.
#[derive(Clone)]
pub struct EntityCache {
    cache: CacheHandle,
    ttl: Duration,
    generations: Arc<Generations>,
}

impl EntityCache {
    pub fn new(cache: CacheHandle, ttl: Duration) -> Self {
        Self {
            cache,
            ttl,
            generations: Arc::default(),
        }
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = match self.cache.get(key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(err) => {
                warn!(key, error = %err, "cache read failed, falling back to store");
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(value) => {
                debug!(key, "cache hit");
                Some(value)
            }
            Err(err) => {
                warn!(key, error = %err, "dropping undecodable cache entry");
                self.delete(key).await;
                None
            }
        }
    }

    /// Serves `key` from the cache, or awaits `load` and caches what it
    /// returns.
    ///
    /// `load` is not polled before the write generation of `key` has been
    /// captured.
    pub async fn get_or_load<T, F>(&self, key: &str, load: F) -> Result<Option<T>>
    where
        T: Serialize + DeserializeOwned,
        F: Future<Output = Result<Option<T>>>,
    {
        if let Some(value) = self.get(key).await {
            return Ok(Some(value));
        }
        let seen = self.generations.current(key);
        let loaded = load.await?;
        if let Some(value) = &loaded {
            self.populate(key, seen, value).await;
        }
        Ok(loaded)
    }

    /// Current write generation of `key`, for a later [`Self::populate`].
    pub fn generation(&self, key: &str) -> u64 {
        self.generations.current(key)
    }

    /// Caches `value` unless `key` was written since `seen` was taken.
    pub async fn populate<T: Serialize + ?Sized>(&self, key: &str, seen: u64, value: &T) {
        let raw = match serde_json::to_string(value) {
            Ok(raw) => raw,
            Err(err) => {
                warn!(key, error = %err, "cache encode failed");
                return;
            }
        };
        if self.generations.current(key) != seen {
            debug!(key, "skipping populate, entry written meanwhile");
            return;
        }
        if let Err(err) = self.cache.set(key, raw, self.ttl).await {
            warn!(key, error = %err, "cache write failed");
            return;
        }
        if self.generations.current(key) != seen {
            debug!(key, "dropping populate raced by a write");
            self.delete(key).await;
        }
    }

    /// Drops `key` after a committed write.
    pub async fn invalidate(&self, key: &str) {
        self.generations.bump(key);
        self.delete(key).await;
    }

    pub async fn invalidate_prefix(&self, prefix: &str) {
        self.generations.bump_prefix(prefix);
        if let Err(err) = self.cache.delete_prefix(prefix).await {
            warn!(prefix, error = %err, "cache prefix invalidation failed");
        }
    }

    async fn delete(&self, key: &str) {
        if let Err(err) = self.cache.delete(key).await {
            warn!(key, error = %err, "cache invalidation failed");
        }
    }
}
