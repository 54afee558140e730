//! Single-flight resolution cache.
//!
//! Every key owns a slot holding a [`OnceCell`]. The first caller to reach an
//! empty slot starts the fetch; concurrent callers for the same key await that
//! same cell instead of issuing their own upstream request. A failed fetch
//! leaves the cell empty, so the next waiter in line runs its own fetch, and
//! the empty slot is dropped from the map.
//!
//! Fetches run on their own task. A caller that stops awaiting does not cancel
//! the fetch; its result still lands in the cache for later callers.
//!
//! The slot map itself is an [`ArcSwap`]: lookups on the hot path are
//! lock-free, and the rare insert/evict swaps in a fresh map.

use std::{
    collections::HashMap,
    fmt::Debug,
    future::Future,
    hash::Hash,
    sync::Arc,
    time::{Duration, Instant},
};

use arc_swap::ArcSwap;
use tokio::sync::OnceCell;
use tracing::debug;

use common::FpeError;

/// Expiry and fetch bounds for a [`SingleFlightCache`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachePolicy {
    /// Lifetime of a cached value. `None` keeps values until cleared;
    /// `Some(Duration::ZERO)` disables caching altogether.
    pub ttl: Option<Duration>,
    /// Upper bound on a single upstream fetch. Waiters are released with an
    /// [`FpeError::Upstream`] when it elapses.
    pub fetch_timeout: Option<Duration>,
}

impl CachePolicy {
    /// Cache forever, never time out.
    pub const UNBOUNDED: Self = Self {
        ttl: None,
        fetch_timeout: None,
    };

    fn disabled(&self) -> bool {
        self.ttl == Some(Duration::ZERO)
    }

    fn expires_at(&self) -> Option<Instant> {
        self.ttl.map(|ttl| Instant::now() + ttl)
    }
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self::UNBOUNDED
    }
}

#[derive(Debug, Clone)]
struct Entry<V> {
    value: V,
    expires_at: Option<Instant>,
}

impl<V> Entry<V> {
    fn is_live(&self) -> bool {
        self.expires_at.map_or(true, |t| Instant::now() < t)
    }
}

type Slot<V> = Arc<OnceCell<Entry<V>>>;

/// Coalescing cache: at most one in-flight fetch per key.
pub struct SingleFlightCache<K, V> {
    name: &'static str,
    policy: CachePolicy,
    slots: Arc<ArcSwap<HashMap<K, Slot<V>>>>,
}

impl<K, V> Clone for SingleFlightCache<K, V> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            policy: self.policy,
            slots: Arc::clone(&self.slots),
        }
    }
}

impl<K, V> Debug for SingleFlightCache<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SingleFlightCache")
            .field("name", &self.name)
            .field("policy", &self.policy)
            .field("slots", &self.slots.load().len())
            .finish()
    }
}

impl<K, V> SingleFlightCache<K, V>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Create an empty cache. `name` only labels log events.
    pub fn new(name: &'static str, policy: CachePolicy) -> Self {
        Self {
            name,
            policy,
            slots: Arc::new(ArcSwap::from_pointee(HashMap::new())),
        }
    }

    pub fn policy(&self) -> CachePolicy {
        self.policy
    }

    /// Number of live (fetched and unexpired) entries.
    pub fn len(&self) -> usize {
        self.slots
            .load()
            .values()
            .filter(|slot| slot.get().is_some_and(Entry::is_live))
            .count()
    }

    /// Returns `true` if no live entry is cached.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Return the cached value for `key` without fetching.
    pub fn get(&self, key: &K) -> Option<V> {
        let map = self.slots.load();
        let entry = map.get(key)?.get()?;
        entry.is_live().then(|| entry.value.clone())
    }

    /// Return the cached value for `key`, or run `fetch` to produce it.
    ///
    /// Concurrent callers for the same key share a single `fetch`. A fetch
    /// error is returned to the caller that started it; waiters then retry
    /// with their own `fetch`.
    ///
    /// # Errors
    ///
    /// Propagates the error of `fetch`, or [`FpeError::Upstream`] if the fetch
    /// exceeds the policy's `fetch_timeout` or its task panics.
    pub async fn get_or_fetch<F, Fut>(&self, key: K, fetch: F) -> Result<V, FpeError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, FpeError>> + Send + 'static,
    {
        if self.policy.disabled() {
            return self.fetch_bounded(&key, fetch()).await;
        }

        let mut slot = self.slot(&key);
        if let Some(entry) = slot.get() {
            if entry.is_live() {
                return Ok(entry.value.clone());
            }
            debug!(cache = self.name, key = ?key, "cache entry expired");
            slot = self.replace_stale(&key, &slot);
        }

        let entry = slot
            .get_or_try_init(|| self.spawn_fetch(key, Arc::clone(&slot), fetch()))
            .await?;
        Ok(entry.value.clone())
    }

    /// Store `value` under `key`, replacing any previous entry.
    ///
    /// A no-op when caching is disabled.
    pub fn insert(&self, key: K, value: V) {
        if self.policy.disabled() {
            return;
        }
        let slot: Slot<V> = Arc::new(OnceCell::new_with(Some(Entry {
            value,
            expires_at: self.policy.expires_at(),
        })));
        self.slots.rcu(|map| {
            let mut next = HashMap::clone(map);
            next.insert(key.clone(), Arc::clone(&slot));
            next
        });
    }

    /// Drop the entry for `key`.
    pub fn remove(&self, key: &K) {
        self.slots.rcu(|map| {
            let mut next = HashMap::clone(map);
            next.remove(key);
            next
        });
    }

    /// Drop every entry.
    pub fn clear(&self) {
        self.slots.store(Arc::new(HashMap::new()));
        debug!(cache = self.name, "cache cleared");
    }

    /// Run `fetch` on its own task, which stores a success into `slot` when no
    /// caller is left to do it and drops `slot` from the map on failure.
    async fn spawn_fetch<Fut>(
        &self,
        key: K,
        slot: Slot<V>,
        fetch: Fut,
    ) -> Result<Entry<V>, FpeError>
    where
        Fut: Future<Output = Result<V, FpeError>> + Send + 'static,
    {
        let cache = self.clone();
        let task = tokio::spawn(async move {
            match cache.fetch_bounded(&key, fetch).await {
                Ok(value) => {
                    let entry = Entry {
                        value,
                        expires_at: cache.policy.expires_at(),
                    };
                    // Fails while the starting caller still holds the cell.
                    if slot.set(entry.clone()).is_ok() {
                        debug!(cache = cache.name, key = ?key, "fetch settled after caller left");
                    }
                    cache.adopt(&key, &slot);
                    Ok(entry)
                }
                Err(e) => {
                    cache.evict_empty(&key, &slot);
                    Err(e)
                }
            }
        });
        task.await.map_err(|e| {
            FpeError::Upstream(format!("{} fetch task failed: {e}", self.name))
        })?
    }

    async fn fetch_bounded<Fut>(&self, key: &K, fetch: Fut) -> Result<V, FpeError>
    where
        Fut: Future<Output = Result<V, FpeError>>,
    {
        debug!(cache = self.name, key = ?key, "cache miss; fetching");
        match self.policy.fetch_timeout {
            Some(limit) => tokio::time::timeout(limit, fetch).await.map_err(|_| {
                FpeError::Upstream(format!(
                    "{} fetch for {key:?} timed out after {limit:?}",
                    self.name
                ))
            })?,
            None => fetch.await,
        }
    }

    /// The slot registered for `key`, creating it if absent.
    fn slot(&self, key: &K) -> Slot<V> {
        if let Some(slot) = self.slots.load().get(key) {
            return Arc::clone(slot);
        }
        let mut chosen = None;
        self.slots.rcu(|map| {
            let mut next = HashMap::clone(map);
            let slot = next
                .entry(key.clone())
                .or_insert_with(|| Arc::new(OnceCell::new()));
            chosen = Some(Arc::clone(slot));
            next
        });
        chosen.unwrap_or_else(|| Arc::new(OnceCell::new()))
    }

    /// Register `slot` for `key` unless the key already has one. A waiter that
    /// retried on a slot evicted after a failure puts it back this way.
    fn adopt(&self, key: &K, slot: &Slot<V>) {
        if self.slots.load().contains_key(key) {
            return;
        }
        self.slots.rcu(|map| {
            let mut next = HashMap::clone(map);
            next.entry(key.clone()).or_insert_with(|| Arc::clone(slot));
            next
        });
    }

    /// Drop `slot` from the map if it is still registered for `key` and empty.
    fn evict_empty(&self, key: &K, slot: &Slot<V>) {
        let registered = self
            .slots
            .load()
            .get(key)
            .is_some_and(|current| Arc::ptr_eq(current, slot));
        if !registered {
            return;
        }
        self.slots.rcu(|map| {
            let mut next = HashMap::clone(map);
            if next
                .get(key)
                .is_some_and(|current| Arc::ptr_eq(current, slot) && !current.initialized())
            {
                next.remove(key);
            }
            next
        });
    }

    #[cfg(test)]
    fn slot_count(&self) -> usize {
        self.slots.load().len()
    }

    /// Swap an expired slot for an empty one, unless another caller already did.
    fn replace_stale(&self, key: &K, stale: &Slot<V>) -> Slot<V> {
        let mut chosen = None;
        self.slots.rcu(|map| {
            let mut next = HashMap::clone(map);
            let slot = match next.get(key) {
                Some(current) if !Arc::ptr_eq(current, stale) => Arc::clone(current),
                _ => {
                    let fresh: Slot<V> = Arc::new(OnceCell::new());
                    next.insert(key.clone(), Arc::clone(&fresh));
                    fresh
                }
            };
            chosen = Some(slot);
            next
        });
        chosen.unwrap_or_else(|| Arc::new(OnceCell::new()))
    }
}
