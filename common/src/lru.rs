//! Bounded, reference-counted cache with least-recently-used eviction.
//!
//! [`ReleasableCache`] hands out [`Lease`]s. While at least one lease for a
//! key is alive the entry is pinned; only entries nobody holds are eligible for
//! eviction. When the cache is full and every entry is pinned, admission of a
//! new key blocks until a lease is dropped, the caller's [`Cx`] is done, or the
//! cache is closed.
//!
//! The same structure serves two purposes: caching open resources (the value
//! is expensive to create) and limiting how many distinct keys are active at
//! once (the value is a cheap token such as a lock).

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::ops::Deref;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::Notify;

use crate::cx::{Cx, CxError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum CacheError {
    #[error("cache is closed")]
    Closed,
    #[error(transparent)]
    Canceled(#[from] CxError),
}

struct Entry<V> {
    /// `None` while the creator is still building the value.
    value: Option<Arc<V>>,
    refs: usize,
    last_used: u64,
}

struct State<K, V> {
    closed: bool,
    tick: u64,
    entries: HashMap<K, Entry<V>>,
}

impl<K: Eq + Hash + Clone, V> State<K, V> {
    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    /// Removes the least recently used idle entry, returning its value so the
    /// caller can drop it after releasing the lock.
    fn evict_one(&mut self) -> Option<Arc<V>> {
        let victim = self
            .entries
            .iter()
            .filter(|(_, e)| e.refs == 0 && e.value.is_some())
            .min_by_key(|(_, e)| e.last_used)
            .map(|(k, _)| k.clone())?;
        self.entries.remove(&victim).and_then(|e| e.value)
    }
}

struct Shared<K, V> {
    capacity: usize,
    state: Mutex<State<K, V>>,
    notify: Notify,
}

impl<K, V> Shared<K, V> {
    fn lock(&self) -> MutexGuard<'_, State<K, V>> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// A capacity-bounded map of leased values.
pub struct ReleasableCache<K, V> {
    shared: Arc<Shared<K, V>>,
}

impl<K, V> Clone for ReleasableCache<K, V> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<K, V> fmt::Debug for ReleasableCache<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.lock();
        f.debug_struct("ReleasableCache")
            .field("capacity", &self.shared.capacity)
            .field("len", &state.entries.len())
            .field("closed", &state.closed)
            .finish()
    }
}

impl<K, V> ReleasableCache<K, V>
where
    K: Eq + Hash + Clone,
{
    /// Creates a cache holding at most `capacity` entries. A capacity of zero
    /// is treated as one.
    pub fn new(capacity: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                capacity: capacity.max(1),
                state: Mutex::new(State {
                    closed: false,
                    tick: 0,
                    entries: HashMap::new(),
                }),
                notify: Notify::new(),
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    pub fn len(&self) -> usize {
        self.shared.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of live leases for `key`.
    pub fn refs(&self, key: &K) -> usize {
        self.shared
            .lock()
            .entries
            .get(key)
            .map(|e| e.refs)
            .unwrap_or(0)
    }

    /// Leases the value for `key`, creating it with `create` if it is not
    /// cached.
    ///
    /// `create` runs without the cache lock held. Concurrent callers asking
    /// for the same key wait for the first creator instead of creating a
    /// duplicate. If `create` fails its error is returned and the reserved
    /// slot is freed.
    pub async fn get_or_create<E, F>(&self, cx: &Cx, key: &K, create: F) -> Result<Lease<K, V>, E>
    where
        E: From<CacheError>,
        F: FnOnce() -> Result<V, E>,
    {
        loop {
            let notified = self.shared.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let evicted;
            {
                let mut state = self.shared.lock();
                if state.closed {
                    return Err(CacheError::Closed.into());
                }
                let tick = state.next_tick();
                if let Some(entry) = state.entries.get_mut(key) {
                    if let Some(value) = &entry.value {
                        entry.refs += 1;
                        entry.last_used = tick;
                        return Ok(self.lease(key.clone(), value.clone()));
                    }
                    evicted = None;
                } else {
                    evicted = if state.entries.len() >= self.shared.capacity {
                        state.evict_one()
                    } else {
                        None
                    };
                    if state.entries.len() < self.shared.capacity {
                        state.entries.insert(
                            key.clone(),
                            Entry {
                                value: None,
                                refs: 1,
                                last_used: tick,
                            },
                        );
                        drop(state);
                        drop(evicted);
                        return self.finish_create(key, create);
                    }
                }
            }
            drop(evicted);

            tokio::select! {
                _ = &mut notified => {}
                err = cx.done() => return Err(CacheError::Canceled(err).into()),
            }
        }
    }

    fn finish_create<E, F>(&self, key: &K, create: F) -> Result<Lease<K, V>, E>
    where
        F: FnOnce() -> Result<V, E>,
    {
        match create() {
            Ok(value) => {
                let value = Arc::new(value);
                {
                    let mut state = self.shared.lock();
                    if let Some(entry) = state.entries.get_mut(key) {
                        entry.value = Some(value.clone());
                    }
                }
                self.shared.notify.notify_waiters();
                Ok(self.lease(key.clone(), value))
            }
            Err(err) => {
                self.shared.lock().entries.remove(key);
                self.shared.notify.notify_waiters();
                Err(err)
            }
        }
    }

    fn lease(&self, key: K, value: Arc<V>) -> Lease<K, V> {
        Lease {
            shared: self.shared.clone(),
            key,
            value,
        }
    }

    /// Drops the cached entry for `key` if nobody holds it. Returns `false`
    /// when the entry is leased (or still being created).
    pub fn remove(&self, key: &K) -> bool {
        let removed = {
            let mut state = self.shared.lock();
            match state.entries.get(key) {
                None => return true,
                Some(entry) if entry.refs > 0 || entry.value.is_none() => return false,
                Some(_) => state.entries.remove(key),
            }
        };
        drop(removed);
        self.shared.notify.notify_waiters();
        true
    }

    /// Closes the cache. Idle entries are dropped, outstanding leases stay
    /// valid, and every pending or future admission fails with
    /// [`CacheError::Closed`].
    pub fn close(&self) {
        let idle: Vec<Entry<V>> = {
            let mut state = self.shared.lock();
            state.closed = true;
            let keys: Vec<K> = state
                .entries
                .iter()
                .filter(|(_, e)| e.refs == 0)
                .map(|(k, _)| k.clone())
                .collect();
            keys.iter()
                .filter_map(|k| state.entries.remove(k))
                .collect()
        };
        drop(idle);
        self.shared.notify.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.shared.lock().closed
    }
}

/// A pinned reference to a cached value. Dropping it releases the pin.
pub struct Lease<K, V>
where
    K: Eq + Hash,
{
    shared: Arc<Shared<K, V>>,
    key: K,
    value: Arc<V>,
}

impl<K: Eq + Hash, V> Lease<K, V> {
    pub fn key(&self) -> &K {
        &self.key
    }

    pub fn value(&self) -> &Arc<V> {
        &self.value
    }
}

impl<K: Eq + Hash, V> Deref for Lease<K, V> {
    type Target = V;

    fn deref(&self) -> &V {
        &self.value
    }
}

impl<K: Eq + Hash + fmt::Debug, V> fmt::Debug for Lease<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lease").field("key", &self.key).finish()
    }
}

impl<K, V> Drop for Lease<K, V>
where
    K: Eq + Hash,
{
    fn drop(&mut self) {
        let released = {
            let mut state = self.shared.lock();
            let tick = state.tick;
            let closed = state.closed;
            let idle = match state.entries.get_mut(&self.key) {
                Some(entry) => {
                    entry.refs = entry.refs.saturating_sub(1);
                    entry.last_used = entry.last_used.max(tick);
                    entry.refs == 0
                }
                None => false,
            };
            if closed && idle {
                state.entries.remove(&self.key)
            } else {
                None
            }
        };
        drop(released);
        self.shared.notify.notify_waiters();
    }
}
