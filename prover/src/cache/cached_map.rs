use std::{
    future::Future,
    hash::Hash,
    sync::{Arc, Weak},
    time::Duration,
};

use ahash::HashMap;
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::{
    sync::Notify,
    task::JoinHandle,
    time::{sleep_until, Instant},
};
use tracing::trace;

use super::SharedResult;
use crate::{
    config::CacheConfig,
    error::{ProverError, Result},
};

struct Settled<V> {
    expires: Instant,
    value: Result<V>,
}

struct Pending<V> {
    /// Fetch that installed this entry.
    id: u64,
    future: SharedResult<V>,
}

struct Inner<K, V> {
    pending: HashMap<K, Pending<V>>,
    cached: HashMap<K, Settled<V>>,
    next_id: u64,
}

impl<K: Eq + Hash + Clone, V> Inner<K, V> {
    fn insert(&mut self, key: K, value: Result<V>, ttl: Duration, max_cached: usize) -> bool {
        if ttl.is_zero() || max_cached == 0 {
            return false;
        }
        if !self.cached.contains_key(&key) && self.cached.len() >= max_cached {
            self.evict_oldest(max_cached.div_ceil(16));
        }
        let expires = Instant::now() + ttl;
        self.cached.insert(key, Settled { expires, value });
        true
    }

    /// Drops the `count` entries closest to expiry.
    fn evict_oldest(&mut self, count: usize) {
        let mut entries: Vec<_> = self
            .cached
            .iter()
            .map(|(key, settled)| (settled.expires, key.clone()))
            .collect();
        entries.sort_unstable_by_key(|(expires, _)| *expires);
        for (_, key) in entries.into_iter().take(count) {
            self.cached.remove(&key);
        }
        trace!(count, "evicted oldest");
    }

    /// Drops expired entries and returns the next expiry.
    fn sweep(&mut self, now: Instant) -> Option<Instant> {
        let before = self.cached.len();
        self.cached.retain(|_, settled| settled.expires > now);
        let swept = before - self.cached.len();
        if swept > 0 {
            trace!(swept, "swept expired");
        }
        self.cached.values().map(|settled| settled.expires).min()
    }
}

/// A keyed single-flight cache.
///
/// Concurrent [`get`](Self::get)s of one key share a single fetch. Settled
/// results stay cached for the configured TTL (successes and failures
/// separately) and are swept by a background task between
/// [`start`](Self::start) and [`stop`](Self::stop).
pub struct CachedMap<K, V> {
    config: CacheConfig,
    inner: Arc<Mutex<Inner<K, V>>>,
    notify: Arc<Notify>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl<K, V> CachedMap<K, V>
where
    K: Eq + Hash + Clone + Send + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            inner: Arc::new(Mutex::new(Inner {
                pending: HashMap::default(),
                cached: HashMap::default(),
                next_id: 0,
            })),
            notify: Arc::new(Notify::new()),
            sweeper: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Spawns the sweeper task. Must be called inside a tokio runtime.
    pub fn start(&self) {
        let mut sweeper = self.sweeper.lock();
        if sweeper.is_some() {
            return;
        }
        let inner = Arc::downgrade(&self.inner);
        let notify = self.notify.clone();
        let slop = self.config.slop;
        *sweeper = Some(tokio::spawn(sweep_loop(inner, notify, slop)));
    }

    pub fn stop(&self) {
        if let Some(sweeper) = self.sweeper.lock().take() {
            sweeper.abort();
        }
    }

    pub fn is_running(&self) -> bool {
        self.sweeper.lock().is_some()
    }

    /// Returns the cached or in-flight value of `key`, starting `fetch` if
    /// there is none. Fails with [`ProverError::Busy`] when too many fetches
    /// are already in flight.
    pub async fn get<F, Fut>(&self, key: K, fetch: F) -> Result<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V>> + Send + 'static,
    {
        self.get_future(key, fetch)?.await
    }

    /// Like [`get`](Self::get) but returns the shared future itself. Must be
    /// called inside a tokio runtime.
    pub fn get_future<F, Fut>(&self, key: K, fetch: F) -> Result<SharedResult<V>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V>> + Send + 'static,
    {
        let mut inner = self.inner.lock();
        if let Some(pending) = inner.pending.get(&key) {
            trace!("pending hit");
            return Ok(pending.future.clone());
        }
        if let Some(settled) = inner.cached.get(&key) {
            if settled.expires > Instant::now() {
                trace!("cache hit");
                let value = settled.value.clone();
                return Ok(async move { value }.boxed().shared());
            }
        }
        inner.cached.remove(&key);
        if inner.pending.len() >= self.config.max_pending {
            return Err(ProverError::Busy);
        }

        trace!("cache miss");
        let fetch = fetch();
        let weak = Arc::downgrade(&self.inner);
        let notify = self.notify.clone();
        let (ttl, error_ttl) = (self.config.ttl, self.config.error_ttl());
        let max_cached = self.config.max_cached;
        let settle_key = key.clone();
        let id = inner.next_id;
        inner.next_id += 1;
        // runs to completion even if every caller goes away
        let task = tokio::spawn(async move {
            let value = fetch.await;
            if let Some(inner) = weak.upgrade() {
                let mut inner = inner.lock();
                // a cleared or replaced fetch settles only its own callers
                if !matches!(inner.pending.get(&settle_key), Some(pending) if pending.id == id) {
                    return value;
                }
                inner.pending.remove(&settle_key);
                let ttl = if value.is_ok() { ttl } else { error_ttl };
                if inner.insert(settle_key, value.clone(), ttl, max_cached) {
                    notify.notify_one();
                }
            }
            value
        });
        let future = async move { task.await.unwrap_or(Err(ProverError::Cancelled)) }
            .boxed()
            .shared();
        inner.pending.insert(
            key,
            Pending {
                id,
                future: future.clone(),
            },
        );
        Ok(future)
    }

    /// Returns the settled value of `key` if it has not expired.
    pub fn peek(&self, key: &K) -> Option<Result<V>> {
        let inner = self.inner.lock();
        inner
            .cached
            .get(key)
            .filter(|settled| settled.expires > Instant::now())
            .map(|settled| settled.value.clone())
    }

    /// Caches `value` for `ttl`, or the configured TTL.
    pub fn set(&self, key: K, value: V, ttl: Option<Duration>) {
        let ttl = ttl.unwrap_or(self.config.ttl);
        if self
            .inner
            .lock()
            .insert(key, Ok(value), ttl, self.config.max_cached)
        {
            self.notify.notify_one();
        }
    }

    pub fn remove(&self, key: &K) {
        self.inner.lock().cached.remove(key);
    }

    /// Forgets every settled value and in-flight fetch. Fetches already
    /// running still answer their callers but are not cached.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.cached.clear();
        inner.pending.clear();
    }

    pub fn pending_size(&self) -> usize {
        self.inner.lock().pending.len()
    }

    pub fn cached_size(&self) -> usize {
        self.inner.lock().cached.len()
    }

    /// Time left before `key` expires.
    pub fn cached_remaining(&self, key: &K) -> Option<Duration> {
        let inner = self.inner.lock();
        let now = Instant::now();
        inner
            .cached
            .get(key)
            .filter(|settled| settled.expires > now)
            .map(|settled| settled.expires - now)
    }
}

impl<K, V> Drop for CachedMap<K, V> {
    fn drop(&mut self) {
        if let Some(sweeper) = self.sweeper.get_mut().take() {
            sweeper.abort();
        }
    }
}

/// Sleeps until the nearest expiry (at least `slop` away), sweeps, repeats.
/// Exits once the map is dropped.
async fn sweep_loop<K, V>(inner: Weak<Mutex<Inner<K, V>>>, notify: Arc<Notify>, slop: Duration)
where
    K: Eq + Hash + Clone,
{
    loop {
        let next = match inner.upgrade() {
            Some(inner) => inner.lock().sweep(Instant::now()),
            None => return,
        };
        match next {
            Some(expires) => {
                let wake = expires.max(Instant::now() + slop);
                tokio::select! {
                    _ = sleep_until(wake) => {}
                    _ = notify.notified() => {}
                }
            }
            None => notify.notified().await,
        }
    }
}
