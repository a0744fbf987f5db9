use std::{sync::Arc, time::Duration};

use futures::{future::BoxFuture, FutureExt};
use parking_lot::Mutex;
use tokio::time::Instant;

use super::SharedResult;
use crate::error::{ProverError, Result};

type Generator<V> = Box<dyn Fn() -> BoxFuture<'static, Result<V>> + Send + Sync>;

struct Slot<V> {
    /// `None` while the fetch is in flight.
    expires: Option<Instant>,
    future: SharedResult<V>,
}

struct State<V> {
    generation: u64,
    slot: Option<Slot<V>>,
}

/// A single lazily fetched value, refreshed after it expires.
///
/// Concurrent [`get`](Self::get)s share one fetch.
pub struct CachedValue<V> {
    generator: Generator<V>,
    ttl: Duration,
    error_ttl: Duration,
    state: Arc<Mutex<State<V>>>,
}

impl<V: Clone + Send + Sync + 'static> CachedValue<V> {
    pub fn new<F>(generator: F, ttl: Duration, error_ttl: Duration) -> Self
    where
        F: Fn() -> BoxFuture<'static, Result<V>> + Send + Sync + 'static,
    {
        Self {
            generator: Box::new(generator),
            ttl,
            error_ttl,
            state: Arc::new(Mutex::new(State {
                generation: 0,
                slot: None,
            })),
        }
    }

    /// Returns the current value, fetching a new one if it expired. Must be
    /// called inside a tokio runtime.
    pub async fn get(&self) -> Result<V> {
        self.future().await
    }

    fn future(&self) -> SharedResult<V> {
        let mut state = self.state.lock();
        if let Some(slot) = &state.slot {
            if !matches!(slot.expires, Some(expires) if expires <= Instant::now()) {
                return slot.future.clone();
            }
        }

        state.generation += 1;
        let generation = state.generation;
        let fetch = (self.generator)();
        let weak = Arc::downgrade(&self.state);
        let (ttl, error_ttl) = (self.ttl, self.error_ttl);
        let task = tokio::spawn(async move {
            let value = fetch.await;
            if let Some(state) = weak.upgrade() {
                let mut state = state.lock();
                // a set() or clear() may have replaced this fetch
                if state.generation == generation {
                    if let Some(slot) = state.slot.as_mut() {
                        let ttl = if value.is_ok() { ttl } else { error_ttl };
                        slot.expires = Some(Instant::now() + ttl);
                    }
                }
            }
            value
        });
        let future = async move { task.await.unwrap_or(Err(ProverError::Cancelled)) }
            .boxed()
            .shared();
        state.slot = Some(Slot {
            expires: None,
            future: future.clone(),
        });
        future
    }

    pub fn set(&self, value: V) {
        let mut state = self.state.lock();
        state.generation += 1;
        state.slot = Some(Slot {
            expires: Some(Instant::now() + self.ttl),
            future: async move { Ok(value) }.boxed().shared(),
        });
    }

    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.generation += 1;
        state.slot = None;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn counter(ttl: Duration) -> (Arc<AtomicU32>, CachedValue<u32>) {
        let calls = Arc::new(AtomicU32::new(0));
        let counted = calls.clone();
        let value = CachedValue::new(
            move || {
                let calls = counted.clone();
                async move {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    Ok(calls.fetch_add(1, Ordering::SeqCst) + 1)
                }
                .boxed()
            },
            ttl,
            ttl / 4,
        );
        (calls, value)
    }

    #[tokio::test(start_paused = true)]
    async fn test_refreshes_after_ttl() {
        let (calls, value) = counter(Duration::from_secs(1));
        let (a, b) = tokio::join!(value.get(), value.get());
        assert_eq!((a.unwrap(), b.unwrap()), (1, 1));
        assert_eq!(value.get().await.unwrap(), 1);

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(value.get().await.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_and_clear() {
        let (calls, value) = counter(Duration::from_secs(1));
        value.set(42);
        assert_eq!(value.get().await.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        value.clear();
        assert_eq!(value.get().await.unwrap(), 1);
    }
}
