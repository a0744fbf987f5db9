use std::num::NonZeroUsize;

use lru::LruCache;
use parking_lot::Mutex;

use super::SharedResult;
use crate::error::Result;

/// A cached proof, or the fetch that will produce it.
#[derive(Clone)]
pub enum ProofEntry<V> {
    Ready(V),
    Pending(SharedResult<V>),
}

impl<V: Clone> ProofEntry<V> {
    pub async fn resolve(self) -> Result<V> {
        match self {
            ProofEntry::Ready(value) => Ok(value),
            ProofEntry::Pending(future) => future.await,
        }
    }

    pub fn ready(&self) -> Option<&V> {
        match self {
            ProofEntry::Ready(value) => Some(value),
            ProofEntry::Pending(_) => None,
        }
    }
}

/// Size-bounded LRU of proofs keyed by account or storage key.
///
/// Account proofs live under the lowercase hex address, storage proofs under
/// the address followed by the unpadded hex slot.
pub struct ProofLru<V> {
    cache: Mutex<LruCache<String, ProofEntry<V>>>,
}

impl<V: Clone> ProofLru<V> {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Looks up `key` and marks it most recently used.
    pub fn touch(&self, key: &str) -> Option<ProofEntry<V>> {
        self.cache.lock().get(key).cloned()
    }

    /// Looks up `key` without changing its recency.
    pub fn peek(&self, key: &str) -> Option<ProofEntry<V>> {
        self.cache.lock().peek(key).cloned()
    }

    pub fn set(&self, key: String, value: V) {
        self.cache.lock().put(key, ProofEntry::Ready(value));
    }

    pub fn set_future(&self, key: String, future: SharedResult<V>) {
        self.cache.lock().put(key, ProofEntry::Pending(future));
    }

    /// Removes `key` only while it still holds `future`.
    pub fn remove_pending(&self, key: &str, future: &SharedResult<V>) -> bool {
        let mut cache = self.cache.lock();
        let owned = matches!(
            cache.peek(key),
            Some(ProofEntry::Pending(pending)) if pending.ptr_eq(future)
        );
        if owned {
            cache.pop(key);
        }
        owned
    }

    pub fn remove(&self, key: &str) -> Option<ProofEntry<V>> {
        self.cache.lock().pop(key)
    }

    /// Keys from most to least recently used.
    pub fn keys(&self) -> Vec<String> {
        self.cache.lock().iter().map(|(key, _)| key.clone()).collect()
    }

    pub fn clear(&self) {
        self.cache.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.cache.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
