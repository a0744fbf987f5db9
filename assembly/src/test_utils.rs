//! In-memory chain state for exercising programs without a node.

use std::sync::atomic::{AtomicUsize, Ordering};

use ahash::{HashMap, HashSet};
use alloy_primitives::{Address, Bytes, B256, U256};
use async_trait::async_trait;
use parking_lot::RwLock;

use crate::{
    error::Result,
    execution::{Limits, StorageBackend},
    storage::solidity_array_slots,
};

/// A [`StorageBackend`] over plain maps. Unset slots read as zero.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    limits: Limits,
    contracts: RwLock<HashSet<Address>>,
    storage: RwLock<HashMap<(Address, U256), B256>>,
    supplied: RwLock<HashMap<(Address, U256), Bytes>>,
    reads: AtomicUsize,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limits(limits: Limits) -> Self {
        Self {
            limits,
            ..Default::default()
        }
    }

    pub fn deploy(&self, target: Address) {
        self.contracts.write().insert(target);
    }

    pub fn set_word(&self, target: Address, slot: U256, word: B256) {
        self.storage.write().insert((target, slot), word);
    }

    pub fn set_uint(&self, target: Address, slot: U256, x: U256) {
        self.set_word(target, slot, B256::from(x.to_be_bytes::<32>()));
    }

    /// Stores `value` at `slot` using the `bytes`/`string` layout.
    pub fn set_bytes(&self, target: Address, slot: U256, value: &[u8]) {
        if value.len() < 32 {
            let mut header = [0u8; 32];
            header[..value.len()].copy_from_slice(value);
            header[31] = (value.len() as u8) << 1;
            self.set_word(target, slot, B256::from(header));
            return;
        }
        self.set_uint(target, slot, U256::from(value.len() * 2 + 1));
        let slots = solidity_array_slots(slot, value.len().div_ceil(32));
        for (slot, chunk) in slots.into_iter().zip(value.chunks(32)) {
            let mut word = [0u8; 32];
            word[..chunk.len()].copy_from_slice(chunk);
            self.set_word(target, slot, B256::from(word));
        }
    }

    /// Makes `read_supplied_bytes` answer for `slot`.
    pub fn supply(&self, target: Address, slot: U256, value: Bytes) {
        self.supplied.write().insert((target, slot), value);
    }

    /// Storage words read so far.
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    fn limits(&self) -> &Limits {
        &self.limits
    }

    async fn is_contract(&self, target: Address) -> Result<bool> {
        Ok(self.contracts.read().contains(&target))
    }

    async fn get_storage(&self, target: Address, slot: U256, _fast: bool) -> Result<B256> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .storage
            .read()
            .get(&(target, slot))
            .copied()
            .unwrap_or_default())
    }

    async fn read_supplied_bytes(&self, target: Address, slot: U256) -> Result<Option<Bytes>> {
        Ok(self.supplied.read().get(&(target, slot)).cloned())
    }
}
