//! An in-memory [`Provider`] that fabricates structurally valid proofs and
//! counts the calls made to it.

use std::{
    sync::atomic::{AtomicBool, AtomicUsize, Ordering},
    time::Duration,
};

use ahash::HashMap;
use alloy_primitives::{keccak256, Address, Bytes, B256, U256, U64};
use alloy_sol_types::{SolCall, SolValue};
use async_trait::async_trait;
use gatevm_asm::storage::solidity_array_slots;
use parking_lot::RwLock;

use crate::{
    provider::{
        readBytesAtCall, BlockId, EthAccountProof, EthGetProof, EthStorageProof, Provider,
        ZkSyncGetProof, ZkSyncProvider, ZkSyncStorageProof, KECCAK_EMPTY,
    },
    zksync::ZKSYNC_ACCOUNT_CODEHASH,
};

/// Provider methods, for call counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    GetProof,
    GetStorageAt,
    GetCode,
    Call,
    GetStorageProofs,
}

/// Chain state held in maps. Unset slots read as zero.
#[derive(Debug, Default)]
pub struct MockProvider {
    code: RwLock<HashMap<Address, Bytes>>,
    storage: RwLock<HashMap<(Address, U256), B256>>,
    supplied: RwLock<HashMap<(Address, U256), Bytes>>,
    calls: RwLock<HashMap<Method, usize>>,
    /// Slots requested through proof calls.
    proven_slots: AtomicUsize,
    delay: RwLock<Option<Duration>>,
    failing: AtomicBool,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Gives `target` some code.
    pub fn deploy(&self, target: Address) {
        let code = Bytes::copy_from_slice(keccak256(target).as_slice());
        self.code.write().insert(target, code);
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

    /// Makes `target` answer `readBytesAt(slot)` with `value`.
    pub fn supply(&self, target: Address, slot: U256, value: Bytes) {
        self.supplied.write().insert((target, slot), value);
    }

    /// Delays every call by `delay`.
    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.write() = delay;
    }

    /// Makes every call fail until reset.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn calls(&self, method: Method) -> usize {
        self.calls.read().get(&method).copied().unwrap_or(0)
    }

    pub fn proven_slots(&self) -> usize {
        self.proven_slots.load(Ordering::SeqCst)
    }

    pub fn reset_calls(&self) {
        self.calls.write().clear();
        self.proven_slots.store(0, Ordering::SeqCst);
    }

    fn word(&self, target: Address, slot: U256) -> B256 {
        self.storage
            .read()
            .get(&(target, slot))
            .copied()
            .unwrap_or_default()
    }

    /// The code-hash system contract's word for the address in `slot`.
    fn code_hash_word(&self, slot: U256) -> B256 {
        let target = Address::from_word(B256::from(slot.to_be_bytes::<32>()));
        self.code
            .read()
            .get(&target)
            .map(keccak256)
            .unwrap_or_default()
    }

    async fn enter(&self, method: Method) -> anyhow::Result<()> {
        *self.calls.write().entry(method).or_default() += 1;
        let delay = *self.delay.read();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            anyhow::bail!("{method:?} failed");
        }
        Ok(())
    }
}

fn fake_node(parts: &[&[u8]]) -> B256 {
    keccak256(parts.concat())
}

fn fake_rlp_proof(parts: &[&[u8]]) -> Vec<Bytes> {
    vec![Bytes::copy_from_slice(fake_node(parts).as_slice())]
}

#[async_trait]
impl Provider for MockProvider {
    async fn get_proof(
        &self,
        address: Address,
        slots: &[U256],
        _block: BlockId,
    ) -> anyhow::Result<EthGetProof> {
        self.enter(Method::GetProof).await?;
        self.proven_slots.fetch_add(slots.len(), Ordering::SeqCst);
        let code_hash = self
            .code
            .read()
            .get(&address)
            .map(keccak256)
            .unwrap_or(KECCAK_EMPTY);
        let account = EthAccountProof {
            address,
            balance: U256::ZERO,
            code_hash,
            nonce: U64::from(1),
            storage_hash: fake_node(&[address.as_slice(), b"storage"]),
            account_proof: fake_rlp_proof(&[address.as_slice()]),
        };
        let storage_proof = slots
            .iter()
            .map(|slot| {
                let key = slot.to_be_bytes::<32>();
                EthStorageProof {
                    key: *slot,
                    value: U256::from_be_bytes(self.word(address, *slot).0),
                    proof: fake_rlp_proof(&[address.as_slice(), &key]),
                }
            })
            .collect();
        Ok(EthGetProof {
            account,
            storage_proof,
        })
    }

    async fn get_storage_at(
        &self,
        address: Address,
        slot: U256,
        _block: BlockId,
    ) -> anyhow::Result<B256> {
        self.enter(Method::GetStorageAt).await?;
        if address == ZKSYNC_ACCOUNT_CODEHASH {
            return Ok(self.code_hash_word(slot));
        }
        Ok(self.word(address, slot))
    }

    async fn get_code(&self, address: Address, _block: BlockId) -> anyhow::Result<Bytes> {
        self.enter(Method::GetCode).await?;
        Ok(self.code.read().get(&address).cloned().unwrap_or_default())
    }

    async fn call(&self, to: Address, data: Bytes, _block: BlockId) -> anyhow::Result<Bytes> {
        self.enter(Method::Call).await?;
        let call = readBytesAtCall::abi_decode(&data, true)?;
        let value = self.supplied.read().get(&(to, call.slot)).cloned();
        match value {
            Some(value) => Ok(Bytes::from(value.abi_encode())),
            None => anyhow::bail!("execution reverted"),
        }
    }
}

#[async_trait]
impl ZkSyncProvider for MockProvider {
    async fn get_storage_proofs(
        &self,
        address: Address,
        slots: &[U256],
        batch: u64,
    ) -> anyhow::Result<ZkSyncGetProof> {
        self.enter(Method::GetStorageProofs).await?;
        self.proven_slots.fetch_add(slots.len(), Ordering::SeqCst);
        let storage_proof = slots
            .iter()
            .enumerate()
            .map(|(i, slot)| {
                let key = slot.to_be_bytes::<32>();
                let value = if address == ZKSYNC_ACCOUNT_CODEHASH {
                    self.code_hash_word(*slot)
                } else {
                    self.word(address, *slot)
                };
                ZkSyncStorageProof {
                    key: B256::from(key),
                    value,
                    index: batch * 1000 + i as u64,
                    proof: vec![fake_node(&[address.as_slice(), &key])],
                }
            })
            .collect();
        Ok(ZkSyncGetProof {
            address,
            storage_proof,
        })
    }
}
