//! The RPC boundary the provers consume.
//!
//! Transport, endpoints and timeouts belong to the implementation; the
//! provers only pick which block or batch to ask for.

use std::future::Future;

use ahash::HashMap;
use alloy_primitives::{b256, Address, Bytes, B256, U256, U64};
use alloy_sol_types::{sol, SolCall};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{ProverError, Result};

/// `keccak256("")`, the code hash of an account without code.
pub const KECCAK_EMPTY: B256 =
    b256!("c5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470");

/// Block an Ethereum-style read is pinned to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlockId {
    Latest,
    Number(u64),
}

/// Account part of an `eth_getProof` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EthAccountProof {
    pub address: Address,
    pub balance: U256,
    pub code_hash: B256,
    pub nonce: U64,
    pub storage_hash: B256,
    /// RLP-encoded trie nodes from the state root to the account.
    pub account_proof: Vec<Bytes>,
}

impl EthAccountProof {
    pub fn is_contract(&self) -> bool {
        self.code_hash != KECCAK_EMPTY && self.code_hash != B256::ZERO
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EthStorageProof {
    pub key: U256,
    pub value: U256,
    /// RLP-encoded trie nodes from the storage root to the slot.
    pub proof: Vec<Bytes>,
}

/// An `eth_getProof` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EthGetProof {
    #[serde(flatten)]
    pub account: EthAccountProof,
    pub storage_proof: Vec<EthStorageProof>,
}

/// One slot of a `zks_getProof` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ZkSyncStorageProof {
    pub key: B256,
    pub value: B256,
    /// Leaf index in the batch tree.
    pub index: u64,
    pub proof: Vec<B256>,
}

/// A `zks_getProof` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ZkSyncGetProof {
    pub address: Address,
    pub storage_proof: Vec<ZkSyncStorageProof>,
}

/// Ethereum JSON-RPC methods the provers rely on.
#[async_trait]
pub trait Provider: Send + Sync {
    /// `eth_getProof`
    async fn get_proof(
        &self,
        address: Address,
        slots: &[U256],
        block: BlockId,
    ) -> anyhow::Result<EthGetProof>;

    /// `eth_getStorageAt`
    async fn get_storage_at(&self, address: Address, slot: U256, block: BlockId)
        -> anyhow::Result<B256>;

    /// `eth_getCode`
    async fn get_code(&self, address: Address, block: BlockId) -> anyhow::Result<Bytes>;

    /// `eth_call`
    async fn call(&self, to: Address, data: Bytes, block: BlockId) -> anyhow::Result<Bytes>;
}

/// zkSync extension: proofs are relative to an L1 batch, not a block.
#[async_trait]
pub trait ZkSyncProvider: Provider {
    /// `zks_getProof`
    async fn get_storage_proofs(
        &self,
        address: Address,
        slots: &[U256],
        batch: u64,
    ) -> anyhow::Result<ZkSyncGetProof>;
}

/// Runs `send` once plus up to `retries` more times while it fails.
pub async fn send_retry<T, F, Fut>(retries: usize, mut send: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    let mut attempt = 0;
    loop {
        match send().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < retries => {
                attempt += 1;
                warn!(attempt, retries, ?err, "provider call failed; retrying");
            }
            Err(err) => return Err(ProverError::rpc(err)),
        }
    }
}

sol! {
    /// Optional gateway extension returning a dynamic byte field directly.
    function readBytesAt(uint256 slot) external view returns (bytes);
}

/// Remembers which targets implement `readBytesAt(uint256)`.
#[derive(Default)]
pub struct ReadBytesAtSupport {
    known: Mutex<HashMap<Address, bool>>,
}

impl ReadBytesAtSupport {
    pub fn get(&self, target: Address) -> Option<bool> {
        self.known.lock().get(&target).copied()
    }

    /// Calls `readBytesAt(slot)` on `target` unless it is known not to
    /// support it. Any failure marks an unknown target as unsupported and
    /// yields `None`.
    pub async fn read<P: Provider + ?Sized>(
        &self,
        provider: &P,
        target: Address,
        slot: U256,
        block: BlockId,
    ) -> Option<Bytes> {
        let known = self.get(target);
        if known == Some(false) {
            return None;
        }
        let data = Bytes::from(readBytesAtCall { slot }.abi_encode());
        let result = provider
            .call(target, data, block)
            .await
            .and_then(|ret| Ok(readBytesAtCall::abi_decode_returns(&ret, true)?._0));
        match result {
            Ok(value) => {
                if known.is_none() {
                    self.known.lock().insert(target, true);
                }
                Some(value)
            }
            Err(err) => {
                debug!(%target, ?err, "readBytesAt unavailable");
                if known.is_none() {
                    self.known.lock().insert(target, false);
                }
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn test_eth_get_proof_json() {
        let json = r#"{
            "address": "0x00000000000000000000000000000000000000aa",
            "balance": "0x0",
            "codeHash": "0xc5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470",
            "nonce": "0x1",
            "storageHash": "0x56e81f171bcc55a6ff8345e692c0f86e5b48e01b996cadc001622fb5e363b421",
            "accountProof": ["0xf8518080"],
            "storageProof": [{"key": "0x1", "value": "0x2a", "proof": []}]
        }"#;
        let proof: EthGetProof = serde_json::from_str(json).unwrap();
        assert_eq!(proof.account.address, Address::with_last_byte(0xaa));
        assert!(!proof.account.is_contract());
        assert_eq!(proof.account.account_proof.len(), 1);
        assert_eq!(proof.storage_proof[0].key, U256::from(1));
        assert_eq!(proof.storage_proof[0].value, U256::from(42));
    }

    #[test]
    fn test_zksync_proof_json() {
        let json = r#"{
            "address": "0x0000000000000000000000000000000000008002",
            "storageProof": [{
                "key": "0x0000000000000000000000000000000000000000000000000000000000000001",
                "value": "0x0000000000000000000000000000000000000000000000000000000000000000",
                "index": 27,
                "proof": []
            }]
        }"#;
        let proof: ZkSyncGetProof = serde_json::from_str(json).unwrap();
        assert_eq!(proof.storage_proof[0].index, 27);
    }

    #[tokio::test]
    async fn test_send_retry() {
        let calls = AtomicUsize::new(0);
        let value = send_retry(2, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    anyhow::bail!("flaky");
                }
                Ok(n)
            }
        })
        .await
        .unwrap();
        assert_eq!(value, 2);

        calls.store(0, Ordering::SeqCst);
        let err = send_retry(1, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { anyhow::Result::<()>::Err(anyhow::anyhow!("down")) }
        })
        .await
        .unwrap_err();
        assert!(matches!(err, ProverError::Rpc(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
