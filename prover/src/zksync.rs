//! Prover for zkSync, where proofs are relative to an L1 batch and every
//! proof is a storage proof.

use std::sync::Arc;

use alloy_primitives::{address, Address, Bytes, B256, U256};
use alloy_sol_types::SolValue;
use async_trait::async_trait;
use futures::{future::try_join_all, try_join, FutureExt};
use gatevm_asm::{Limits, Need, StorageBackend};
use tracing::{debug, instrument};

use crate::{
    cache::{storage_key, CachedMap, ProofLru, Resolvers},
    config::ProverConfig,
    error::{ProverError, Result},
    prover::{proof_map, Bucket, ProofPlan, ProofSequence, Prover},
    provider::{send_retry, BlockId, ReadBytesAtSupport, ZkSyncProvider, ZkSyncStorageProof},
};

/// System contract holding every account's code hash, keyed by address.
pub const ZKSYNC_ACCOUNT_CODEHASH: Address = address!("0000000000000000000000000000000000008002");

/// ABI `(bytes32 value, uint64 index, bytes32[] proof)`.
pub fn encode_proof(proof: &ZkSyncStorageProof) -> Bytes {
    Bytes::from((proof.value, proof.index, proof.proof.clone()).abi_encode_params())
}

fn address_slot(target: Address) -> U256 {
    U256::from_be_slice(target.as_slice())
}

/// Storage-only reduction.
///
/// A required target becomes the code-hash slot of its address; a target
/// that only had to be read shares the null proof. Slots belong to the last
/// target, or to the null proof while that is the zero address.
pub fn reduce_needs(needs: &[Need]) -> ProofPlan {
    fn slot_ref(plan: &mut ProofPlan, target: Address, slot: U256) -> usize {
        if target == Address::ZERO {
            return plan.null_ref();
        }
        let bucket = plan.bucket(target);
        plan.slot_ref(bucket, slot)
    }

    let mut plan = ProofPlan::default();
    let mut target = Address::ZERO;
    for need in needs {
        let id = match need {
            Need::Target(need) => {
                target = need.target;
                let owner = if need.required {
                    ZKSYNC_ACCOUNT_CODEHASH
                } else {
                    Address::ZERO
                };
                slot_ref(&mut plan, owner, address_slot(need.target))
            }
            Need::Slot(slot) => slot_ref(&mut plan, target, *slot),
            Need::Hashed(need) => plan.hashed_ref(need.value.clone()),
        };
        plan.order.push(id);
    }
    plan
}

/// Proves state at one L1 batch through `zks_getProof`.
pub struct ZkSyncProver<P: ?Sized> {
    provider: Arc<P>,
    batch: u64,
    config: ProverConfig,
    proof_lru: ProofLru<Arc<ZkSyncStorageProof>>,
    storage_cache: CachedMap<String, B256>,
    read_bytes_at: ReadBytesAtSupport,
}

impl<P: ZkSyncProvider + ?Sized + 'static> ZkSyncProver<P> {
    pub fn new(provider: Arc<P>, batch: u64) -> Self {
        Self::with_config(provider, batch, ProverConfig::default())
    }

    pub fn with_config(provider: Arc<P>, batch: u64, config: ProverConfig) -> Self {
        Self {
            proof_lru: ProofLru::new(config.proof_cache_size),
            storage_cache: CachedMap::new(config.cache.clone()),
            read_bytes_at: ReadBytesAtSupport::default(),
            provider,
            batch,
            config,
        }
    }

    pub fn batch(&self) -> u64 {
        self.batch
    }

    pub fn proof_lru(&self) -> &ProofLru<Arc<ZkSyncStorageProof>> {
        &self.proof_lru
    }

    /// Starts expiring the fast-path cache. Must be called inside a tokio
    /// runtime.
    pub fn start(&self) {
        self.storage_cache.start();
    }

    pub fn stop(&self) {
        self.storage_cache.stop();
    }

    pub fn proof_map(&self) -> Vec<(Address, Vec<U256>)> {
        proof_map(self.proof_lru.keys())
    }

    /// Proofs of `slots` of `target`, fetching only what is neither cached
    /// nor already being fetched.
    pub async fn get_storage_proofs(
        &self,
        target: Address,
        slots: &[U256],
    ) -> Result<Vec<Arc<ZkSyncStorageProof>>> {
        let blocker = Resolvers::<Arc<Vec<Arc<ZkSyncStorageProof>>>>::new();
        let mut installed = Vec::new();
        let mut missing = Vec::new();
        let entries: Vec<_> = slots
            .iter()
            .map(|slot| {
                let key = storage_key(target, *slot);
                let entry = self.proof_lru.touch(&key);
                if entry.is_none() {
                    let index = missing.len();
                    missing.push(*slot);
                    let future = blocker
                        .future()
                        .map(move |proofs| {
                            proofs.and_then(|p| p.get(index).cloned().ok_or(ProverError::Cancelled))
                        })
                        .boxed()
                        .shared();
                    self.proof_lru.set_future(key.clone(), future.clone());
                    installed.push((key, future));
                }
                entry
            })
            .collect();

        let fetched = if missing.is_empty() {
            Vec::new()
        } else {
            match self.fetch_storage_proofs(target, &missing).await {
                Ok(proofs) => {
                    for (slot, proof) in missing.iter().zip(&proofs) {
                        self.proof_lru.set(storage_key(target, *slot), proof.clone());
                    }
                    blocker.resolve(Arc::new(proofs.clone()));
                    proofs
                }
                Err(err) => {
                    blocker.reject(err.clone());
                    for (key, future) in &installed {
                        self.proof_lru.remove_pending(key, future);
                    }
                    return Err(err);
                }
            }
        };

        let mut fetched = fetched.into_iter();
        try_join_all(entries.into_iter().map(|entry| {
            let own = if entry.is_none() { fetched.next() } else { None };
            async move {
                match (entry, own) {
                    (Some(entry), _) => entry.resolve().await,
                    (None, Some(proof)) => Ok(proof),
                    (None, None) => Err(ProverError::Cancelled),
                }
            }
        }))
        .await
    }

    /// Requests `slots` in chunks of `proof_batch_size`.
    #[instrument(skip(self, slots), fields(slots = slots.len()))]
    pub async fn fetch_storage_proofs(
        &self,
        target: Address,
        slots: &[U256],
    ) -> Result<Vec<Arc<ZkSyncStorageProof>>> {
        let responses = try_join_all(slots.chunks(self.config.proof_batch_size.max(1)).map(|chunk| {
            send_retry(self.config.proof_retry_count, move || {
                self.provider.get_storage_proofs(target, chunk, self.batch)
            })
        }))
        .await?;
        let proofs: Vec<_> = responses
            .into_iter()
            .flat_map(|r| r.storage_proof)
            .map(Arc::new)
            .collect();
        if proofs.len() != slots.len() {
            return Err(ProverError::InvalidResponse(format!(
                "expected {} storage proofs, got {}",
                slots.len(),
                proofs.len()
            )));
        }
        debug!(%target, "fetched storage proofs");
        Ok(proofs)
    }

    async fn prove_bucket(&self, bucket: &Bucket) -> Result<Vec<(usize, Bytes)>> {
        let proofs = self
            .get_storage_proofs(bucket.target, &bucket.slot_values())
            .await?;
        Ok(bucket
            .slots
            .iter()
            .zip(&proofs)
            .map(|((_, id), proof)| (*id, encode_proof(proof)))
            .collect())
    }
}

#[async_trait]
impl<P: ZkSyncProvider + ?Sized + 'static> StorageBackend for ZkSyncProver<P> {
    fn limits(&self) -> &Limits {
        &self.config.limits
    }

    async fn is_contract(&self, target: Address) -> gatevm_asm::Result<bool> {
        let code_hash = self
            .get_storage(ZKSYNC_ACCOUNT_CODEHASH, address_slot(target), false)
            .await?;
        Ok(code_hash != B256::ZERO)
    }

    async fn get_storage(&self, target: Address, slot: U256, fast: bool) -> gatevm_asm::Result<B256> {
        let key = storage_key(target, slot);
        if let Some(entry) = self.proof_lru.touch(&key) {
            return Ok(entry.resolve().await?.value);
        }
        if fast || self.config.fast {
            let provider = self.provider.clone();
            let retries = self.config.proof_retry_count;
            let fetch = move || async move {
                send_retry(retries, || {
                    provider.get_storage_at(target, slot, BlockId::Latest)
                })
                .await
            };
            return Ok(self.storage_cache.get(key, fetch).await?);
        }
        let proofs = self.get_storage_proofs(target, &[slot]).await?;
        Ok(proofs.first().map(|proof| proof.value).unwrap_or_default())
    }

    async fn read_supplied_bytes(&self, target: Address, slot: U256) -> gatevm_asm::Result<Option<Bytes>> {
        Ok(self
            .read_bytes_at
            .read(self.provider.as_ref(), target, slot, BlockId::Latest)
            .await)
    }
}

#[async_trait]
impl<P: ZkSyncProvider + ?Sized + 'static> Prover for ZkSyncProver<P> {
    fn config(&self) -> &ProverConfig {
        &self.config
    }

    #[instrument(skip_all, fields(needs = needs.len()))]
    async fn prove(&self, needs: &[Need]) -> Result<ProofSequence> {
        let plan = reduce_needs(needs);
        self.check_proof_count(plan.len())?;
        let (buckets, hashed) = try_join!(
            try_join_all(plan.buckets.iter().map(|bucket| self.prove_bucket(bucket))),
            plan.resolve_hashed()
        )?;
        debug!(proofs = plan.len(), targets = plan.buckets.len(), "proved");
        Ok(plan.into_sequence(buckets.into_iter().flatten().chain(hashed)))
    }
}
