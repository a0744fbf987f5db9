//! Prover for chains with Ethereum's account and storage tries.

use std::sync::Arc;

use alloy_primitives::{Address, Bytes, B256, U256};
use alloy_sol_types::SolValue;
use async_trait::async_trait;
use futures::{future::try_join_all, try_join, FutureExt};
use gatevm_asm::{Limits, Need, StorageBackend};
use tracing::{debug, instrument};

use crate::{
    cache::{account_key, storage_key, CachedMap, ProofLru, Resolvers},
    config::ProverConfig,
    error::{ProverError, Result},
    prover::{proof_map, Bucket, ProofPlan, ProofSequence, Prover},
    provider::{
        send_retry, BlockId, EthAccountProof, EthStorageProof, Provider, ReadBytesAtSupport,
    },
};

/// A cached `eth_getProof` fragment.
#[derive(Debug, Clone)]
pub enum EthProof {
    Account(Arc<EthAccountProof>),
    Storage(Arc<EthStorageProof>),
}

/// An account proof with the proofs of some of its slots.
#[derive(Debug, Clone)]
pub struct AccountProofs {
    pub account: Arc<EthAccountProof>,
    /// In the order the slots were requested.
    pub storage: Vec<Arc<EthStorageProof>>,
}

/// ABI `bytes[]` of trie nodes.
pub fn encode_proof(nodes: &[Bytes]) -> Bytes {
    Bytes::from(nodes.to_vec().abi_encode())
}

/// Proves state at one block through `eth_getProof`.
pub struct EthProver<P: ?Sized> {
    provider: Arc<P>,
    block: BlockId,
    config: ProverConfig,
    proof_lru: ProofLru<EthProof>,
    code_cache: CachedMap<String, bool>,
    storage_cache: CachedMap<String, B256>,
    read_bytes_at: ReadBytesAtSupport,
}

impl<P: Provider + ?Sized + 'static> EthProver<P> {
    pub fn new(provider: Arc<P>, block: BlockId) -> Self {
        Self::with_config(provider, block, ProverConfig::default())
    }

    pub fn with_config(provider: Arc<P>, block: BlockId, config: ProverConfig) -> Self {
        Self {
            proof_lru: ProofLru::new(config.proof_cache_size),
            code_cache: CachedMap::new(config.cache.clone()),
            storage_cache: CachedMap::new(config.cache.clone()),
            read_bytes_at: ReadBytesAtSupport::default(),
            provider,
            block,
            config,
        }
    }

    pub fn provider(&self) -> &Arc<P> {
        &self.provider
    }

    pub fn block(&self) -> BlockId {
        self.block
    }

    pub fn proof_lru(&self) -> &ProofLru<EthProof> {
        &self.proof_lru
    }

    /// Starts expiring the fast-path caches. Must be called inside a tokio
    /// runtime.
    pub fn start(&self) {
        self.code_cache.start();
        self.storage_cache.start();
    }

    pub fn stop(&self) {
        self.code_cache.stop();
        self.storage_cache.stop();
    }

    /// Cached targets with their cached slots.
    pub fn proof_map(&self) -> Vec<(Address, Vec<U256>)> {
        proof_map(self.proof_lru.keys())
    }

    /// Proofs of `target` and `slots`, fetching only what is neither cached
    /// nor already being fetched.
    ///
    /// Missing keys are blocked in the LRU before the fetch starts so that
    /// concurrent callers wait for it instead of issuing their own.
    pub async fn get_proofs(&self, target: Address, slots: &[U256]) -> Result<AccountProofs> {
        let blocker = Resolvers::<Arc<AccountProofs>>::new();
        let mut installed = Vec::new();

        let key = account_key(target);
        let account = self.proof_lru.touch(&key);
        if account.is_none() {
            let future = blocker
                .future()
                .map(|proofs| proofs.map(|p| EthProof::Account(p.account.clone())))
                .boxed()
                .shared();
            self.proof_lru.set_future(key.clone(), future.clone());
            installed.push((key, future));
        }

        let mut missing = Vec::new();
        let storage: Vec<_> = slots
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
                            proofs.and_then(|p| {
                                p.storage
                                    .get(index)
                                    .cloned()
                                    .map(EthProof::Storage)
                                    .ok_or(ProverError::Cancelled)
                            })
                        })
                        .boxed()
                        .shared();
                    self.proof_lru.set_future(key.clone(), future.clone());
                    installed.push((key, future));
                }
                entry
            })
            .collect();

        let fetched = if account.is_none() || !missing.is_empty() {
            match self.fetch_proofs(target, &missing).await {
                Ok(proofs) => {
                    let proofs = Arc::new(proofs);
                    self.proof_lru
                        .set(account_key(target), EthProof::Account(proofs.account.clone()));
                    for (slot, proof) in missing.iter().zip(&proofs.storage) {
                        self.proof_lru
                            .set(storage_key(target, *slot), EthProof::Storage(proof.clone()));
                    }
                    blocker.resolve(proofs.clone());
                    Some(proofs)
                }
                Err(err) => {
                    blocker.reject(err.clone());
                    for (key, future) in &installed {
                        self.proof_lru.remove_pending(key, future);
                    }
                    return Err(err);
                }
            }
        } else {
            None
        };

        // a fresh account proof wins over a sibling's placeholder
        let account = match (&fetched, account) {
            (Some(fetched), _) => fetched.account.clone(),
            (None, Some(entry)) => match entry.resolve().await? {
                EthProof::Account(account) => account,
                EthProof::Storage(_) => return Err(mismatch(target)),
            },
            (None, None) => return Err(ProverError::Cancelled),
        };
        let mut index = 0;
        let storage = try_join_all(storage.into_iter().map(|entry| {
            let own = match &entry {
                Some(_) => None,
                None => {
                    index += 1;
                    fetched
                        .as_ref()
                        .and_then(|f| f.storage.get(index - 1).cloned())
                }
            };
            async move {
                match (entry, own) {
                    (Some(entry), _) => match entry.resolve().await? {
                        EthProof::Storage(proof) => Ok(proof),
                        EthProof::Account(_) => Err(mismatch(target)),
                    },
                    (None, Some(proof)) => Ok(proof),
                    (None, None) => Err(ProverError::Cancelled),
                }
            }
        }))
        .await?;
        Ok(AccountProofs { account, storage })
    }

    /// Requests `slots` in chunks of `proof_batch_size`, always issuing at
    /// least one call so the account proof comes back.
    #[instrument(skip(self, slots), fields(slots = slots.len()))]
    pub async fn fetch_proofs(&self, target: Address, slots: &[U256]) -> Result<AccountProofs> {
        let chunks: Vec<&[U256]> = if slots.is_empty() {
            vec![slots]
        } else {
            slots.chunks(self.config.proof_batch_size.max(1)).collect()
        };
        let responses = try_join_all(chunks.into_iter().map(|chunk| {
            send_retry(self.config.proof_retry_count, move || {
                self.provider.get_proof(target, chunk, self.block)
            })
        }))
        .await?;

        let mut responses = responses.into_iter();
        let Some(first) = responses.next() else {
            return Err(ProverError::InvalidResponse("no proof".into()));
        };
        let account = Arc::new(first.account);
        let storage: Vec<_> = first
            .storage_proof
            .into_iter()
            .chain(responses.flat_map(|r| r.storage_proof))
            .map(Arc::new)
            .collect();
        if storage.len() != slots.len() {
            return Err(ProverError::InvalidResponse(format!(
                "expected {} storage proofs, got {}",
                slots.len(),
                storage.len()
            )));
        }
        debug!(%target, "fetched proofs");
        Ok(AccountProofs { account, storage })
    }

    async fn prove_bucket(&self, bucket: &Bucket) -> Result<Vec<(usize, Bytes)>> {
        // a known non-contract proves its slots empty by itself
        let known_empty = match self.proof_lru.peek(&account_key(bucket.target)) {
            Some(entry) => matches!(
                entry.resolve().await,
                Ok(EthProof::Account(account)) if !account.is_contract()
            ),
            None => false,
        };
        let slots = if known_empty { &[][..] } else { &bucket.slots[..] };
        let values: Vec<_> = slots.iter().map(|(slot, _)| *slot).collect();
        let proofs = self.get_proofs(bucket.target, &values).await?;

        let mut filled = Vec::with_capacity(slots.len() + 1);
        if let Some(id) = bucket.account {
            filled.push((id, encode_proof(&proofs.account.account_proof)));
        }
        if proofs.account.is_contract() {
            for ((_, id), proof) in slots.iter().zip(&proofs.storage) {
                filled.push((*id, encode_proof(&proof.proof)));
            }
        }
        Ok(filled)
    }
}

fn mismatch(target: Address) -> ProverError {
    ProverError::InvalidResponse(format!("cached proof kind mismatch for {target}"))
}

#[async_trait]
impl<P: Provider + ?Sized + 'static> StorageBackend for EthProver<P> {
    fn limits(&self) -> &Limits {
        &self.config.limits
    }

    async fn is_contract(&self, target: Address) -> gatevm_asm::Result<bool> {
        if self.config.fast {
            let provider = self.provider.clone();
            let (block, retries) = (self.block, self.config.proof_retry_count);
            let fetch = move || async move {
                let code = send_retry(retries, || provider.get_code(target, block)).await?;
                Ok::<_, ProverError>(!code.is_empty())
            };
            return Ok(self.code_cache.get(account_key(target), fetch).await?);
        }
        Ok(self.get_proofs(target, &[]).await?.account.is_contract())
    }

    async fn get_storage(&self, target: Address, slot: U256, fast: bool) -> gatevm_asm::Result<B256> {
        if let Some(entry) = self.proof_lru.touch(&account_key(target)) {
            if let EthProof::Account(account) = entry.resolve().await? {
                if !account.is_contract() {
                    return Ok(B256::ZERO);
                }
            }
        }
        let key = storage_key(target, slot);
        if let Some(entry) = self.proof_lru.touch(&key) {
            if let EthProof::Storage(proof) = entry.resolve().await? {
                return Ok(B256::from(proof.value.to_be_bytes::<32>()));
            }
        }
        if fast || self.config.fast {
            let provider = self.provider.clone();
            let (block, retries) = (self.block, self.config.proof_retry_count);
            let fetch = move || async move {
                send_retry(retries, || provider.get_storage_at(target, slot, block)).await
            };
            return Ok(self.storage_cache.get(key, fetch).await?);
        }
        let proofs = self.get_proofs(target, &[slot]).await?;
        let value = proofs
            .storage
            .first()
            .map(|proof| B256::from(proof.value.to_be_bytes::<32>()))
            .unwrap_or_default();
        Ok(value)
    }

    async fn read_supplied_bytes(&self, target: Address, slot: U256) -> gatevm_asm::Result<Option<Bytes>> {
        Ok(self
            .read_bytes_at
            .read(self.provider.as_ref(), target, slot, self.block)
            .await)
    }
}

#[async_trait]
impl<P: Provider + ?Sized + 'static> Prover for EthProver<P> {
    fn config(&self) -> &ProverConfig {
        &self.config
    }

    #[instrument(skip_all, fields(needs = needs.len()))]
    async fn prove(&self, needs: &[Need]) -> Result<ProofSequence> {
        let plan = ProofPlan::reduce(needs);
        self.check_proof_count(plan.len())?;
        let (buckets, hashed) = try_join!(
            try_join_all(plan.buckets.iter().map(|bucket| self.prove_bucket(bucket))),
            plan.resolve_hashed()
        )?;
        debug!(proofs = plan.len(), targets = plan.buckets.len(), "proved");
        Ok(plan.into_sequence(buckets.into_iter().flatten().chain(hashed)))
    }
}
