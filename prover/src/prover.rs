//! The prover capability and the reduction of needs into proof sequences.

use ahash::HashMap;
use alloy_primitives::{Address, Bytes, U256};
use async_trait::async_trait;
use futures::future::try_join_all;
use gatevm_asm::{Need, StorageBackend, Value};

use crate::{
    config::ProverConfig,
    error::{ProverError, Result},
};

/// Deduplicated proofs for one evaluation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProofSequence {
    /// Every distinct proof, in creation order.
    pub proofs: Vec<Bytes>,
    /// For each need, the index of its proof.
    pub order: Vec<u8>,
}

/// Legacy single-account proof layout.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProofSequenceV1 {
    pub account_proof: Bytes,
    pub storage_proofs: Vec<Bytes>,
}

/// Proofs requested from one account.
#[derive(Debug, Clone)]
pub struct Bucket {
    pub target: Address,
    /// Id of the account proof, if one was demanded.
    pub account: Option<usize>,
    /// Distinct slots with their proof ids, in first-demand order.
    pub slots: Vec<(U256, usize)>,
    slot_ids: HashMap<U256, usize>,
}

impl Bucket {
    pub fn slot_values(&self) -> Vec<U256> {
        self.slots.iter().map(|(slot, _)| *slot).collect()
    }
}

/// An ordered needs list reduced to distinct proofs.
///
/// Ids are assigned in creation order; `order` maps every need to one.
#[derive(Debug, Clone, Default)]
pub struct ProofPlan {
    count: usize,
    pub order: Vec<usize>,
    pub buckets: Vec<Bucket>,
    bucket_ids: HashMap<Address, usize>,
    /// Shared id of proofs that are known to be empty.
    pub null: Option<usize>,
    /// Supplied values, proven by the verifier against their hash.
    pub hashed: Vec<(usize, Value)>,
}

impl ProofPlan {
    /// Number of distinct proofs.
    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    fn create(&mut self) -> usize {
        self.count += 1;
        self.count - 1
    }

    pub fn null_ref(&mut self) -> usize {
        match self.null {
            Some(id) => id,
            None => {
                let id = self.create();
                self.null = Some(id);
                id
            }
        }
    }

    /// Index into `buckets` of the bucket for `target`.
    pub fn bucket(&mut self, target: Address) -> usize {
        if let Some(index) = self.bucket_ids.get(&target) {
            return *index;
        }
        let index = self.buckets.len();
        self.buckets.push(Bucket {
            target,
            account: None,
            slots: Vec::new(),
            slot_ids: HashMap::default(),
        });
        self.bucket_ids.insert(target, index);
        index
    }

    pub fn account_ref(&mut self, bucket: usize) -> usize {
        if let Some(id) = self.buckets[bucket].account {
            return id;
        }
        let id = self.create();
        self.buckets[bucket].account = Some(id);
        id
    }

    pub fn slot_ref(&mut self, bucket: usize, slot: U256) -> usize {
        if let Some(id) = self.buckets[bucket].slot_ids.get(&slot) {
            return *id;
        }
        let id = self.create();
        let bucket = &mut self.buckets[bucket];
        bucket.slots.push((slot, id));
        bucket.slot_ids.insert(slot, id);
        id
    }

    pub fn hashed_ref(&mut self, value: Value) -> usize {
        let id = self.create();
        self.hashed.push((id, value));
        id
    }

    /// Account-and-storage reduction for trie-proven chains.
    ///
    /// A target need yields the account proof of its bucket and makes it
    /// current; a slot need yields a proof in the current bucket, or the null
    /// proof when nothing was targeted yet.
    pub fn reduce(needs: &[Need]) -> Self {
        let mut plan = Self::default();
        let mut current = None;
        for need in needs {
            let id = match need {
                Need::Target(need) => {
                    let bucket = plan.bucket(need.target);
                    current = Some(bucket);
                    plan.account_ref(bucket)
                }
                Need::Slot(slot) => match current {
                    Some(bucket) => plan.slot_ref(bucket, *slot),
                    None => plan.null_ref(),
                },
                // the verifier checks the hash
                Need::Hashed(need) => plan.hashed_ref(need.value.clone()),
            };
            plan.order.push(id);
        }
        plan
    }

    /// Resolves every hashed value with its id.
    pub async fn resolve_hashed(&self) -> Result<Vec<(usize, Bytes)>> {
        try_join_all(self.hashed.iter().map(|(id, value)| async move {
            Ok::<_, ProverError>((*id, value.resolve().await?))
        }))
        .await
    }

    /// Assembles the sequence from `(id, proof)` pairs. Ids never filled
    /// stay empty.
    pub fn into_sequence(self, filled: impl IntoIterator<Item = (usize, Bytes)>) -> ProofSequence {
        let mut proofs = vec![Bytes::new(); self.count];
        for (id, proof) in filled {
            if let Some(slot) = proofs.get_mut(id) {
                *slot = proof;
            }
        }
        // ids fit once the count was checked against max_unique_proofs
        let order = self.order.into_iter().map(|id| id as u8).collect();
        ProofSequence { proofs, order }
    }
}

/// A proof strategy for one chain state.
///
/// Implementations answer the interpreter's reads for a fixed block or batch
/// and turn the needs of an evaluation into proofs the verifier accepts.
#[async_trait]
pub trait Prover: StorageBackend {
    fn config(&self) -> &ProverConfig;

    /// Proves `needs` in order.
    async fn prove(&self, needs: &[Need]) -> Result<ProofSequence>;

    /// Proves `needs` in the single-account layout: a target followed only
    /// by its slots.
    async fn prove_v1(&self, needs: &[Need]) -> Result<ProofSequenceV1> {
        check_v1_needs(needs)?;
        let ProofSequence { proofs, order } = self.prove(needs).await?;
        let Some((account, storage)) = order.split_first() else {
            return Err(ProverError::InvalidV1Needs("expected needs"));
        };
        let proof = |id: &u8| proofs.get(usize::from(*id)).cloned().unwrap_or_default();
        Ok(ProofSequenceV1 {
            account_proof: proof(account),
            storage_proofs: storage.iter().map(proof).collect(),
        })
    }

    /// Fails when one response would carry more than `max_unique_proofs`.
    fn check_proof_count(&self, count: usize) -> Result<()> {
        let max = self.config().max_unique_proofs.min(256);
        if count > max {
            return Err(ProverError::TooManyProofs { count, max });
        }
        Ok(())
    }
}

/// Groups cache keys into targets with their slots, in key order.
pub fn proof_map(keys: impl IntoIterator<Item = String>) -> Vec<(Address, Vec<U256>)> {
    let mut map: Vec<(Address, Vec<U256>)> = Vec::new();
    let mut index: HashMap<Address, usize> = HashMap::default();
    for key in keys {
        let Some(target) = key.get(..42).and_then(|s| s.parse::<Address>().ok()) else {
            continue;
        };
        let bucket = *index.entry(target).or_insert_with(|| {
            map.push((target, Vec::new()));
            map.len() - 1
        });
        if key.len() > 42 {
            if let Ok(slot) = U256::from_str_radix(&key[42..], 16) {
                map[bucket].1.push(slot);
            }
        }
    }
    map
}

fn check_v1_needs(needs: &[Need]) -> Result<()> {
    let Some((first, rest)) = needs.split_first() else {
        return Err(ProverError::InvalidV1Needs("expected needs"));
    };
    if !first.is_target() {
        return Err(ProverError::InvalidV1Needs("first need must be account"));
    }
    if rest.iter().any(|need| need.as_slot().is_none()) {
        return Err(ProverError::InvalidV1Needs(
            "remaining needs must be storage",
        ));
    }
    Ok(())
}
