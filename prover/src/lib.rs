//! GateVM prover: turns the needs recorded by an evaluation into the
//! deduplicated proofs a verifier replays, and caches what it fetches.

pub mod cache;
pub mod config;
pub mod error;
pub mod eth;
pub mod prover;
pub mod provider;
pub mod test_utils;
pub mod zksync;

pub use cache::{CachedMap, CachedValue, ProofEntry, ProofLru, Resolvers, SharedResult};
pub use config::{CacheConfig, ProverConfig};
pub use error::{ProverError, Result};
pub use eth::{AccountProofs, EthProof, EthProver};
pub use prover::{proof_map, Bucket, ProofPlan, ProofSequence, ProofSequenceV1, Prover};
pub use provider::{
    send_retry, BlockId, EthAccountProof, EthGetProof, EthStorageProof, Provider,
    ReadBytesAtSupport, ZkSyncGetProof, ZkSyncProvider, ZkSyncStorageProof,
};
pub use zksync::{ZkSyncProver, ZKSYNC_ACCOUNT_CODEHASH};
