use std::time::Duration;

use gatevm_asm::Limits;
use serde::{Deserialize, Serialize};

/// Settings of a [`CachedMap`](crate::cache::CachedMap).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// How long a successful fetch stays cached. Zero only coalesces
    /// in-flight fetches.
    pub ttl: Duration,
    /// How long a failed fetch stays cached. Defaults to a quarter of `ttl`.
    pub error_ttl: Option<Duration>,
    /// Minimum delay between two sweeps of expired entries.
    pub slop: Duration,
    /// Settled entries kept before the oldest are evicted.
    pub max_cached: usize,
    /// Fetches allowed in flight at once.
    pub max_pending: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(60),
            error_ttl: None,
            slop: Duration::from_millis(50),
            max_cached: 10000,
            max_pending: 100,
        }
    }
}

impl CacheConfig {
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            ttl,
            ..Default::default()
        }
    }

    pub fn error_ttl(&self) -> Duration {
        self.error_ttl
            .unwrap_or_else(|| Duration::from_millis((self.ttl.as_millis() as u64).div_ceil(4)))
    }
}

/// Settings shared by every prover.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProverConfig {
    /// Ceilings enforced while evaluating programs.
    pub limits: Limits,
    /// Maximum proofs (accounts and slots) in one response. At most 256, the
    /// order entries are single bytes.
    pub max_unique_proofs: usize,
    /// Maximum slots requested per proof call.
    pub proof_batch_size: usize,
    /// Answer reads from the node (`eth_getCode`, `eth_getStorageAt`) until a
    /// proof is cached.
    pub fast: bool,
    /// Additional attempts for a failed proof call.
    pub proof_retry_count: usize,
    /// Proofs remembered across requests.
    pub proof_cache_size: usize,
    /// Cache for fast-path reads.
    pub cache: CacheConfig,
}

impl Default for ProverConfig {
    fn default() -> Self {
        Self {
            limits: Limits::default(),
            max_unique_proofs: 128,
            proof_batch_size: 64,
            fast: true,
            proof_retry_count: 0,
            proof_cache_size: 10000,
            cache: CacheConfig::default(),
        }
    }
}
