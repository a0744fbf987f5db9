//! Caches in front of the provider: a keyed single-flight cache with TTLs, a
//! single-value variant, and the proof LRU with its manual coalescing handle.

mod cached_map;
mod cached_value;
mod proof_lru;
mod resolvers;

pub use cached_map::CachedMap;
pub use cached_value::CachedValue;
pub use proof_lru::{ProofEntry, ProofLru};
pub use resolvers::{Resolvers, SharedResult};

use alloy_primitives::{Address, U256};

/// Key of an account proof: the lowercase hex address.
pub fn account_key(target: Address) -> String {
    format!("{target:#x}")
}

/// Key of a storage proof: the account key followed by the unpadded hex slot.
pub fn storage_key(target: Address, slot: U256) -> String {
    format!("{target:#x}{slot:x}")
}
