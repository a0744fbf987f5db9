use alloy_primitives::{Address, Bytes, B256, U256};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Hard ceilings enforced while a program runs.
///
/// Every violation aborts the evaluation before any further storage read is
/// issued.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Limits {
    /// Maximum number of values on a machine stack.
    pub max_stack_size: usize,
    /// Maximum number of distinct `TARGET` addresses per evaluation.
    pub max_unique_targets: usize,
    /// Maximum bytes from a single proven read (`READ_SLOTS`, `READ_BYTES`,
    /// `READ_ARRAY`).
    pub max_provable_bytes: usize,
    /// Maximum bytes from a single unproven read (`READ_HASHED_BYTES`).
    pub max_supplied_bytes: usize,
    /// Maximum bytes produced by `PUSH_BYTES`, `CONCAT` or `SLICE`.
    pub max_assemble_bytes: usize,
    /// Maximum nesting of `EVAL_INLINE`/`EVAL_LOOP`.
    pub max_eval_depth: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_stack_size: 64,
            max_unique_targets: 32,
            max_provable_bytes: 64 << 5,
            // ~420KB at 30m gas
            max_supplied_bytes: 13125 << 5,
            max_assemble_bytes: 1 << 20,
            max_eval_depth: 5,
        }
    }
}

/// Chain state the interpreter reads through.
///
/// Implementations decide how values are obtained (trusted RPC reads or
/// proofs) for a fixed block or batch; the interpreter never picks one.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    fn limits(&self) -> &Limits;

    async fn is_contract(&self, target: Address) -> Result<bool>;

    /// Reads one storage word. `fast` allows answering from the RPC node
    /// instead of a proof.
    async fn get_storage(&self, target: Address, slot: U256, fast: bool) -> Result<B256>;

    /// Reads a dynamic byte field straight from the target, bypassing the
    /// storage layout. `None` when the target does not support it.
    async fn read_supplied_bytes(&self, _target: Address, _slot: U256) -> Result<Option<Bytes>> {
        Ok(None)
    }
}
