//! Solidity storage layout rules.
//!
//! See <https://docs.soliditylang.org/en/latest/internals/layout_in_storage.html>.

use alloy_primitives::{keccak256, B256, U256};

/// Slot of `mapping[key]` for a mapping rooted at `slot`.
pub fn solidity_follow_slot(slot: U256, key: &[u8]) -> U256 {
    let mut buf = Vec::with_capacity(key.len() + 32);
    buf.extend_from_slice(key);
    buf.extend_from_slice(&slot.to_be_bytes::<32>());
    U256::from_be_bytes(keccak256(buf).0)
}

/// First `length` data slots of the dynamic array (or long `bytes`) rooted
/// at `slot`.
pub fn solidity_array_slots(slot: U256, length: usize) -> Vec<U256> {
    if length == 0 {
        return Vec::new();
    }
    let base = U256::from_be_bytes(keccak256(slot.to_be_bytes::<32>()).0);
    (0..length)
        .map(|i| base.wrapping_add(U256::from(i)))
        .collect()
}

/// Consecutive slots `[slot, slot + length)`.
pub fn slot_range(slot: U256, length: usize) -> Vec<U256> {
    (0..length)
        .map(|i| slot.wrapping_add(U256::from(i)))
        .collect()
}

/// Layout of a `bytes`/`string` header word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BytesHeader {
    /// Fewer than 32 bytes, stored inline in the header.
    Short(usize),
    /// Byte count, stored across `ceil(size / 32)` data slots.
    Long(U256),
}

impl BytesHeader {
    pub fn decode(header: &B256) -> Self {
        let last = header[31];
        if last & 1 == 0 {
            Self::Short((last >> 1) as usize)
        } else {
            Self::Long(U256::from_be_bytes(header.0) >> 1)
        }
    }
}
