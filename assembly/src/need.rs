use alloy_primitives::{Address, U256};

use crate::value::Value;

/// An account whose inclusion must be proven.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TargetNeed {
    pub target: Address,
    /// Set once the program asserted that the target is a contract.
    pub required: bool,
}

/// Bytes bound to the request only by a hash the verifier checks.
#[derive(Debug, Clone)]
pub struct HashedNeed {
    pub hash: Value,
    pub value: Value,
}

/// One proof obligation, in the order the program demanded it.
#[derive(Debug, Clone)]
pub enum Need {
    Target(TargetNeed),
    /// A storage slot of the most recently targeted account.
    Slot(U256),
    Hashed(HashedNeed),
}

impl Need {
    pub const fn is_target(&self) -> bool {
        matches!(self, Need::Target(_))
    }

    pub const fn as_slot(&self) -> Option<U256> {
        match self {
            Need::Slot(slot) => Some(*slot),
            _ => None,
        }
    }
}

impl From<TargetNeed> for Need {
    fn from(need: TargetNeed) -> Self {
        Need::Target(need)
    }
}

impl From<U256> for Need {
    fn from(slot: U256) -> Self {
        Need::Slot(slot)
    }
}
