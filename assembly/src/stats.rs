use strum::EnumCount;
use tracing::debug;

use crate::opcodes::{Opcode, ALL_OPCODES};

/// Number of times each opcode ran during one top-level evaluation,
/// nested evaluations included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpcodeStats {
    counts: [u64; Opcode::COUNT],
    literals: u64,
}

impl Default for OpcodeStats {
    fn default() -> Self {
        Self {
            counts: [0; Opcode::COUNT],
            literals: 0,
        }
    }
}

impl OpcodeStats {
    pub(crate) fn record(&mut self, opcode: Opcode) {
        if let Some(count) = self.counts.get_mut(opcode.index()) {
            *count += 1;
        }
    }

    pub(crate) fn record_literal(&mut self) {
        self.literals += 1;
    }

    pub fn count(&self, opcode: Opcode) -> u64 {
        self.counts.get(opcode.index()).copied().unwrap_or_default()
    }

    pub const fn literals(&self) -> u64 {
        self.literals
    }

    /// Instructions executed, inline literals included.
    pub fn total(&self) -> u64 {
        self.counts.iter().sum::<u64>() + self.literals
    }

    pub fn log(&self) {
        for (opcode, count) in ALL_OPCODES.iter().zip(self.counts) {
            if count == 0 {
                continue;
            }
            let name: &'static str = (*opcode).into();
            debug!(opcode = name, count, "opcode stats");
        }
        debug!(literals = self.literals, total = self.total(), "opcode stats");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts() {
        let mut stats = OpcodeStats::default();
        stats.record(Opcode::Plus);
        stats.record(Opcode::Plus);
        stats.record(Opcode::Debug);
        stats.record_literal();
        assert_eq!(stats.count(Opcode::Plus), 2);
        assert_eq!(stats.count(Opcode::Debug), 1);
        assert_eq!(stats.count(Opcode::Keccak), 0);
        assert_eq!(stats.total(), 4);
    }
}
