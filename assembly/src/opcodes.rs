use num_enum::{IntoPrimitive, TryFromPrimitive};
use strum::EnumCount;
use strum_macros::{EnumCount, IntoStaticStr};

/// Largest inline literal: any byte `b <= PUSH_MAX` pushes the next `b` bytes.
pub const PUSH_MAX: u8 = 32;

#[derive(
    Debug,
    Clone,
    Copy,
    EnumCount,
    IntoStaticStr,
    TryFromPrimitive,
    IntoPrimitive,
    PartialEq,
    Eq,
    Hash,
)]
#[repr(u8)]
// Discriminants are part of the wire protocol and must match the verifier.
pub enum Opcode {
    // Push instructions
    PushBytes = 40,
    PushStack = 41,
    PushOutput = 42,
    PushSlot = 43,
    PushTarget = 44,
    PushStackSize = 45,

    // Machine instructions
    Target = 50,
    SetOutput = 51,
    EvalLoop = 52,
    EvalInline = 53,
    ReqContract = 54,
    ReqNonzero = 55,

    // Storage reads
    ReadSlot = 60,
    ReadBytes = 61,
    ReadArray = 62,
    ReadHashedBytes = 63,
    ReadSlots = 64,

    // Slot register
    Slot = 70,
    SlotAdd = 71,
    SlotFollow = 72,

    // Stack manipulation
    Dup = 80,
    Pop = 81,
    Swap = 82,

    // Byte operations
    Keccak = 90,
    Concat = 91,
    Slice = 92,
    Length = 93,

    // Arithmetic
    Plus = 100,
    Times = 101,
    Divide = 102,
    Mod = 103,

    // Bitwise
    And = 110,
    Or = 111,
    Xor = 112,
    ShiftLeft = 113,
    ShiftRight = 114,
    Not = 115,

    // Comparison
    IsZero = 120,
    Eq = 121,
    Lt = 122,
    Gt = 123,

    Debug = 255,
}

impl Opcode {
    pub const OP_COUNT: usize = Self::COUNT;

    /// Dense index of this opcode, used to key per-opcode tables.
    pub fn index(&self) -> usize {
        ALL_OPCODES
            .iter()
            .position(|op| op == self)
            .unwrap_or(Self::OP_COUNT)
    }
}

pub(crate) const ALL_OPCODES: [Opcode; Opcode::COUNT] = [
    Opcode::PushBytes,
    Opcode::PushStack,
    Opcode::PushOutput,
    Opcode::PushSlot,
    Opcode::PushTarget,
    Opcode::PushStackSize,
    Opcode::Target,
    Opcode::SetOutput,
    Opcode::EvalLoop,
    Opcode::EvalInline,
    Opcode::ReqContract,
    Opcode::ReqNonzero,
    Opcode::ReadSlot,
    Opcode::ReadBytes,
    Opcode::ReadArray,
    Opcode::ReadHashedBytes,
    Opcode::ReadSlots,
    Opcode::Slot,
    Opcode::SlotAdd,
    Opcode::SlotFollow,
    Opcode::Dup,
    Opcode::Pop,
    Opcode::Swap,
    Opcode::Keccak,
    Opcode::Concat,
    Opcode::Slice,
    Opcode::Length,
    Opcode::Plus,
    Opcode::Times,
    Opcode::Divide,
    Opcode::Mod,
    Opcode::And,
    Opcode::Or,
    Opcode::Xor,
    Opcode::ShiftLeft,
    Opcode::ShiftRight,
    Opcode::Not,
    Opcode::IsZero,
    Opcode::Eq,
    Opcode::Lt,
    Opcode::Gt,
    Opcode::Debug,
];

/// Terminal status of an evaluation.
///
/// Non-success codes are valid short-circuit outcomes that the verifier
/// branches on, not errors.
#[derive(Debug, Clone, Copy, Default, TryFromPrimitive, IntoPrimitive, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ExitCode {
    #[default]
    Success = 0,
    IsZero = 253,
    NotAContract = 254,
}

impl ExitCode {
    pub const fn is_success(&self) -> bool {
        matches!(self, ExitCode::Success)
    }
}

/// Flags byte trailing an `EVAL_LOOP` opcode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopFlags(pub u8);

impl LoopFlags {
    pub const STOP_ON_SUCCESS: u8 = 1 << 0;
    pub const STOP_ON_FAILURE: u8 = 1 << 1;
    pub const ACQUIRE_STATE: u8 = 1 << 2;
    pub const KEEP_ARGS: u8 = 1 << 3;

    pub const fn contains(&self, flag: u8) -> bool {
        self.0 & flag != 0
    }

    /// Whether a child that finished with `exit_code` breaks the loop.
    pub const fn stops_on(&self, exit_code: ExitCode) -> bool {
        if exit_code.is_success() {
            self.contains(Self::STOP_ON_SUCCESS)
        } else {
            self.contains(Self::STOP_ON_FAILURE)
        }
    }
}
