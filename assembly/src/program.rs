//! Program builder.
//!
//! A [`Program`] is a flat opcode stream. Bytes `0..=32` are inline literals
//! (`b` followed by `b` raw bytes), everything above is an [`Opcode`]. A
//! [`Request`] is a program whose first byte is the number of outputs.

use std::ops::Deref;

use alloy_primitives::{Address, Bytes, U256};
use thiserror::Error;

use crate::opcodes::{LoopFlags, Opcode};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProgramError {
    #[error("expected byte: {0}")]
    ByteOverflow(usize),

    #[error("invalid capacity: {requested} < {current}")]
    InvalidCapacity { requested: usize, current: usize },

    #[error("output overflow: {0}")]
    OutputOverflow(usize),
}

/// Options for [`Program::eval_loop`].
#[derive(Debug, Clone, Copy, Default)]
pub struct LoopOptions {
    pub success: bool,
    pub failure: bool,
    pub acquire: bool,
    pub keep: bool,
    /// Iteration bound, defaults to 255.
    pub count: Option<usize>,
}

impl LoopOptions {
    pub fn flags(&self) -> LoopFlags {
        let mut flags = 0;
        if self.success {
            flags |= LoopFlags::STOP_ON_SUCCESS;
        }
        if self.failure {
            flags |= LoopFlags::STOP_ON_FAILURE;
        }
        if self.acquire {
            flags |= LoopFlags::ACQUIRE_STATE;
        }
        if self.keep {
            flags |= LoopFlags::KEEP_ARGS;
        }
        LoopFlags(flags)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Program {
    ops: Vec<u8>,
}

impl Program {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ops(&self) -> &[u8] {
        &self.ops
    }

    pub fn encode(&self) -> Bytes {
        Bytes::copy_from_slice(&self.ops)
    }

    pub fn op(self, op: Opcode) -> Self {
        self.add_byte(op.into())
    }

    fn add_byte(mut self, b: u8) -> Self {
        self.ops.push(b);
        self
    }

    fn add_bytes(mut self, v: &[u8]) -> Self {
        self.ops.extend_from_slice(v);
        self
    }

    /// Appends a small-string operand. Labels longer than a byte can count
    /// are rejected.
    pub fn debug(self, label: &str) -> Result<Self, ProgramError> {
        let v = label.as_bytes();
        let n = u8::try_from(v.len()).map_err(|_| ProgramError::ByteOverflow(v.len()))?;
        Ok(self.op(Opcode::Debug).add_byte(n).add_bytes(v))
    }

    /// Pushes `x` as the shortest big-endian inline literal.
    pub fn push(self, x: U256) -> Self {
        let v = x.to_be_bytes_trimmed_vec();
        self.add_byte(v.len() as u8).add_bytes(&v)
    }

    pub fn push_bool(self, b: bool) -> Self {
        self.push(U256::from(b as u8))
    }

    pub fn push_address(self, address: Address) -> Self {
        self.push(U256::from_be_slice(address.as_slice()))
    }

    /// Pushes arbitrary bytes verbatim (not padded).
    pub fn push_bytes(self, v: &[u8]) -> Self {
        self.op(Opcode::PushBytes).push(U256::from(v.len())).add_bytes(v)
    }

    pub fn push_str(self, s: &str) -> Self {
        self.push_bytes(s.as_bytes())
    }

    pub fn push_program(self, program: &Program) -> Self {
        self.push_bytes(&program.ops)
    }

    pub fn push_slot(self) -> Self {
        self.op(Opcode::PushSlot)
    }

    pub fn push_target(self) -> Self {
        self.op(Opcode::PushTarget)
    }

    pub fn push_stack_size(self) -> Self {
        self.op(Opcode::PushStackSize)
    }

    pub fn push_output(self, i: usize) -> Self {
        self.push(U256::from(i)).op(Opcode::PushOutput)
    }

    pub fn push_stack(self, i: usize) -> Self {
        self.push(U256::from(i)).op(Opcode::PushStack)
    }

    pub fn target(self) -> Self {
        self.op(Opcode::Target)
    }

    pub fn set_target(self, address: Address) -> Self {
        self.push_address(address).target()
    }

    pub fn output(self) -> Self {
        self.op(Opcode::SetOutput)
    }

    pub fn set_output(self, i: usize) -> Self {
        self.push(U256::from(i)).output()
    }

    pub fn slot(self) -> Self {
        self.op(Opcode::Slot)
    }

    pub fn set_slot(self, x: U256) -> Self {
        self.push(x).slot()
    }

    pub fn add_slot(self) -> Self {
        self.op(Opcode::SlotAdd)
    }

    pub fn offset(self, x: U256) -> Self {
        self.push(x).add_slot()
    }

    pub fn follow(self) -> Self {
        self.op(Opcode::SlotFollow)
    }

    /// Moves into element `top-of-stack` of the dynamic array at the current
    /// slot.
    pub fn follow_index(self) -> Self {
        self.push_slot().keccak().slot().add_slot()
    }

    pub fn read(self, n: usize) -> Self {
        if n == 1 {
            self.op(Opcode::ReadSlot)
        } else {
            self.push(U256::from(n)).op(Opcode::ReadSlots)
        }
    }

    pub fn read_bytes(self) -> Self {
        self.op(Opcode::ReadBytes)
    }

    pub fn read_hashed_bytes(self) -> Self {
        self.op(Opcode::ReadHashedBytes)
    }

    pub fn read_array(self, step: usize) -> Self {
        self.push(U256::from(step)).op(Opcode::ReadArray)
    }

    pub fn require_contract(self) -> Self {
        self.op(Opcode::ReqContract)
    }

    pub fn require_nonzero(self) -> Self {
        self.op(Opcode::ReqNonzero)
    }

    pub fn eval_inline(self) -> Self {
        self.op(Opcode::EvalInline)
    }

    pub fn eval_loop(self, opts: LoopOptions) -> Self {
        let flags = opts.flags();
        self.push(U256::from(opts.count.unwrap_or(255)))
            .op(Opcode::EvalLoop)
            .add_byte(flags.0)
    }

    pub fn pop(self) -> Self {
        self.op(Opcode::Pop)
    }

    pub fn dup(self, back: usize) -> Self {
        self.push(U256::from(back)).op(Opcode::Dup)
    }

    pub fn swap(self, back: usize) -> Self {
        self.push(U256::from(back)).op(Opcode::Swap)
    }

    pub fn concat(self) -> Self {
        self.op(Opcode::Concat)
    }

    pub fn keccak(self) -> Self {
        self.op(Opcode::Keccak)
    }

    pub fn slice(self, pos: usize, len: usize) -> Self {
        self.push(U256::from(pos))
            .push(U256::from(len))
            .op(Opcode::Slice)
    }

    pub fn length(self) -> Self {
        self.op(Opcode::Length)
    }

    pub fn plus(self) -> Self {
        self.op(Opcode::Plus)
    }

    pub fn times(self) -> Self {
        self.op(Opcode::Times)
    }

    pub fn divide(self) -> Self {
        self.op(Opcode::Divide)
    }

    pub fn modulo(self) -> Self {
        self.op(Opcode::Mod)
    }

    pub fn and(self) -> Self {
        self.op(Opcode::And)
    }

    pub fn or(self) -> Self {
        self.op(Opcode::Or)
    }

    pub fn xor(self) -> Self {
        self.op(Opcode::Xor)
    }

    pub fn not(self) -> Self {
        self.op(Opcode::Not)
    }

    pub fn is_zero(self) -> Self {
        self.op(Opcode::IsZero)
    }

    pub fn shl(self, shift: U256) -> Self {
        self.push(shift).op(Opcode::ShiftLeft)
    }

    pub fn shr(self, shift: U256) -> Self {
        self.push(shift).op(Opcode::ShiftRight)
    }

    pub fn eq(self) -> Self {
        self.op(Opcode::Eq)
    }

    pub fn lt(self) -> Self {
        self.op(Opcode::Lt)
    }

    pub fn gt(self) -> Self {
        self.op(Opcode::Gt)
    }

    pub fn twos_complement(self) -> Self {
        self.not().push(U256::from(1)).plus()
    }

    /// `[a, b] => [a - b]`
    pub fn subtract(self) -> Self {
        self.twos_complement().plus()
    }

    pub fn neq(self) -> Self {
        self.eq().is_zero()
    }

    pub fn lte(self) -> Self {
        self.gt().is_zero()
    }

    pub fn gte(self) -> Self {
        self.lt().is_zero()
    }

    /// `[a, b] => [a, b, a, b]`
    pub fn dup2(self) -> Self {
        self.dup(1).dup(1)
    }

    // [a, b, a > b] => swap(a > b) => pop
    pub fn min(self) -> Self {
        self.dup2().gt().op(Opcode::Swap).pop()
    }

    pub fn max(self) -> Self {
        self.dup2().lt().op(Opcode::Swap).pop()
    }
}

/// A program prefixed with its output count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    program: Program,
}

impl Default for Request {
    fn default() -> Self {
        Self::new(0)
    }
}

impl Deref for Request {
    type Target = Program;

    fn deref(&self) -> &Self::Target {
        &self.program
    }
}

impl Request {
    pub fn new(output_count: u8) -> Self {
        Self {
            program: Program::new().add_byte(output_count),
        }
    }

    pub fn output_count(&self) -> usize {
        self.program.ops[0] as usize
    }

    fn ensure_capacity(&mut self, n: usize) -> Result<(), ProgramError> {
        let current = self.output_count();
        if n < current {
            return Err(ProgramError::InvalidCapacity {
                requested: n,
                current,
            });
        }
        let n = u8::try_from(n).map_err(|_| ProgramError::OutputOverflow(n))?;
        self.program.ops[0] = n;
        Ok(())
    }

    /// Applies `f` to the underlying program.
    pub fn then(self, f: impl FnOnce(Program) -> Program) -> Self {
        Self {
            program: f(self.program),
        }
    }

    /// Stores the top of the stack into a freshly allocated output.
    pub fn add_output(mut self) -> Result<Self, ProgramError> {
        let i = self.output_count();
        self.ensure_capacity(i + 1)?;
        Ok(self.then(|p| p.set_output(i)))
    }

    /// Moves the top `count` stack values into new outputs, preserving their
    /// stack order.
    pub fn drain(mut self, count: usize) -> Result<Self, ProgramError> {
        let offset = self.output_count();
        self.ensure_capacity(offset + count)?;
        Ok(self.then(|mut p| {
            for i in (0..count).rev() {
                p = p.set_output(offset + i);
            }
            p
        }))
    }
}
