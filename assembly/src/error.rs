//! Error types for program decoding and evaluation.

use std::sync::Arc;

use alloy_primitives::{Address, U256};
use thiserror::Error;

/// Errors that abort an evaluation.
///
/// Exit codes such as "not a contract" are not represented here: those are
/// successful terminations and are reported through
/// [`ExitCode`](crate::ExitCode).
#[derive(Debug, Clone, Error)]
pub enum InterpreterError {
    /// Byte that is neither an inline literal nor a known opcode.
    #[error("unknown op: {0}")]
    UnknownOpcode(u8),

    /// The program ended in the middle of an instruction.
    #[error("reader overflow: wanted {wanted} bytes at {pos}, {remaining} remaining")]
    ReaderOverflow {
        pos: usize,
        wanted: usize,
        remaining: usize,
    },

    /// An inline number was wider than a literal allows.
    #[error("invalid number width: {0}")]
    InvalidNumberWidth(u8),

    #[error("numeric overflow")]
    NumericOverflow,

    #[error("invalid output index: {0}")]
    InvalidOutputIndex(usize),

    #[error("stack underflow")]
    StackUnderflow,

    #[error("stack overflow")]
    StackOverflow,

    #[error("too many bytes: {size} > {limit}")]
    TooManyBytes { size: U256, limit: usize },

    #[error("too many targets: {0}")]
    TooManyTargets(usize),

    #[error("max eval depth: {0}")]
    MaxEvalDepth(usize),

    #[error("invalid element size")]
    InvalidElementSize,

    #[error("division by zero")]
    DivisionByZero,

    /// A long-form `bytes` header that declares fewer than 32 bytes.
    #[error("invalid storage encoding: {target} @ {slot}")]
    InvalidStorageEncoding { target: Address, slot: U256 },

    /// Failure reported by the storage backend, shared by every waiter of the
    /// value that triggered it.
    #[error("storage read failed: {0:#}")]
    Storage(Arc<anyhow::Error>),
}

impl InterpreterError {
    /// Wraps a backend failure.
    pub fn storage(err: impl Into<anyhow::Error>) -> Self {
        Self::Storage(Arc::new(err.into()))
    }
}

/// Result type for program decoding and evaluation.
pub type Result<T> = std::result::Result<T, InterpreterError>;
