//! Error types for proof collection.

use std::sync::Arc;

use gatevm_asm::InterpreterError;
use thiserror::Error;

/// Errors that can occur while reading or proving remote state.
///
/// Clone so that every waiter of a coalesced fetch observes the same failure.
#[derive(Debug, Clone, Error)]
pub enum ProverError {
    /// More distinct proofs than one response may carry.
    #[error("too many proofs: {count} > {max}")]
    TooManyProofs { count: usize, max: usize },

    /// Too many fetches in flight; retry later.
    #[error("busy")]
    Busy,

    /// Provider call failed after every retry.
    #[error("rpc error: {0:#}")]
    Rpc(Arc<anyhow::Error>),

    /// The provider answered with something unusable.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Needs that do not fit the single-account proof layout.
    #[error("invalid v1 needs: {0}")]
    InvalidV1Needs(&'static str),

    /// A coalesced fetch was abandoned before it settled.
    #[error("fetch cancelled")]
    Cancelled,

    /// Error from the interpreter
    #[error("interpreter error: {0}")]
    Interpreter(#[from] InterpreterError),
}

impl ProverError {
    pub fn rpc(err: impl Into<anyhow::Error>) -> Self {
        Self::Rpc(Arc::new(err.into()))
    }
}

impl From<ProverError> for InterpreterError {
    fn from(err: ProverError) -> Self {
        match err {
            ProverError::Interpreter(err) => err,
            err => InterpreterError::storage(err),
        }
    }
}

/// Result type for proof collection
pub type Result<T> = std::result::Result<T, ProverError>;
