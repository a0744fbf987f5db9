//! Stack values.
//!
//! Every slot of the machine stack and every output holds a [`Value`]: either
//! bytes that are already known, or a deferred computation (typically a
//! storage read) that runs at most once no matter how many holders await it.

use std::{fmt, future::Future};

use alloy_primitives::{Address, Bytes, U256};
use futures::future::{try_join_all, BoxFuture, FutureExt, Shared};

use crate::error::{InterpreterError, Result};

/// Largest number the machine converts to an index or a size.
pub const MAX_NUMBER: u64 = 0xff_ffff;

type SharedBytes = Shared<BoxFuture<'static, Result<Bytes>>>;

/// A memoized, possibly pending byte string.
#[derive(Clone)]
pub enum Value {
    Resolved(Bytes),
    Deferred {
        /// Known byte length, when it can be told without resolving.
        size: Option<usize>,
        future: SharedBytes,
    },
}

impl Value {
    /// Wraps a computation that is started on first resolution.
    pub fn deferred<F>(size: Option<usize>, fut: F) -> Self
    where
        F: Future<Output = Result<Bytes>> + Send + 'static,
    {
        Self::Deferred {
            size,
            future: fut.boxed().shared(),
        }
    }

    /// A 32-byte big-endian word.
    pub fn word(x: U256) -> Self {
        Self::Resolved(Bytes::from(x.to_be_bytes::<32>()))
    }

    pub fn bool(b: bool) -> Self {
        Self::word(U256::from(b as u8))
    }

    /// Left-pads `bytes` (at most 32 of them) to a full word.
    pub fn padded(bytes: &[u8]) -> Self {
        let mut word = [0u8; 32];
        let n = bytes.len().min(32);
        word[32 - n..].copy_from_slice(&bytes[bytes.len() - n..]);
        Self::Resolved(Bytes::from(word))
    }

    pub fn address(address: Address) -> Self {
        Self::Resolved(Bytes::copy_from_slice(address.as_slice()))
    }

    pub const fn is_resolved(&self) -> bool {
        matches!(self, Value::Resolved(_))
    }

    /// Awaits the bytes. Every holder of a deferred value observes the same
    /// result and the underlying computation runs once.
    pub async fn resolve(&self) -> Result<Bytes> {
        match self {
            Value::Resolved(bytes) => Ok(bytes.clone()),
            Value::Deferred { future, .. } => future.clone().await,
        }
    }

    /// Byte length, using the size hint when present.
    pub async fn size(&self) -> Result<usize> {
        match self {
            Value::Resolved(bytes) => Ok(bytes.len()),
            Value::Deferred {
                size: Some(size), ..
            } => Ok(*size),
            Value::Deferred { size: None, .. } => Ok(self.resolve().await?.len()),
        }
    }

    /// Resolved bytes if they are available without waiting.
    pub fn peek(&self) -> Option<Bytes> {
        match self {
            Value::Resolved(bytes) => Some(bytes.clone()),
            Value::Deferred { future, .. } => future.peek().and_then(|r| r.as_ref().ok().cloned()),
        }
    }
}

impl From<Bytes> for Value {
    fn from(bytes: Bytes) -> Self {
        Self::Resolved(bytes)
    }
}

impl From<Vec<u8>> for Value {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Resolved(Bytes::from(bytes))
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Resolved(bytes) => write!(f, "{bytes}"),
            Value::Deferred { size, future } => match future.peek() {
                Some(Ok(bytes)) => write!(f, "{bytes}"),
                Some(Err(err)) => write!(f, "<failed: {err}>"),
                None => match size {
                    Some(size) => write!(f, "<pending: {size} bytes>"),
                    None => write!(f, "<pending>"),
                },
            },
        }
    }
}

/// Resolves every value concurrently, failing on the first error.
pub async fn resolve_all(values: &[Value]) -> Result<Vec<Bytes>> {
    try_join_all(values.iter().map(Value::resolve)).await
}

/// Numeric view of a value: the leading 32 bytes as a big-endian integer.
pub fn uint_from_bytes(bytes: &[u8]) -> U256 {
    U256::from_be_slice(&bytes[..bytes.len().min(32)])
}

/// Small-integer view of a value, used for indices, counts and sizes.
pub fn number_from_bytes(bytes: &[u8]) -> Result<usize> {
    let x = uint_from_bytes(bytes);
    if x > U256::from(MAX_NUMBER) {
        return Err(InterpreterError::NumericOverflow);
    }
    Ok(x.to::<u64>() as usize)
}

/// Address view of a value: the low 20 bytes of its first word.
pub fn address_from_bytes(bytes: &[u8]) -> Address {
    if bytes.len() >= 32 {
        Address::from_slice(&bytes[12..32])
    } else {
        let mut raw = [0u8; 20];
        let n = bytes.len().min(20);
        raw[20 - n..].copy_from_slice(&bytes[bytes.len() - n..]);
        Address::from(raw)
    }
}

pub fn is_zeros(bytes: &[u8]) -> bool {
    bytes.iter().all(|b| *b == 0)
}
