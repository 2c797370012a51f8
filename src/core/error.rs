//! Error types and protocol result codes.
//!
//! Two kinds of outcome leave the cache core:
//! - [`OpResult`] values are ordinary protocol outcomes (`Ok`, `Defer`, `Retry`,
//!   `ErrorArgument`, `ErrorNoData`). They are encoded into responses and never
//!   treated as failures.
//! - [`CacheError`] values are contract or invariant violations. They unwind out
//!   of the message or timer event being processed, are logged once by the
//!   reactor loop, and the loop moves on to the next message.

use thiserror::Error;

/// Contract and invariant violations raised by the cache core.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The caller broke an API contract (zero op_id, zero repeat count, ...).
    #[error("illegal argument: {message}")]
    IllegalArgument { message: String },

    /// An internal invariant is broken. Indicates a logic bug, not an
    /// environmental fault.
    #[error("system routine error: {message}")]
    SysRoutine { message: String },

    /// A datagram could not be decoded or failed envelope validation.
    #[error("decode error: {message}")]
    Decode { message: String },

    /// The transport failed to send.
    #[error("transport error: {message}")]
    Transport { message: String },
}

impl CacheError {
    /// Create an IllegalArgument error.
    pub fn illegal_argument(message: impl Into<String>) -> Self {
        Self::IllegalArgument {
            message: message.into(),
        }
    }

    /// Create a SysRoutine error.
    pub fn sys_routine(message: impl Into<String>) -> Self {
        Self::SysRoutine {
            message: message.into(),
        }
    }

    /// Create a Decode error.
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    /// Whether the error aborts the operation in progress as a logic bug.
    pub fn is_fatal_for_operation(&self) -> bool {
        matches!(self, Self::SysRoutine { .. })
    }

    /// Map the error to the result code reported to a client, if any.
    pub fn to_op_result(&self) -> Option<OpResult> {
        match self {
            Self::IllegalArgument { .. } => Some(OpResult::ErrorArgument),
            _ => None,
        }
    }
}

impl From<std::io::Error> for CacheError {
    fn from(err: std::io::Error) -> Self {
        Self::Transport {
            message: err.to_string(),
        }
    }
}

/// Result type using CacheError.
pub type CacheResult<T> = Result<T, CacheError>;

// ============================================================================
// Protocol result codes
// ============================================================================

/// Outcome of a read or update, as carried in a response body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpResult {
    /// The operation completed; the returned expiry bounds the lease.
    Ok = 0,
    /// The write was staged and will be applied when the current lease lapses.
    Defer = 1,
    /// Another write is already staged; resend later.
    Retry = 2,
    /// The request was malformed.
    ErrorArgument = 3,
    /// The key has never been written.
    ErrorNoData = 4,
}

impl OpResult {
    /// Wire value.
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    /// Check whether the outcome is an error code.
    pub fn is_error(self) -> bool {
        matches!(self, Self::ErrorArgument | Self::ErrorNoData)
    }
}

impl TryFrom<i32> for OpResult {
    type Error = i32;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Ok),
            1 => Ok(Self::Defer),
            2 => Ok(Self::Retry),
            3 => Ok(Self::ErrorArgument),
            4 => Ok(Self::ErrorNoData),
            other => Err(other),
        }
    }
}

impl std::fmt::Display for OpResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ok => write!(f, "Ok"),
            Self::Defer => write!(f, "Defer"),
            Self::Retry => write!(f, "Retry"),
            Self::ErrorArgument => write!(f, "ErrorArgument"),
            Self::ErrorNoData => write!(f, "ErrorNoData"),
        }
    }
}
