//! Error types for operation processing
//!
//! Three tiers:
//!
//! - [`Error`]: configuration defects, invariant violations and backend
//!   failures. These abort processing of the current operation.
//! - [`ReasonError`]: expected business rejections. The operation is left out
//!   of the block and the session carries on.
//! - [`ProcessError`]: the union of both, used inside the pipeline so that
//!   `?` works across soft and hard failures alike.

use crate::types::Hint;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Result type for hard failures
pub type Result<T> = std::result::Result<T, Error>;

/// Result type for pipeline steps that may reject an operation
pub type ProcessResult<T> = std::result::Result<T, ProcessError>;

/// Hard errors
#[derive(Error, Debug)]
pub enum Error {
    /// No processor is registered for the operation hint
    #[error("Unregistered hint: {0}; type needs registration")]
    UnregisteredHint(Hint),

    /// A fact does not expose a capability the pipeline requires
    #[error("Missing capability: fact {hint} does not expose {capability}")]
    MissingCapability {
        /// Hint of the offending fact
        hint: Hint,
        /// Name of the missing capability
        capability: &'static str,
    },

    /// A fact or state value had an unexpected concrete type
    #[error("Type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        /// Expected type
        expected: &'static str,
        /// Type actually found
        found: String,
    },

    /// Invariant violation (negative merged balance, conflicting writes, etc.)
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// Decimal overflow
    #[error("Arithmetic error: {0}")]
    Arithmetic(String),

    /// State reader backend error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Caller cancelled the operation context
    #[error("Operation context cancelled")]
    Cancelled,

    /// Metrics registration error
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl From<String> for Error {
    fn from(msg: String) -> Self {
        Error::Other(msg)
    }
}

impl From<&str> for Error {
    fn from(msg: &str) -> Self {
        Error::Other(msg.to_string())
    }
}

/// Category of a soft rejection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReasonKind {
    /// Semantic key already used in this session
    Duplicated,
    /// Resulting balance would be negative
    InsufficientBalance,
    /// Required state is absent
    StateNotFound,
    /// State that must be absent already exists
    StateExists,
    /// Signatures or extensions do not authorize the operation
    Unauthorized,
    /// Fact failed structural validation
    InvalidFact,
    /// Contract account is in the wrong status
    ContractStatus,
    /// A configured limit would be exceeded
    LimitExceeded,
}

impl ReasonKind {
    /// Stable label, used for metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            ReasonKind::Duplicated => "duplicated",
            ReasonKind::InsufficientBalance => "insufficient_balance",
            ReasonKind::StateNotFound => "state_not_found",
            ReasonKind::StateExists => "state_exists",
            ReasonKind::Unauthorized => "unauthorized",
            ReasonKind::InvalidFact => "invalid_fact",
            ReasonKind::ContractStatus => "contract_status",
            ReasonKind::LimitExceeded => "limit_exceeded",
        }
    }
}

impl fmt::Display for ReasonKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Business rejection of one operation
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct ReasonError {
    kind: ReasonKind,
    message: String,
}

impl ReasonError {
    /// Create new reason
    pub fn new(kind: ReasonKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Duplicated semantic key
    pub fn duplicated(message: impl Into<String>) -> Self {
        Self::new(ReasonKind::Duplicated, message)
    }

    /// Insufficient balance
    pub fn insufficient_balance(message: impl Into<String>) -> Self {
        Self::new(ReasonKind::InsufficientBalance, message)
    }

    /// Missing state
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ReasonKind::StateNotFound, message)
    }

    /// State already exists
    pub fn exists(message: impl Into<String>) -> Self {
        Self::new(ReasonKind::StateExists, message)
    }

    /// Authorization failure
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ReasonKind::Unauthorized, message)
    }

    /// Invalid fact
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::new(ReasonKind::InvalidFact, message)
    }

    /// Wrong contract status
    pub fn contract_status(message: impl Into<String>) -> Self {
        Self::new(ReasonKind::ContractStatus, message)
    }

    /// Limit exceeded
    pub fn limit_exceeded(message: impl Into<String>) -> Self {
        Self::new(ReasonKind::LimitExceeded, message)
    }

    /// Rejection category
    pub fn kind(&self) -> ReasonKind {
        self.kind
    }

    /// Human readable reason
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Soft or hard failure inside the pipeline
#[derive(Error, Debug)]
pub enum ProcessError {
    /// Business rejection
    #[error(transparent)]
    Reason(#[from] ReasonError),

    /// Hard failure
    #[error(transparent)]
    Fatal(#[from] Error),
}

impl From<bincode::Error> for ProcessError {
    fn from(err: bincode::Error) -> Self {
        ProcessError::Fatal(Error::Serialization(err))
    }
}

impl ProcessError {
    /// Reason, if this is a soft rejection
    pub fn reason(&self) -> Option<&ReasonError> {
        match self {
            ProcessError::Reason(reason) => Some(reason),
            ProcessError::Fatal(_) => None,
        }
    }

    /// Split into the `(reason, error)` pair exposed at the session boundary
    pub fn split(self) -> Result<ReasonError> {
        match self {
            ProcessError::Reason(reason) => Ok(reason),
            ProcessError::Fatal(err) => Err(err),
        }
    }
}
