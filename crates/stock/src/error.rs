//! Allocation error model.

use thiserror::Error;

use coldstock_core::DomainError;

pub type AllocationResult<T> = Result<T, AllocationError>;

/// Failure of a stock allocation operation.
///
/// Payloads are numeric so callers can render them however they like.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AllocationError {
    /// Malformed input (blank flavor, non-positive quantity, same source and destination).
    #[error("validation failed: {0}")]
    Validation(String),

    /// Referenced unit or lot does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Requested quantity exceeds the unit's free space.
    #[error("capacity exceeded: only {available} units of space available")]
    CapacityExceeded { available: i64 },

    /// Requested quantity exceeds what the source holds.
    #[error("insufficient stock: only {available} units available")]
    InsufficientStock { available: i64 },

    /// The store failed while the operation's transaction was open.
    #[error("store failure: {0}")]
    StoreFailure(String),
}

impl AllocationError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// True for failures caused by the caller's request rather than the store.
    pub fn is_rejection(&self) -> bool {
        !matches!(self, AllocationError::StoreFailure(_))
    }
}

impl From<DomainError> for AllocationError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Validation(msg) | DomainError::InvalidId(msg) => {
                AllocationError::Validation(msg)
            }
            DomainError::NotFound => AllocationError::NotFound("resource".to_string()),
            DomainError::InvariantViolation(msg) | DomainError::Overflow(msg) => {
                AllocationError::Validation(msg)
            }
        }
    }
}
