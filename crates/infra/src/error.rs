//! Caller-facing failure kinds for stock-affecting transitions.

use thiserror::Error;

use wareflow_core::DomainError;

use crate::ledger_store::LedgerStoreError;

/// Typed failure of one transition attempt.
///
/// Every variant guarantees that nothing from the attempt was committed: the
/// document, the ledger, balances and reservations are exactly as before.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PostingError {
    /// The transition is not legal from the document's current state.
    #[error("invalid transition: {0}")]
    InvalidTransition(String),

    /// A reservation or outbound movement would push reserved above on-hand.
    #[error("insufficient available quantity (requested: {requested}, available: {available})")]
    InsufficientAvailable { requested: i64, available: i64 },

    /// A line-level or document-level rule was violated.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Lock contention exhausted the retry budget, or the document moved past
    /// the caller's expected version. Safe to retry.
    #[error("concurrent modification: {0}")]
    ConcurrentModification(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// Storage failed during the unit of work.
    #[error("persistence failure: {0}")]
    Persistence(String),
}

impl PostingError {
    /// Whether the caller may retry the same request unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, PostingError::ConcurrentModification(_))
    }

    pub fn not_found(what: impl core::fmt::Display) -> Self {
        PostingError::NotFound(what.to_string())
    }
}

impl From<DomainError> for PostingError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Validation(msg) => PostingError::Validation(msg),
            DomainError::InvalidTransition(msg) => PostingError::InvalidTransition(msg),
            DomainError::InsufficientAvailable {
                requested,
                available,
            } => PostingError::InsufficientAvailable {
                requested,
                available,
            },
            DomainError::InvalidId(msg) => PostingError::Validation(msg),
            DomainError::NotFound => PostingError::NotFound("document".to_string()),
            DomainError::Conflict(msg) => PostingError::ConcurrentModification(msg),
        }
    }
}

impl From<LedgerStoreError> for PostingError {
    fn from(value: LedgerStoreError) -> Self {
        match value {
            LedgerStoreError::InvalidAppend(msg) => PostingError::Validation(msg),
            LedgerStoreError::Storage(msg) => PostingError::Persistence(msg),
        }
    }
}
