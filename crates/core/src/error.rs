//! Domain error model.

use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Keep this focused on deterministic business failures. Every variant is a
/// rejected operation, never a crash; infrastructure concerns belong elsewhere.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A stock decrement exceeded the on-hand quantity. The operation is
    /// rejected whole; quantity is left unchanged.
    #[error("insufficient stock: available {available}, requested {requested}")]
    InsufficientStock { available: u64, requested: u64 },

    /// A lifecycle transition's preconditions were not met.
    #[error("invalid status transition: {0}")]
    InvalidStatusTransition(String),

    /// A mutation was attempted on a record locked by its lifecycle state.
    #[error("edit not allowed: {0}")]
    EditNotAllowed(String),

    /// A value failed validation (e.g. malformed or out-of-range input).
    #[error("validation failed: {0}")]
    Validation(String),

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// A requested resource was not found (domain-level).
    #[error("not found")]
    NotFound,

    /// A conflict occurred (e.g. concurrent mutation detected by the store).
    #[error("conflict: {0}")]
    Conflict(String),
}

impl DomainError {
    pub fn insufficient_stock(available: u64, requested: u64) -> Self {
        Self::InsufficientStock {
            available,
            requested,
        }
    }

    pub fn invalid_transition(msg: impl Into<String>) -> Self {
        Self::InvalidStatusTransition(msg.into())
    }

    pub fn edit_not_allowed(msg: impl Into<String>) -> Self {
        Self::EditNotAllowed(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn not_found() -> Self {
        Self::NotFound
    }
}
