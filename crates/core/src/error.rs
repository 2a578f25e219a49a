//! Domain error model.

use rust_decimal::Decimal;
use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Keep this focused on deterministic, business/domain failures (validation,
/// stock invariants, state-machine guards). Infrastructure concerns belong
/// elsewhere.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A value failed validation (e.g. malformed or non-positive input).
    /// Rejected before any transaction opens.
    #[error("validation failed: {0}")]
    Validation(String),

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// A requested entity does not exist.
    #[error("{0} not found")]
    NotFound(String),

    /// A conflict occurred (e.g. duplicate recipe edge, stale version).
    #[error("conflict: {0}")]
    Conflict(String),

    /// Stock cannot cover the requirement for a specific product.
    #[error("insufficient stock of {product}: required {required}, available {available}")]
    InsufficientStock {
        product: String,
        required: Decimal,
        available: Decimal,
    },

    /// A sub-assembly must be produced but has no recipe to produce it from.
    #[error("no recipe defined for sub-assembly {0}")]
    NoRecipeDefined(String),

    /// Internal production requested for a product with no component edges.
    #[error("{0} has no components defined and cannot be produced this way")]
    NoComponentsDefined(String),

    /// An operation was applied to a product of the wrong type.
    #[error("wrong product type: {product} is {actual}, operation requires {expected}")]
    WrongProductType {
        product: String,
        actual: String,
        expected: String,
    },

    /// An order transition was requested from the wrong source state.
    #[error("invalid state transition: order is {current}, expected {expected}")]
    InvalidStateTransition { current: String, expected: String },

    /// The movement (or its event group) already has an offsetting reversal.
    #[error("movement {0} has already been reversed")]
    AlreadyReversed(String),

    /// Reversal movements are final and cannot themselves be reversed.
    #[error("movement {0} is itself a reversal and cannot be reversed")]
    CannotReverseAReversal(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn not_found(entity: impl Into<String>) -> Self {
        Self::NotFound(entity.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn insufficient_stock(
        product: impl Into<String>,
        required: Decimal,
        available: Decimal,
    ) -> Self {
        Self::InsufficientStock {
            product: product.into(),
            required,
            available,
        }
    }

    pub fn wrong_product_type(
        product: impl Into<String>,
        actual: impl Into<String>,
        expected: impl Into<String>,
    ) -> Self {
        Self::WrongProductType {
            product: product.into(),
            actual: actual.into(),
            expected: expected.into(),
        }
    }

    pub fn invalid_transition(current: impl Into<String>, expected: impl Into<String>) -> Self {
        Self::InvalidStateTransition {
            current: current.into(),
            expected: expected.into(),
        }
    }
}
