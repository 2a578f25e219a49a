use thiserror::Error;

use tallerp_core::DomainError;
use tallerp_store::StoreError;

/// Result type of every engine operation.
pub type EngineResult<T> = Result<T, EngineError>;

/// Engine-level error.
///
/// Domain failures keep their taxonomy so callers can name the offending
/// entity; unexpected persistence failures stay a distinct variant so
/// programming bugs are not masked as business-rule violations.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error("storage failure: {0}")]
    Store(StoreError),
}

impl From<StoreError> for EngineError {
    fn from(value: StoreError) -> Self {
        match value {
            // Unique-constraint and stale-version failures surface as domain
            // conflicts; they are resolvable by the caller.
            StoreError::Conflict(msg) => EngineError::Domain(DomainError::conflict(msg)),
            StoreError::Concurrency(msg) => EngineError::Domain(DomainError::conflict(msg)),
            other => EngineError::Store(other),
        }
    }
}

impl EngineError {
    pub fn as_domain(&self) -> Option<&DomainError> {
        match self {
            EngineError::Domain(e) => Some(e),
            EngineError::Store(_) => None,
        }
    }
}
