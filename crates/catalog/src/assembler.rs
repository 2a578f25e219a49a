use serde::{Deserialize, Serialize};

use tallerp_core::{AssemblerId, DomainError, DomainResult};

/// A third-party contractor who performs outsourced assembly work (armador).
///
/// CRUD for assemblers lives outside the engine; the engine only validates
/// existence when an order is placed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assembler {
    pub id: AssemblerId,
    pub name: String,
}

impl Assembler {
    pub fn new(id: AssemblerId, name: impl Into<String>) -> DomainResult<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(DomainError::validation("assembler name cannot be empty"));
        }
        Ok(Self { id, name })
    }
}
