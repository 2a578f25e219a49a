//! Assembly-work definitions and per-product labor requirements.
//!
//! Labor contributes to assembly cost, never to stock.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use tallerp_core::{DomainError, DomainResult, ProductId, WorkId};

/// A labor/work definition with its unit price.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssemblyWork {
    pub id: WorkId,
    pub name: String,
    pub unit_price: Decimal,
}

impl AssemblyWork {
    pub fn new(id: WorkId, name: impl Into<String>, unit_price: Decimal) -> DomainResult<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(DomainError::validation("work name cannot be empty"));
        }
        if unit_price < Decimal::ZERO {
            return Err(DomainError::validation("work unit price cannot be negative"));
        }
        Ok(Self {
            id,
            name,
            unit_price,
        })
    }
}

/// Association of a product with a work definition: how much of that work one
/// unit of the product needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkRequirement {
    pub product_id: ProductId,
    pub work_id: WorkId,
    pub quantity: Decimal,
}

impl WorkRequirement {
    pub fn new(product_id: ProductId, work_id: WorkId, quantity: Decimal) -> DomainResult<Self> {
        if quantity <= Decimal::ZERO {
            return Err(DomainError::validation("work quantity must be positive"));
        }
        Ok(Self {
            product_id,
            work_id,
            quantity,
        })
    }
}

/// A work requirement joined with its definition, as read back for resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequiredWork {
    pub work: AssemblyWork,
    /// Per-unit quantity from the requirement row.
    pub quantity: Decimal,
}
