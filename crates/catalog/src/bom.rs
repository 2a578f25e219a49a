//! Bill-of-materials edges.
//!
//! The component graph must stay acyclic. That is a *write-time* invariant:
//! [`closes_cycle`] runs a reachability check before an edge is persisted, so
//! resolution code can recurse without a runtime cycle guard.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use tallerp_core::{DomainError, DomainResult, ProductId};

/// Directed edge `product → component` with a positive required quantity per
/// one unit of product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BomEdge {
    pub product_id: ProductId,
    pub component_id: ProductId,
    pub quantity: Decimal,
}

impl BomEdge {
    pub fn new(product_id: ProductId, component_id: ProductId, quantity: Decimal) -> DomainResult<Self> {
        if quantity <= Decimal::ZERO {
            return Err(DomainError::validation(
                "component quantity must be positive",
            ));
        }
        if product_id == component_id {
            return Err(DomainError::validation(
                "a product cannot be its own component",
            ));
        }
        Ok(Self {
            product_id,
            component_id,
            quantity,
        })
    }
}

/// Would adding the edge `product → component` close a cycle?
///
/// Walks the existing graph from `component` downward; if `product` is
/// reachable, the new edge would complete a loop. `components_of` supplies the
/// adjacency (direct component ids of a product) so the check runs against any
/// backing store.
pub fn closes_cycle<E, F>(
    product_id: ProductId,
    component_id: ProductId,
    mut components_of: F,
) -> Result<bool, E>
where
    F: FnMut(ProductId) -> Result<Vec<ProductId>, E>,
{
    let mut stack = vec![component_id];
    let mut seen = std::collections::HashSet::new();

    while let Some(current) = stack.pop() {
        if current == product_id {
            return Ok(true);
        }
        if !seen.insert(current) {
            continue;
        }
        for next in components_of(current)? {
            stack.push(next);
        }
    }

    Ok(false)
}
