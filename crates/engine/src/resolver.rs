//! Recursive BOM explosion.
//!
//! The resolver walks a product's component graph depth-first and aggregates
//! raw-material and labor requirements, annotated with stock shortages. It is
//! parameterized over a [`CatalogReader`] so the identical algorithm runs
//! against latest-committed state (dry-run) or transaction-scoped state
//! (commit path).

use std::collections::HashMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use tallerp_catalog::{AssemblyWork, Product, ProductKind, RequiredWork};
use tallerp_core::{DomainError, ProductId, WorkId};
use tallerp_store::CatalogReader;

use crate::error::EngineResult;

/// Aggregated requirement for one consumable product (a raw material, or a
/// sub-assembly taken directly from stock).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaterialRequirement {
    pub product: Product,
    pub quantity: Decimal,
}

/// Aggregated labor requirement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaborRequirement {
    pub work: AssemblyWork,
    pub quantity: Decimal,
}

/// Computed deficit between required and available stock for one product.
///
/// `required` is the aggregated requirement across every appearance in the
/// graph, `available` the stock observed by the reader.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shortage {
    pub product: Product,
    pub required: Decimal,
    pub available: Decimal,
}

/// Output of one BOM explosion. Materials and labor keep first-encounter
/// insertion order, which makes shortage reporting deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub materials: Vec<MaterialRequirement>,
    pub labor: Vec<LaborRequirement>,
    pub shortages: Vec<Shortage>,
}

impl Resolution {
    pub fn is_fully_stocked(&self) -> bool {
        self.shortages.is_empty()
    }

    /// The shortage of the earliest shorted entry in materials order.
    pub fn first_shortage(&self) -> Option<&Shortage> {
        self.materials.iter().find_map(|m| {
            self.shortages
                .iter()
                .find(|s| s.product.id == m.product.id)
        })
    }

    /// Σ quantity × unit price over the aggregated labor list.
    pub fn total_labor_cost(&self) -> Decimal {
        self.labor
            .iter()
            .map(|l| l.quantity * l.work.unit_price)
            .sum()
    }
}

/// Explode `quantity` units of a product into aggregated material and labor
/// requirements.
///
/// Shortages are reported, not raised, so the full shortage set is visible at
/// once. The single hard error is a sub-assembly that must be produced but
/// has no recipe ([`DomainError::NoRecipeDefined`]), since its shortfall
/// cannot be quantified.
pub fn explode(
    reader: &dyn CatalogReader,
    product_id: ProductId,
    quantity: Decimal,
) -> EngineResult<Resolution> {
    if quantity <= Decimal::ZERO {
        return Err(DomainError::validation("quantity must be positive").into());
    }
    let product = reader
        .product(product_id)?
        .ok_or_else(|| DomainError::not_found(format!("product {product_id}")))?;

    let mut resolver = Resolver::new(reader);
    resolver.resolve(&product, quantity)?;
    Ok(resolver.finish())
}

struct Resolver<'a> {
    reader: &'a dyn CatalogReader,
    materials: Vec<MaterialRequirement>,
    material_index: HashMap<ProductId, usize>,
    labor: Vec<LaborRequirement>,
    labor_index: HashMap<WorkId, usize>,
    shortages: Vec<Shortage>,
    shortage_index: HashMap<ProductId, usize>,
    /// Stock already promised to earlier appearances of a sub-assembly, so a
    /// later appearance cannot double-spend it.
    claimed: HashMap<ProductId, Decimal>,
}

impl<'a> Resolver<'a> {
    fn new(reader: &'a dyn CatalogReader) -> Self {
        Self {
            reader,
            materials: Vec::new(),
            material_index: HashMap::new(),
            labor: Vec::new(),
            labor_index: HashMap::new(),
            shortages: Vec::new(),
            shortage_index: HashMap::new(),
            claimed: HashMap::new(),
        }
    }

    fn finish(self) -> Resolution {
        Resolution {
            materials: self.materials,
            labor: self.labor,
            shortages: self.shortages,
        }
    }

    fn resolve(&mut self, product: &Product, quantity: Decimal) -> EngineResult<()> {
        // Labor attached at this level is added once per call, scaled by the
        // quantity requested at this level.
        for required in self.reader.required_work_of(product.id)? {
            self.add_labor(&required, quantity);
        }

        for edge in self.reader.components_of(product.id)? {
            let total_required = edge.quantity * quantity;
            let component = self.reader.product(edge.component_id)?.ok_or_else(|| {
                DomainError::not_found(format!("component {}", edge.component_id))
            })?;

            match component.kind {
                ProductKind::RawMaterial => self.consume_raw(&component, total_required),
                ProductKind::PreAssembled | ProductKind::Finished => {
                    self.consume_sub_assembly(&component, total_required)?
                }
            }
        }

        Ok(())
    }

    fn consume_raw(&mut self, product: &Product, quantity: Decimal) {
        let aggregated = self.add_material(product, quantity);
        if aggregated > product.stock {
            self.record_shortage(product, aggregated);
        }
    }

    fn consume_sub_assembly(&mut self, product: &Product, quantity: Decimal) -> EngineResult<()> {
        let claimed = self
            .claimed
            .get(&product.id)
            .copied()
            .unwrap_or(Decimal::ZERO);
        let available = (product.stock - claimed).max(Decimal::ZERO);

        if available >= quantity {
            // Covered by stock: directly consumable, no recursion.
            self.claim(product.id, quantity);
            self.add_material(product, quantity);
            return Ok(());
        }

        if available > Decimal::ZERO {
            self.claim(product.id, available);
            self.add_material(product, available);
        }

        let deficit = quantity - available;
        if self.reader.components_of(product.id)?.is_empty() {
            return Err(DomainError::NoRecipeDefined(product.sku.clone()).into());
        }
        self.resolve(product, deficit)
    }

    fn claim(&mut self, product_id: ProductId, quantity: Decimal) {
        *self.claimed.entry(product_id).or_insert(Decimal::ZERO) += quantity;
    }

    /// Aggregate into the materials list, returning the new total requirement.
    fn add_material(&mut self, product: &Product, quantity: Decimal) -> Decimal {
        if let Some(&i) = self.material_index.get(&product.id) {
            self.materials[i].quantity += quantity;
            self.materials[i].quantity
        } else {
            self.material_index.insert(product.id, self.materials.len());
            self.materials.push(MaterialRequirement {
                product: product.clone(),
                quantity,
            });
            quantity
        }
    }

    fn add_labor(&mut self, required: &RequiredWork, quantity: Decimal) {
        let scaled = required.quantity * quantity;
        if let Some(&i) = self.labor_index.get(&required.work.id) {
            self.labor[i].quantity += scaled;
        } else {
            self.labor_index.insert(required.work.id, self.labor.len());
            self.labor.push(LaborRequirement {
                work: required.work.clone(),
                quantity: scaled,
            });
        }
    }

    fn record_shortage(&mut self, product: &Product, required: Decimal) {
        if let Some(&i) = self.shortage_index.get(&product.id) {
            self.shortages[i].required = required;
        } else {
            self.shortage_index.insert(product.id, self.shortages.len());
            self.shortages.push(Shortage {
                product: product.clone(),
                required,
                available: product.stock,
            });
        }
    }
}
