use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use tallerp_core::{DomainError, DomainResult, ProductId};

/// What role a product plays in the component graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProductKind {
    RawMaterial,
    PreAssembled,
    Finished,
}

impl ProductKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ProductKind::RawMaterial => "raw_material",
            ProductKind::PreAssembled => "pre_assembled",
            ProductKind::Finished => "finished",
        }
    }

    pub fn parse(s: &str) -> DomainResult<Self> {
        match s {
            "raw_material" => Ok(ProductKind::RawMaterial),
            "pre_assembled" => Ok(ProductKind::PreAssembled),
            "finished" => Ok(ProductKind::Finished),
            other => Err(DomainError::validation(format!(
                "unknown product kind '{other}'"
            ))),
        }
    }
}

impl core::fmt::Display for ProductKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An item that can be a raw material, a pre-assembled sub-component, or a
/// finished good.
///
/// `stock` equals the sum of signed ledger quantities for this product; the
/// engine never drives it below zero.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    /// Short human-facing code, e.g. `TRN-DT01`.
    pub sku: String,
    pub name: String,
    pub kind: ProductKind,
    pub stock: Decimal,
    pub low_stock_threshold: Decimal,
}

impl Product {
    pub fn new(
        id: ProductId,
        sku: impl Into<String>,
        name: impl Into<String>,
        kind: ProductKind,
        stock: Decimal,
        low_stock_threshold: Decimal,
    ) -> DomainResult<Self> {
        let sku = sku.into();
        let name = name.into();
        if sku.trim().is_empty() {
            return Err(DomainError::validation("product sku cannot be empty"));
        }
        if name.trim().is_empty() {
            return Err(DomainError::validation("product name cannot be empty"));
        }
        if low_stock_threshold < Decimal::ZERO {
            return Err(DomainError::validation(
                "low stock threshold cannot be negative",
            ));
        }
        Ok(Self {
            id,
            sku,
            name,
            kind,
            stock,
            low_stock_threshold,
        })
    }

    pub fn is_raw_material(&self) -> bool {
        self.kind == ProductKind::RawMaterial
    }

    /// Only non-raw products can carry a recipe (component edges).
    pub fn can_have_recipe(&self) -> bool {
        self.kind != ProductKind::RawMaterial
    }

    pub fn is_below_threshold(&self) -> bool {
        self.stock < self.low_stock_threshold
    }
}
