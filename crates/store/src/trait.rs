use rust_decimal::Decimal;
use thiserror::Error;

use tallerp_catalog::{Assembler, AssemblyWork, BomEdge, Product, RequiredWork, WorkRequirement};
use tallerp_core::{AssemblerId, EventGroupId, ExpectedVersion, MovementId, OrderId, ProductId};
use tallerp_ledger::{InventoryMovement, NewMovement};
use tallerp_orders::{AssemblyOrder, OrderStatus};

/// Store operation error.
///
/// These are **infrastructure errors** (storage, concurrency, serialization)
/// as opposed to domain errors (validation, stock invariants). The engine maps
/// `Conflict`/`Concurrency` onto the domain conflict taxonomy and lets the
/// rest surface as storage failures so programming bugs are not mistaken for
/// business-rule violations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Unique-constraint violation (e.g. duplicate recipe edge).
    #[error("conflict: {0}")]
    Conflict(String),

    /// Optimistic concurrency check failed (stale aggregate version).
    #[error("optimistic concurrency check failed: {0}")]
    Concurrency(String),

    /// A stored value could not be decoded.
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// Underlying storage failure (connection, pool, unexpected state).
    #[error("storage failure: {0}")]
    Storage(String),
}

/// Read capability over the product catalog.
///
/// The BOM resolver is parameterized over this trait so the identical
/// resolution algorithm runs against latest-committed state (dry-run) or
/// transaction-scoped state (commit path).
pub trait CatalogReader {
    fn product(&self, id: ProductId) -> Result<Option<Product>, StoreError>;

    /// Direct component edges of a product, in creation order.
    fn components_of(&self, id: ProductId) -> Result<Vec<BomEdge>, StoreError>;

    /// Work requirements of a product joined with their definitions.
    fn required_work_of(&self, id: ProductId) -> Result<Vec<RequiredWork>, StoreError>;
}

/// Full read surface of the store.
pub trait StoreReader: CatalogReader {
    fn assembler(&self, id: AssemblerId) -> Result<Option<Assembler>, StoreError>;

    fn movement(&self, id: MovementId) -> Result<Option<InventoryMovement>, StoreError>;

    /// All movements correlated under one event group, in append order.
    fn movements_in_group(&self, group: EventGroupId)
        -> Result<Vec<InventoryMovement>, StoreError>;

    /// Movement history of a product, in append order.
    fn movements_for_product(&self, id: ProductId) -> Result<Vec<InventoryMovement>, StoreError>;

    fn order(&self, id: OrderId) -> Result<Option<AssemblyOrder>, StoreError>;

    fn orders_with_status(&self, status: OrderStatus) -> Result<Vec<AssemblyOrder>, StoreError>;

    /// Products whose stock is below their low-stock threshold.
    fn low_stock_products(&self) -> Result<Vec<Product>, StoreError>;
}

/// One atomic unit of work.
///
/// Writes are staged against the transaction and become visible only on
/// `commit`; dropping the transaction without committing rolls everything
/// back. Reads observe the staged state, so re-validation at write time sees
/// this transaction's own effects.
pub trait StoreTx: StoreReader {
    fn insert_product(&mut self, product: &Product) -> Result<(), StoreError>;

    fn insert_assembler(&mut self, assembler: &Assembler) -> Result<(), StoreError>;

    fn insert_work(&mut self, work: &AssemblyWork) -> Result<(), StoreError>;

    /// Persist a recipe edge. Fails with `Conflict` when the edge already
    /// exists. Acyclicity is validated by the caller before this is invoked.
    fn insert_component(&mut self, edge: &BomEdge) -> Result<(), StoreError>;

    fn insert_work_requirement(&mut self, requirement: &WorkRequirement)
        -> Result<(), StoreError>;

    /// Apply a signed stock delta and return the resulting stock, so callers
    /// can re-validate sufficiency at write time inside the transaction.
    fn adjust_stock(&mut self, product_id: ProductId, delta: Decimal)
        -> Result<Decimal, StoreError>;

    /// Append a movement, assigning its id and timestamp.
    fn record_movement(&mut self, movement: NewMovement)
        -> Result<InventoryMovement, StoreError>;

    /// Set the `reversed_by` back-reference on an existing movement.
    fn mark_reversed(&mut self, original: MovementId, reversal: MovementId)
        -> Result<(), StoreError>;

    fn insert_order(&mut self, order: &AssemblyOrder) -> Result<(), StoreError>;

    /// Persist an updated order, failing with `Concurrency` when the stored
    /// version no longer matches `expected`.
    fn update_order(&mut self, order: &AssemblyOrder, expected: ExpectedVersion)
        -> Result<(), StoreError>;

    fn commit(self: Box<Self>) -> Result<(), StoreError>;
}

/// Transactional product/ledger store.
///
/// Handles are constructed explicitly by the process entry point and passed
/// to each component at construction time; there is no global client.
pub trait InventoryStore: Send + Sync {
    /// Open a transaction. Reads inside it are transaction-scoped.
    fn begin(&self) -> Result<Box<dyn StoreTx + '_>, StoreError>;

    /// Read-only view of the latest committed state (dry-run path).
    fn snapshot(&self) -> Result<Box<dyn StoreReader + '_>, StoreError>;
}

impl<S> InventoryStore for std::sync::Arc<S>
where
    S: InventoryStore + ?Sized,
{
    fn begin(&self) -> Result<Box<dyn StoreTx + '_>, StoreError> {
        (**self).begin()
    }

    fn snapshot(&self) -> Result<Box<dyn StoreReader + '_>, StoreError> {
        (**self).snapshot()
    }
}
