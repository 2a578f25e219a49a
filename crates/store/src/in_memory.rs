use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use rust_decimal::Decimal;

use tallerp_catalog::{Assembler, AssemblyWork, BomEdge, Product, RequiredWork, WorkRequirement};
use tallerp_core::{
    AggregateRoot, AssemblerId, EventGroupId, ExpectedVersion, MovementId, OrderId, ProductId,
    WorkId,
};
use tallerp_ledger::{InventoryMovement, NewMovement};
use tallerp_orders::{AssemblyOrder, OrderStatus};

use super::r#trait::{CatalogReader, InventoryStore, StoreError, StoreReader, StoreTx};

#[derive(Debug, Default, Clone)]
struct State {
    products: HashMap<ProductId, Product>,
    edges: Vec<BomEdge>,
    works: HashMap<WorkId, AssemblyWork>,
    requirements: Vec<WorkRequirement>,
    assemblers: HashMap<AssemblerId, Assembler>,
    movements: Vec<InventoryMovement>,
    orders: HashMap<OrderId, AssemblyOrder>,
}

impl State {
    fn product(&self, id: ProductId) -> Option<Product> {
        self.products.get(&id).cloned()
    }

    fn components_of(&self, id: ProductId) -> Vec<BomEdge> {
        self.edges
            .iter()
            .filter(|e| e.product_id == id)
            .cloned()
            .collect()
    }

    fn required_work_of(&self, id: ProductId) -> Result<Vec<RequiredWork>, StoreError> {
        self.requirements
            .iter()
            .filter(|r| r.product_id == id)
            .map(|r| {
                let work = self.works.get(&r.work_id).cloned().ok_or_else(|| {
                    StoreError::Storage(format!(
                        "work {} referenced by a requirement is missing",
                        r.work_id
                    ))
                })?;
                Ok(RequiredWork {
                    work,
                    quantity: r.quantity,
                })
            })
            .collect()
    }

    fn assembler(&self, id: AssemblerId) -> Option<Assembler> {
        self.assemblers.get(&id).cloned()
    }

    fn movement(&self, id: MovementId) -> Option<InventoryMovement> {
        self.movements.iter().find(|m| m.id == id).cloned()
    }

    fn movements_in_group(&self, group: EventGroupId) -> Vec<InventoryMovement> {
        self.movements
            .iter()
            .filter(|m| m.group == Some(group))
            .cloned()
            .collect()
    }

    fn movements_for_product(&self, id: ProductId) -> Vec<InventoryMovement> {
        self.movements
            .iter()
            .filter(|m| m.product_id == id)
            .cloned()
            .collect()
    }

    fn order(&self, id: OrderId) -> Option<AssemblyOrder> {
        self.orders.get(&id).cloned()
    }

    fn orders_with_status(&self, status: OrderStatus) -> Vec<AssemblyOrder> {
        let mut orders: Vec<AssemblyOrder> = self
            .orders
            .values()
            .filter(|o| o.status() == status)
            .cloned()
            .collect();
        // UUIDv7 ids are time-ordered; sort for a stable listing.
        orders.sort_by_key(|o| *o.id_typed().as_uuid());
        orders
    }

    fn low_stock_products(&self) -> Vec<Product> {
        let mut products: Vec<Product> = self
            .products
            .values()
            .filter(|p| p.is_below_threshold())
            .cloned()
            .collect();
        products.sort_by(|a, b| a.sku.cmp(&b.sku));
        products
    }
}

/// In-memory transactional store.
///
/// Intended for tests/dev. Transactions take the single state lock for their
/// whole lifetime and stage writes on a cloned snapshot, which makes commits
/// fully serialized: strictly stronger than the per-product isolation the
/// engine requires. Not optimized for performance.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    state: Mutex<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl InventoryStore for InMemoryStore {
    fn begin(&self) -> Result<Box<dyn StoreTx + '_>, StoreError> {
        let guard = self
            .state
            .lock()
            .map_err(|_| StoreError::Storage("lock poisoned".to_string()))?;
        let staged = guard.clone();
        Ok(Box::new(InMemoryTx { guard, staged }))
    }

    fn snapshot(&self) -> Result<Box<dyn StoreReader + '_>, StoreError> {
        let state = self
            .state
            .lock()
            .map_err(|_| StoreError::Storage("lock poisoned".to_string()))?
            .clone();
        Ok(Box::new(InMemorySnapshot { state }))
    }
}

/// Read-only view of the latest committed state.
#[derive(Debug)]
pub struct InMemorySnapshot {
    state: State,
}

impl CatalogReader for InMemorySnapshot {
    fn product(&self, id: ProductId) -> Result<Option<Product>, StoreError> {
        Ok(self.state.product(id))
    }

    fn components_of(&self, id: ProductId) -> Result<Vec<BomEdge>, StoreError> {
        Ok(self.state.components_of(id))
    }

    fn required_work_of(&self, id: ProductId) -> Result<Vec<RequiredWork>, StoreError> {
        self.state.required_work_of(id)
    }
}

impl StoreReader for InMemorySnapshot {
    fn assembler(&self, id: AssemblerId) -> Result<Option<Assembler>, StoreError> {
        Ok(self.state.assembler(id))
    }

    fn movement(&self, id: MovementId) -> Result<Option<InventoryMovement>, StoreError> {
        Ok(self.state.movement(id))
    }

    fn movements_in_group(
        &self,
        group: EventGroupId,
    ) -> Result<Vec<InventoryMovement>, StoreError> {
        Ok(self.state.movements_in_group(group))
    }

    fn movements_for_product(&self, id: ProductId) -> Result<Vec<InventoryMovement>, StoreError> {
        Ok(self.state.movements_for_product(id))
    }

    fn order(&self, id: OrderId) -> Result<Option<AssemblyOrder>, StoreError> {
        Ok(self.state.order(id))
    }

    fn orders_with_status(&self, status: OrderStatus) -> Result<Vec<AssemblyOrder>, StoreError> {
        Ok(self.state.orders_with_status(status))
    }

    fn low_stock_products(&self) -> Result<Vec<Product>, StoreError> {
        Ok(self.state.low_stock_products())
    }
}

/// A staged unit of work over the in-memory state.
pub struct InMemoryTx<'a> {
    guard: MutexGuard<'a, State>,
    staged: State,
}

impl CatalogReader for InMemoryTx<'_> {
    fn product(&self, id: ProductId) -> Result<Option<Product>, StoreError> {
        Ok(self.staged.product(id))
    }

    fn components_of(&self, id: ProductId) -> Result<Vec<BomEdge>, StoreError> {
        Ok(self.staged.components_of(id))
    }

    fn required_work_of(&self, id: ProductId) -> Result<Vec<RequiredWork>, StoreError> {
        self.staged.required_work_of(id)
    }
}

impl StoreReader for InMemoryTx<'_> {
    fn assembler(&self, id: AssemblerId) -> Result<Option<Assembler>, StoreError> {
        Ok(self.staged.assembler(id))
    }

    fn movement(&self, id: MovementId) -> Result<Option<InventoryMovement>, StoreError> {
        Ok(self.staged.movement(id))
    }

    fn movements_in_group(
        &self,
        group: EventGroupId,
    ) -> Result<Vec<InventoryMovement>, StoreError> {
        Ok(self.staged.movements_in_group(group))
    }

    fn movements_for_product(&self, id: ProductId) -> Result<Vec<InventoryMovement>, StoreError> {
        Ok(self.staged.movements_for_product(id))
    }

    fn order(&self, id: OrderId) -> Result<Option<AssemblyOrder>, StoreError> {
        Ok(self.staged.order(id))
    }

    fn orders_with_status(&self, status: OrderStatus) -> Result<Vec<AssemblyOrder>, StoreError> {
        Ok(self.staged.orders_with_status(status))
    }

    fn low_stock_products(&self) -> Result<Vec<Product>, StoreError> {
        Ok(self.staged.low_stock_products())
    }
}

impl StoreTx for InMemoryTx<'_> {
    fn insert_product(&mut self, product: &Product) -> Result<(), StoreError> {
        if self.staged.products.contains_key(&product.id) {
            return Err(StoreError::Conflict(format!(
                "product {} already exists",
                product.id
            )));
        }
        if self.staged.products.values().any(|p| p.sku == product.sku) {
            return Err(StoreError::Conflict(format!(
                "product sku '{}' already exists",
                product.sku
            )));
        }
        self.staged.products.insert(product.id, product.clone());
        Ok(())
    }

    fn insert_assembler(&mut self, assembler: &Assembler) -> Result<(), StoreError> {
        if self.staged.assemblers.contains_key(&assembler.id) {
            return Err(StoreError::Conflict(format!(
                "assembler {} already exists",
                assembler.id
            )));
        }
        self.staged
            .assemblers
            .insert(assembler.id, assembler.clone());
        Ok(())
    }

    fn insert_work(&mut self, work: &AssemblyWork) -> Result<(), StoreError> {
        if self.staged.works.contains_key(&work.id) {
            return Err(StoreError::Conflict(format!(
                "work {} already exists",
                work.id
            )));
        }
        self.staged.works.insert(work.id, work.clone());
        Ok(())
    }

    fn insert_component(&mut self, edge: &BomEdge) -> Result<(), StoreError> {
        let duplicate = self
            .staged
            .edges
            .iter()
            .any(|e| e.product_id == edge.product_id && e.component_id == edge.component_id);
        if duplicate {
            return Err(StoreError::Conflict(format!(
                "component edge {} -> {} already exists",
                edge.product_id, edge.component_id
            )));
        }
        self.staged.edges.push(edge.clone());
        Ok(())
    }

    fn insert_work_requirement(
        &mut self,
        requirement: &WorkRequirement,
    ) -> Result<(), StoreError> {
        let duplicate = self.staged.requirements.iter().any(|r| {
            r.product_id == requirement.product_id && r.work_id == requirement.work_id
        });
        if duplicate {
            return Err(StoreError::Conflict(format!(
                "work requirement {} -> {} already exists",
                requirement.product_id, requirement.work_id
            )));
        }
        self.staged.requirements.push(requirement.clone());
        Ok(())
    }

    fn adjust_stock(
        &mut self,
        product_id: ProductId,
        delta: Decimal,
    ) -> Result<Decimal, StoreError> {
        let product = self.staged.products.get_mut(&product_id).ok_or_else(|| {
            StoreError::Storage(format!("stock adjusted for unknown product {product_id}"))
        })?;
        product.stock += delta;
        Ok(product.stock)
    }

    fn record_movement(
        &mut self,
        movement: NewMovement,
    ) -> Result<InventoryMovement, StoreError> {
        let recorded = InventoryMovement {
            id: MovementId::new(),
            product_id: movement.product_id,
            kind: movement.kind,
            quantity: movement.quantity,
            actor: movement.actor,
            note: movement.note,
            group: movement.group,
            reverses: movement.reverses,
            reversed_by: None,
            occurred_at: Utc::now(),
        };
        self.staged.movements.push(recorded.clone());
        Ok(recorded)
    }

    fn mark_reversed(
        &mut self,
        original: MovementId,
        reversal: MovementId,
    ) -> Result<(), StoreError> {
        let movement = self
            .staged
            .movements
            .iter_mut()
            .find(|m| m.id == original)
            .ok_or_else(|| {
                StoreError::Storage(format!("mark_reversed on unknown movement {original}"))
            })?;
        movement.reversed_by = Some(reversal);
        Ok(())
    }

    fn insert_order(&mut self, order: &AssemblyOrder) -> Result<(), StoreError> {
        let id = order.id_typed();
        if self.staged.orders.contains_key(&id) {
            return Err(StoreError::Conflict(format!("order {id} already exists")));
        }
        self.staged.orders.insert(id, order.clone());
        Ok(())
    }

    fn update_order(
        &mut self,
        order: &AssemblyOrder,
        expected: ExpectedVersion,
    ) -> Result<(), StoreError> {
        let id = order.id_typed();
        let stored = self.staged.orders.get(&id).ok_or_else(|| {
            StoreError::Storage(format!("update_order on unknown order {id}"))
        })?;
        if !expected.matches(stored.version()) {
            return Err(StoreError::Concurrency(format!(
                "order {id}: expected {expected:?}, found {}",
                stored.version()
            )));
        }
        self.staged.orders.insert(id, order.clone());
        Ok(())
    }

    fn commit(mut self: Box<Self>) -> Result<(), StoreError> {
        *self.guard = std::mem::take(&mut self.staged);
        Ok(())
    }
}
