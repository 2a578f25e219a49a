//! Production transaction management.
//!
//! Every commit workflow runs inside one store transaction: reads, shortage
//! evaluation, ledger writes, and stock updates in a single atomic unit. Any
//! error rolls the whole workflow back. Stock sufficiency is re-validated at
//! write time inside the transaction, independent of the resolver pass.

use chrono::Utc;
use rust_decimal::Decimal;
use serde::Serialize;

use tallerp_catalog::{bom, BomEdge, ProductKind};
use tallerp_core::{
    Aggregate, AggregateRoot, AssemblerId, DomainError, EventGroupId, ExpectedVersion, MovementId,
    OrderId, ProductId, UserId,
};
use tallerp_ledger::{InventoryMovement, MovementKind, NewMovement};
use tallerp_orders::{
    order::{
        AssignCourier, AssignPickup, Cancel, ConfirmAssembled, ConfirmDelivered, Open,
        ReceiveGoods, ReportDeliveryFailure,
    },
    AssemblyOrder, AssemblyStep, ExpectedOutput, OrderCommand, OrderEvent, OrderStatus, SentLine,
};
use tallerp_store::{CatalogReader, InventoryStore, StoreReader, StoreTx};

use crate::error::EngineResult;
use crate::resolver::{explode, LaborRequirement, MaterialRequirement, Resolution, Shortage};

/// Resolver output shaped for callers, with the computed labor cost.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BomPreview {
    pub materials: Vec<MaterialRequirement>,
    pub labor: Vec<LaborRequirement>,
    pub shortages: Vec<Shortage>,
    pub total_labor_cost: Decimal,
}

impl From<Resolution> for BomPreview {
    fn from(resolution: Resolution) -> Self {
        let total_labor_cost = resolution.total_labor_cost();
        Self {
            materials: resolution.materials,
            labor: resolution.labor,
            shortages: resolution.shortages,
            total_labor_cost,
        }
    }
}

/// The movements written by one commit workflow, correlated by event group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MovementBatch {
    pub group: EventGroupId,
    pub movements: Vec<InventoryMovement>,
}

/// Whether an external-order creation should simulate or commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderMode {
    DryRun,
    Commit,
}

/// Result of an external-order creation call.
#[derive(Debug, Clone)]
pub enum OrderOutcome {
    Preview(BomPreview),
    Order(AssemblyOrder),
}

/// Transition requested on an assembly order.
#[derive(Debug, Clone)]
pub enum OrderTransition {
    AssignCourier {
        courier: Option<UserId>,
    },
    Cancel,
    ConfirmDelivered,
    ReportDeliveryFailure {
        note: String,
    },
    ConfirmAssembled,
    AssignPickup {
        person: UserId,
    },
    ReceiveGoods {
        received: Vec<(ProductId, Decimal)>,
        justified: bool,
        note: Option<String>,
    },
}

/// The production-order engine's operation surface.
///
/// Owns an injected store handle; construction is wired by the process entry
/// point, never through a global client.
#[derive(Debug)]
pub struct ProductionService<S> {
    store: S,
}

impl<S> ProductionService<S>
where
    S: InventoryStore,
{
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Read-only BOM explosion against latest committed stock.
    pub fn explode_bom(&self, product_id: ProductId, quantity: Decimal) -> EngineResult<BomPreview> {
        let snapshot = self.store.snapshot()?;
        let reader: &dyn CatalogReader = &*snapshot;
        let resolution = explode(reader, product_id, quantity)?;
        Ok(BomPreview::from(resolution))
    }

    /// Produce `quantity` units of a product from its components.
    ///
    /// Writes one `ProductionIn` movement for the output and one
    /// `ProductionOut` movement per aggregated materials entry, all under one
    /// event group.
    pub fn commit_internal_production(
        &self,
        product_id: ProductId,
        quantity: Decimal,
        actor: UserId,
    ) -> EngineResult<MovementBatch> {
        ensure_positive(quantity)?;

        let mut tx = self.store.begin()?;
        let product = tx
            .product(product_id)?
            .ok_or_else(|| DomainError::not_found(format!("product {product_id}")))?;
        if tx.components_of(product_id)?.is_empty() {
            return Err(DomainError::NoComponentsDefined(product.sku.clone()).into());
        }

        let reader: &dyn CatalogReader = &*tx;
        let resolution = explode(reader, product_id, quantity)?;
        if let Some(shortage) = resolution.first_shortage() {
            return Err(DomainError::insufficient_stock(
                shortage.product.sku.clone(),
                shortage.required,
                shortage.available,
            )
            .into());
        }

        let group = EventGroupId::new();
        let mut movements = Vec::with_capacity(resolution.materials.len() + 1);

        let produced = tx.record_movement(
            NewMovement::new(product_id, MovementKind::ProductionIn, quantity, actor)?
                .in_group(group),
        )?;
        tx.adjust_stock(product_id, quantity)?;
        movements.push(produced);

        for entry in &resolution.materials {
            let movement = tx.record_movement(
                NewMovement::new(
                    entry.product.id,
                    MovementKind::ProductionOut,
                    entry.quantity,
                    actor,
                )?
                .in_group(group),
            )?;
            let remaining = tx.adjust_stock(entry.product.id, -entry.quantity)?;
            if remaining < Decimal::ZERO {
                return Err(DomainError::insufficient_stock(
                    entry.product.sku.clone(),
                    entry.quantity,
                    remaining + entry.quantity,
                )
                .into());
            }
            movements.push(movement);
        }

        tx.commit()?;
        tracing::info!(
            product = %product.sku,
            %quantity,
            movements = movements.len(),
            "internal production committed"
        );
        Ok(MovementBatch { group, movements })
    }

    /// Record a purchase of a raw material. Purchases only add, so there is no
    /// shortage check.
    pub fn commit_purchase(
        &self,
        product_id: ProductId,
        quantity: Decimal,
        actor: UserId,
        note: Option<String>,
    ) -> EngineResult<InventoryMovement> {
        ensure_positive(quantity)?;

        let mut tx = self.store.begin()?;
        let product = tx
            .product(product_id)?
            .ok_or_else(|| DomainError::not_found(format!("product {product_id}")))?;
        if product.kind != ProductKind::RawMaterial {
            return Err(DomainError::wrong_product_type(
                product.sku,
                product.kind.as_str(),
                ProductKind::RawMaterial.as_str(),
            )
            .into());
        }

        let movement = tx.record_movement(
            NewMovement::new(product_id, MovementKind::Purchase, quantity, actor)?
                .with_note(note),
        )?;
        tx.adjust_stock(product_id, quantity)?;
        tx.commit()?;
        Ok(movement)
    }

    /// Record a sale of a finished good.
    pub fn commit_sale(
        &self,
        product_id: ProductId,
        quantity: Decimal,
        actor: UserId,
        note: Option<String>,
    ) -> EngineResult<InventoryMovement> {
        ensure_positive(quantity)?;

        let mut tx = self.store.begin()?;
        let product = tx
            .product(product_id)?
            .ok_or_else(|| DomainError::not_found(format!("product {product_id}")))?;
        if product.kind != ProductKind::Finished {
            return Err(DomainError::wrong_product_type(
                product.sku,
                product.kind.as_str(),
                ProductKind::Finished.as_str(),
            )
            .into());
        }

        let movement = tx.record_movement(
            NewMovement::new(product_id, MovementKind::Sale, quantity, actor)?.with_note(note),
        )?;
        let remaining = tx.adjust_stock(product_id, -quantity)?;
        if remaining < Decimal::ZERO {
            return Err(DomainError::insufficient_stock(
                product.sku,
                quantity,
                remaining + quantity,
            )
            .into());
        }
        tx.commit()?;
        Ok(movement)
    }

    /// Record a manual stock correction (`AdjustmentIn`, `AdjustmentOut`,
    /// `Wastage`, or `CustomerReturn`).
    pub fn commit_adjustment(
        &self,
        product_id: ProductId,
        kind: MovementKind,
        quantity: Decimal,
        actor: UserId,
        note: Option<String>,
    ) -> EngineResult<InventoryMovement> {
        ensure_positive(quantity)?;
        if !kind.is_manual_adjustment() {
            return Err(DomainError::validation(format!(
                "movement kind '{kind}' cannot be recorded as a manual adjustment"
            ))
            .into());
        }

        let mut tx = self.store.begin()?;
        let product = tx
            .product(product_id)?
            .ok_or_else(|| DomainError::not_found(format!("product {product_id}")))?;

        let movement = tx
            .record_movement(NewMovement::new(product_id, kind, quantity, actor)?.with_note(note))?;
        let remaining = tx.adjust_stock(product_id, movement.signed_quantity())?;
        if remaining < Decimal::ZERO {
            return Err(DomainError::insufficient_stock(
                product.sku,
                quantity,
                remaining + quantity,
            )
            .into());
        }
        tx.commit()?;
        Ok(movement)
    }

    /// Reverse a movement. When the movement belongs to an event group, every
    /// movement in the group is reversed together; the offsetting movements
    /// share a fresh group id and carry back-references to the originals.
    pub fn reverse_movement(
        &self,
        movement_id: MovementId,
        actor: UserId,
    ) -> EngineResult<Vec<InventoryMovement>> {
        let mut tx = self.store.begin()?;
        let target = tx
            .movement(movement_id)?
            .ok_or_else(|| DomainError::not_found(format!("movement {movement_id}")))?;

        if target.is_reversal() {
            return Err(DomainError::CannotReverseAReversal(movement_id.to_string()).into());
        }

        let originals = match target.group {
            Some(group) => tx.movements_in_group(group)?,
            None => vec![target],
        };
        if let Some(done) = originals.iter().find(|m| m.is_reversed()) {
            return Err(DomainError::AlreadyReversed(done.id.to_string()).into());
        }

        let group = EventGroupId::new();
        let mut reversals = Vec::with_capacity(originals.len());
        for original in &originals {
            let reversal = tx.record_movement(
                NewMovement::new(
                    original.product_id,
                    original.kind.reversal_kind(),
                    original.quantity,
                    actor,
                )?
                .in_group(group)
                .reversing(original.id),
            )?;
            let remaining = tx.adjust_stock(original.product_id, reversal.signed_quantity())?;
            if remaining < Decimal::ZERO {
                let sku = tx
                    .product(original.product_id)?
                    .map(|p| p.sku)
                    .unwrap_or_else(|| original.product_id.to_string());
                return Err(DomainError::insufficient_stock(
                    sku,
                    original.quantity,
                    remaining + original.quantity,
                )
                .into());
            }
            tx.mark_reversed(original.id, reversal.id)?;
            reversals.push(reversal);
        }

        tx.commit()?;
        tracing::info!(movement = %movement_id, reversals = reversals.len(), "movement reversed");
        Ok(reversals)
    }

    /// Place (or simulate placing) an outsourced-production order.
    ///
    /// On commit: the order opens in `PendingDelivery`, every aggregated
    /// material becomes a sent line item with a `SentToAssembler` movement
    /// under one event group, and stocks are decremented. Labor requirements
    /// are recorded as informational assembly steps, never ledgered.
    pub fn create_assembly_order(
        &self,
        assembler_id: AssemblerId,
        product_id: ProductId,
        quantity: Decimal,
        actor: UserId,
        mode: OrderMode,
    ) -> EngineResult<OrderOutcome> {
        ensure_positive(quantity)?;

        if mode == OrderMode::DryRun {
            let snapshot = self.store.snapshot()?;
            let reader: &dyn CatalogReader = &*snapshot;
            let resolution = explode(reader, product_id, quantity)?;
            return Ok(OrderOutcome::Preview(BomPreview::from(resolution)));
        }

        let mut tx = self.store.begin()?;
        let assembler = tx
            .assembler(assembler_id)?
            .ok_or_else(|| DomainError::not_found(format!("assembler {assembler_id}")))?;
        let product = tx
            .product(product_id)?
            .ok_or_else(|| DomainError::not_found(format!("product {product_id}")))?;
        if tx.components_of(product_id)?.is_empty() {
            return Err(DomainError::NoComponentsDefined(product.sku.clone()).into());
        }

        let reader: &dyn CatalogReader = &*tx;
        let resolution = explode(reader, product_id, quantity)?;
        if let Some(shortage) = resolution.first_shortage() {
            return Err(DomainError::insufficient_stock(
                shortage.product.sku.clone(),
                shortage.required,
                shortage.available,
            )
            .into());
        }

        let order_id = OrderId::new();
        let lines: Vec<SentLine> = resolution
            .materials
            .iter()
            .map(|m| SentLine {
                product_id: m.product.id,
                quantity: m.quantity,
            })
            .collect();
        let steps: Vec<AssemblyStep> = resolution
            .labor
            .iter()
            .map(|l| AssemblyStep {
                work_id: l.work.id,
                name: l.work.name.clone(),
                quantity: l.quantity,
                unit_price: l.work.unit_price,
            })
            .collect();

        let mut order = AssemblyOrder::empty(order_id);
        let events = order.handle(&OrderCommand::Open(Open {
            order_id,
            assembler_id,
            lines: lines.clone(),
            outputs: vec![ExpectedOutput::new(product_id, quantity)],
            steps,
            expected_by: None,
            actor,
            occurred_at: Utc::now(),
        }))?;
        for event in &events {
            order.apply(event);
        }
        tx.insert_order(&order)?;

        let group = EventGroupId::new();
        for line in &lines {
            tx.record_movement(
                NewMovement::new(
                    line.product_id,
                    MovementKind::SentToAssembler,
                    line.quantity,
                    actor,
                )?
                .in_group(group),
            )?;
            let remaining = tx.adjust_stock(line.product_id, -line.quantity)?;
            if remaining < Decimal::ZERO {
                let sku = resolution
                    .materials
                    .iter()
                    .find(|m| m.product.id == line.product_id)
                    .map(|m| m.product.sku.clone())
                    .unwrap_or_else(|| line.product_id.to_string());
                return Err(DomainError::insufficient_stock(
                    sku,
                    line.quantity,
                    remaining + line.quantity,
                )
                .into());
            }
        }

        tx.commit()?;
        tracing::info!(
            order = %order_id,
            assembler = %assembler.name,
            product = %product.sku,
            lines = lines.len(),
            "assembly order created"
        );
        Ok(OrderOutcome::Order(order))
    }

    /// Apply a state transition to an assembly order, together with its
    /// ledger side effects (restock on cancel, goods receipt on receive).
    pub fn transition_order(
        &self,
        order_id: OrderId,
        transition: OrderTransition,
        actor: UserId,
    ) -> EngineResult<AssemblyOrder> {
        let mut tx = self.store.begin()?;
        let mut order = tx
            .order(order_id)?
            .ok_or_else(|| DomainError::not_found(format!("order {order_id}")))?;
        let loaded_version = order.version();
        let now = Utc::now();

        let command = match transition {
            OrderTransition::AssignCourier { courier } => {
                OrderCommand::AssignCourier(AssignCourier {
                    order_id,
                    courier,
                    actor,
                    occurred_at: now,
                })
            }
            OrderTransition::Cancel => OrderCommand::Cancel(Cancel {
                order_id,
                actor,
                occurred_at: now,
            }),
            OrderTransition::ConfirmDelivered => OrderCommand::ConfirmDelivered(ConfirmDelivered {
                order_id,
                actor,
                occurred_at: now,
            }),
            OrderTransition::ReportDeliveryFailure { note } => {
                OrderCommand::ReportDeliveryFailure(ReportDeliveryFailure {
                    order_id,
                    note,
                    actor,
                    occurred_at: now,
                })
            }
            OrderTransition::ConfirmAssembled => OrderCommand::ConfirmAssembled(ConfirmAssembled {
                order_id,
                actor,
                occurred_at: now,
            }),
            OrderTransition::AssignPickup { person } => OrderCommand::AssignPickup(AssignPickup {
                order_id,
                person,
                actor,
                occurred_at: now,
            }),
            OrderTransition::ReceiveGoods {
                received,
                justified,
                note,
            } => OrderCommand::ReceiveGoods(ReceiveGoods {
                order_id,
                received,
                justified,
                note,
                actor,
                occurred_at: now,
            }),
        };

        let events = order.handle(&command)?;
        for event in &events {
            order.apply(event);
        }
        tx.update_order(&order, ExpectedVersion::Exact(loaded_version))?;

        for event in &events {
            match event {
                OrderEvent::Cancelled(e) => {
                    let group = EventGroupId::new();
                    for line in &e.restock {
                        tx.record_movement(
                            NewMovement::new(
                                line.product_id,
                                MovementKind::AdjustmentIn,
                                line.quantity,
                                actor,
                            )?
                            .in_group(group)
                            .with_note(Some(format!("returned by cancellation of order {order_id}"))),
                        )?;
                        tx.adjust_stock(line.product_id, line.quantity)?;
                    }
                }
                OrderEvent::GoodsReceived(e) => {
                    let group = EventGroupId::new();
                    for receipt in e.receipts.iter().filter(|r| r.received > Decimal::ZERO) {
                        tx.record_movement(
                            NewMovement::new(
                                receipt.product_id,
                                MovementKind::ReceivedFromAssembler,
                                receipt.received,
                                actor,
                            )?
                            .in_group(group),
                        )?;
                        tx.adjust_stock(receipt.product_id, receipt.received)?;
                    }
                }
                _ => {}
            }
        }

        tx.commit()?;
        tracing::info!(order = %order_id, status = %order.status(), "order transitioned");
        Ok(order)
    }

    /// Persist a recipe edge after validating it would keep the component
    /// graph acyclic.
    pub fn add_component(
        &self,
        product_id: ProductId,
        component_id: ProductId,
        quantity: Decimal,
    ) -> EngineResult<BomEdge> {
        let edge = BomEdge::new(product_id, component_id, quantity)?;

        let mut tx = self.store.begin()?;
        let product = tx
            .product(product_id)?
            .ok_or_else(|| DomainError::not_found(format!("product {product_id}")))?;
        if !product.can_have_recipe() {
            return Err(DomainError::wrong_product_type(
                product.sku,
                product.kind.as_str(),
                "pre_assembled | finished",
            )
            .into());
        }
        let component = tx
            .product(component_id)?
            .ok_or_else(|| DomainError::not_found(format!("product {component_id}")))?;

        let closes = bom::closes_cycle(product_id, component_id, |id| {
            tx.components_of(id)
                .map(|edges| edges.into_iter().map(|e| e.component_id).collect())
        })?;
        if closes {
            return Err(DomainError::validation(format!(
                "adding {} as a component of {} would create a cycle",
                component.sku, product.sku
            ))
            .into());
        }

        tx.insert_component(&edge)?;
        tx.commit()?;
        Ok(edge)
    }

    /// Movement history of a product, in append order.
    pub fn movement_history(&self, product_id: ProductId) -> EngineResult<Vec<InventoryMovement>> {
        Ok(self.store.snapshot()?.movements_for_product(product_id)?)
    }

    /// All movements written by one logical operation.
    pub fn movements_in_group(
        &self,
        group: EventGroupId,
    ) -> EngineResult<Vec<InventoryMovement>> {
        Ok(self.store.snapshot()?.movements_in_group(group)?)
    }

    /// Products currently below their low-stock threshold.
    pub fn low_stock_products(&self) -> EngineResult<Vec<tallerp_catalog::Product>> {
        Ok(self.store.snapshot()?.low_stock_products()?)
    }

    pub fn get_order(&self, order_id: OrderId) -> EngineResult<AssemblyOrder> {
        self.store
            .snapshot()?
            .order(order_id)?
            .ok_or_else(|| DomainError::not_found(format!("order {order_id}")).into())
    }

    pub fn orders_by_status(&self, status: OrderStatus) -> EngineResult<Vec<AssemblyOrder>> {
        Ok(self.store.snapshot()?.orders_with_status(status)?)
    }
}

fn ensure_positive(quantity: Decimal) -> EngineResult<()> {
    if quantity <= Decimal::ZERO {
        return Err(DomainError::validation("quantity must be positive").into());
    }
    Ok(())
}
