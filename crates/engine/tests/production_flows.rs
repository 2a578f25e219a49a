//! End-to-end flows through the production service backed by the in-memory
//! store: internal production, purchase/sale, reversal, and the outsourced
//! assembly order lifecycle.

use std::sync::Arc;

use rust_decimal::Decimal;

use tallerp_catalog::{Assembler, AssemblyWork, BomEdge, Product, ProductKind, WorkRequirement};
use tallerp_core::{AssemblerId, DomainError, ProductId, UserId, WorkId};
use tallerp_engine::{EngineError, OrderMode, OrderOutcome, OrderTransition, ProductionService};
use tallerp_ledger::MovementKind;
use tallerp_orders::OrderStatus;
use tallerp_store::{CatalogReader, InMemoryStore, InventoryStore, StoreReader, StoreTx};

struct Harness {
    store: Arc<InMemoryStore>,
    service: ProductionService<Arc<InMemoryStore>>,
    actor: UserId,
}

impl Harness {
    fn new() -> Self {
        let store = Arc::new(InMemoryStore::new());
        let service = ProductionService::new(Arc::clone(&store));
        Self {
            store,
            service,
            actor: UserId::new(),
        }
    }

    fn product(&self, sku: &str, kind: ProductKind, stock: i64) -> Product {
        self.product_with_threshold(sku, kind, stock, 0)
    }

    fn product_with_threshold(
        &self,
        sku: &str,
        kind: ProductKind,
        stock: i64,
        threshold: i64,
    ) -> Product {
        let product = Product::new(
            ProductId::new(),
            sku,
            sku,
            kind,
            Decimal::from(stock),
            Decimal::from(threshold),
        )
        .unwrap();
        let mut tx = self.store.begin().unwrap();
        tx.insert_product(&product).unwrap();
        tx.commit().unwrap();
        product
    }

    fn edge(&self, parent: &Product, child: &Product, quantity: i64) {
        let edge = BomEdge::new(parent.id, child.id, Decimal::from(quantity)).unwrap();
        let mut tx = self.store.begin().unwrap();
        tx.insert_component(&edge).unwrap();
        tx.commit().unwrap();
    }

    fn assembler(&self, name: &str) -> Assembler {
        let assembler = Assembler::new(AssemblerId::new(), name).unwrap();
        let mut tx = self.store.begin().unwrap();
        tx.insert_assembler(&assembler).unwrap();
        tx.commit().unwrap();
        assembler
    }

    fn work(&self, name: &str, unit_price: i64, product: &Product, quantity: i64) {
        let work = AssemblyWork::new(WorkId::new(), name, Decimal::from(unit_price)).unwrap();
        let requirement =
            WorkRequirement::new(product.id, work.id, Decimal::from(quantity)).unwrap();
        let mut tx = self.store.begin().unwrap();
        tx.insert_work(&work).unwrap();
        tx.insert_work_requirement(&requirement).unwrap();
        tx.commit().unwrap();
    }

    fn stock_of(&self, product: &Product) -> Decimal {
        self.store
            .snapshot()
            .unwrap()
            .product(product.id)
            .unwrap()
            .unwrap()
            .stock
    }

    fn movement_count(&self, product: &Product) -> usize {
        self.store
            .snapshot()
            .unwrap()
            .movements_for_product(product.id)
            .unwrap()
            .len()
    }
}

fn domain_err(err: EngineError) -> DomainError {
    err.as_domain().cloned().expect("expected a domain error")
}

#[test]
fn internal_production_writes_three_correlated_movements() {
    let h = Harness::new();
    let trn = h.product("TRN-DT01", ProductKind::RawMaterial, 500);
    let brn = h.product("BRN-DT01", ProductKind::RawMaterial, 500);
    let ar = h.product("AR-ZP401", ProductKind::PreAssembled, 0);
    h.edge(&ar, &trn, 1);
    h.edge(&ar, &brn, 1);

    let batch = h
        .service
        .commit_internal_production(ar.id, Decimal::from(10), h.actor)
        .unwrap();

    assert_eq!(h.stock_of(&trn), Decimal::from(490));
    assert_eq!(h.stock_of(&brn), Decimal::from(490));
    assert_eq!(h.stock_of(&ar), Decimal::from(10));

    assert_eq!(batch.movements.len(), 3);
    assert!(batch.movements.iter().all(|m| m.group == Some(batch.group)));
    let production_in = batch
        .movements
        .iter()
        .filter(|m| m.kind == MovementKind::ProductionIn)
        .count();
    let production_out = batch
        .movements
        .iter()
        .filter(|m| m.kind == MovementKind::ProductionOut)
        .count();
    assert_eq!(production_in, 1);
    assert_eq!(production_out, 2);
}

#[test]
fn insufficient_stock_aborts_without_writing_anything() {
    let h = Harness::new();
    let steel = h.product("STEEL", ProductKind::RawMaterial, 40);
    let frame = h.product("FRAME", ProductKind::PreAssembled, 0);
    h.edge(&frame, &steel, 100);

    let err = h
        .service
        .commit_internal_production(frame.id, Decimal::ONE, h.actor)
        .unwrap_err();
    match domain_err(err) {
        DomainError::InsufficientStock {
            product,
            required,
            available,
        } => {
            assert_eq!(product, "STEEL");
            assert_eq!(required, Decimal::from(100));
            assert_eq!(available, Decimal::from(40));
        }
        other => panic!("expected InsufficientStock, got {other:?}"),
    }

    assert_eq!(h.stock_of(&steel), Decimal::from(40));
    assert_eq!(h.stock_of(&frame), Decimal::ZERO);
    assert_eq!(h.movement_count(&steel), 0);
    assert_eq!(h.movement_count(&frame), 0);
}

#[test]
fn producing_a_product_without_components_is_rejected() {
    let h = Harness::new();
    let frame = h.product("FRAME", ProductKind::PreAssembled, 0);

    let err = h
        .service
        .commit_internal_production(frame.id, Decimal::ONE, h.actor)
        .unwrap_err();
    assert!(matches!(
        domain_err(err),
        DomainError::NoComponentsDefined(sku) if sku == "FRAME"
    ));
}

#[test]
fn purchases_only_accept_raw_materials() {
    let h = Harness::new();
    let bolt = h.product("BOLT", ProductKind::RawMaterial, 0);
    let chair = h.product("CHAIR", ProductKind::Finished, 0);

    h.service
        .commit_purchase(bolt.id, Decimal::from(25), h.actor, Some("resupply".into()))
        .unwrap();
    assert_eq!(h.stock_of(&bolt), Decimal::from(25));

    let err = h
        .service
        .commit_purchase(chair.id, Decimal::from(5), h.actor, None)
        .unwrap_err();
    assert!(matches!(
        domain_err(err),
        DomainError::WrongProductType { .. }
    ));
}

#[test]
fn sales_require_a_finished_good_with_enough_stock() {
    let h = Harness::new();
    let chair = h.product("CHAIR", ProductKind::Finished, 3);
    let bolt = h.product("BOLT", ProductKind::RawMaterial, 100);

    h.service
        .commit_sale(chair.id, Decimal::from(2), h.actor, None)
        .unwrap();
    assert_eq!(h.stock_of(&chair), Decimal::ONE);

    let err = h
        .service
        .commit_sale(chair.id, Decimal::from(5), h.actor, None)
        .unwrap_err();
    assert!(matches!(
        domain_err(err),
        DomainError::InsufficientStock { .. }
    ));
    // The failed sale rolled back entirely.
    assert_eq!(h.stock_of(&chair), Decimal::ONE);
    assert_eq!(h.movement_count(&chair), 1);

    let err = h
        .service
        .commit_sale(bolt.id, Decimal::ONE, h.actor, None)
        .unwrap_err();
    assert!(matches!(
        domain_err(err),
        DomainError::WrongProductType { .. }
    ));
}

#[test]
fn manual_adjustments_respect_stock_and_kind() {
    let h = Harness::new();
    let bolt = h.product("BOLT", ProductKind::RawMaterial, 10);

    h.service
        .commit_adjustment(
            bolt.id,
            MovementKind::Wastage,
            Decimal::from(4),
            h.actor,
            Some("water damage".into()),
        )
        .unwrap();
    assert_eq!(h.stock_of(&bolt), Decimal::from(6));

    let err = h
        .service
        .commit_adjustment(bolt.id, MovementKind::Wastage, Decimal::from(7), h.actor, None)
        .unwrap_err();
    assert!(matches!(
        domain_err(err),
        DomainError::InsufficientStock { .. }
    ));
    assert_eq!(h.stock_of(&bolt), Decimal::from(6));

    let err = h
        .service
        .commit_adjustment(bolt.id, MovementKind::Sale, Decimal::ONE, h.actor, None)
        .unwrap_err();
    assert!(matches!(domain_err(err), DomainError::Validation(_)));
}

#[test]
fn reversal_is_an_inverse_and_single_use() {
    let h = Harness::new();
    let trn = h.product("TRN-DT01", ProductKind::RawMaterial, 500);
    let brn = h.product("BRN-DT01", ProductKind::RawMaterial, 500);
    let ar = h.product("AR-ZP401", ProductKind::PreAssembled, 0);
    h.edge(&ar, &trn, 1);
    h.edge(&ar, &brn, 1);

    let batch = h
        .service
        .commit_internal_production(ar.id, Decimal::from(10), h.actor)
        .unwrap();

    // Reversing any member of the event group reverses the whole group.
    let reversals = h
        .service
        .reverse_movement(batch.movements[0].id, h.actor)
        .unwrap();
    assert_eq!(reversals.len(), 3);
    assert_eq!(h.stock_of(&trn), Decimal::from(500));
    assert_eq!(h.stock_of(&brn), Decimal::from(500));
    assert_eq!(h.stock_of(&ar), Decimal::ZERO);

    // Income movements reverse to adjustment-out and vice versa.
    let ar_reversal = reversals
        .iter()
        .find(|m| m.product_id == ar.id)
        .unwrap();
    assert_eq!(ar_reversal.kind, MovementKind::AdjustmentOut);
    let trn_reversal = reversals
        .iter()
        .find(|m| m.product_id == trn.id)
        .unwrap();
    assert_eq!(trn_reversal.kind, MovementKind::AdjustmentIn);

    let err = h
        .service
        .reverse_movement(batch.movements[1].id, h.actor)
        .unwrap_err();
    assert!(matches!(domain_err(err), DomainError::AlreadyReversed(_)));

    let err = h
        .service
        .reverse_movement(reversals[0].id, h.actor)
        .unwrap_err();
    assert!(matches!(
        domain_err(err),
        DomainError::CannotReverseAReversal(_)
    ));
}

#[test]
fn reversing_an_unknown_movement_is_not_found() {
    let h = Harness::new();
    let err = h
        .service
        .reverse_movement(tallerp_core::MovementId::new(), h.actor)
        .unwrap_err();
    assert!(matches!(domain_err(err), DomainError::NotFound(_)));
}

#[test]
fn dry_run_reports_shortages_without_writing() {
    let h = Harness::new();
    let steel = h.product("STEEL", ProductKind::RawMaterial, 40);
    let frame = h.product("FRAME", ProductKind::PreAssembled, 0);
    h.edge(&frame, &steel, 100);
    h.work("welding", 30, &frame, 2);

    let preview = h.service.explode_bom(frame.id, Decimal::ONE).unwrap();
    assert_eq!(preview.shortages.len(), 1);
    assert_eq!(preview.shortages[0].required, Decimal::from(100));
    assert_eq!(preview.shortages[0].available, Decimal::from(40));
    assert_eq!(preview.total_labor_cost, Decimal::from(60));

    assert_eq!(h.stock_of(&steel), Decimal::from(40));
    assert_eq!(h.movement_count(&steel), 0);
}

#[test]
fn assembly_order_lifecycle_with_short_receipt() {
    let h = Harness::new();
    let trn = h.product("TRN-DT01", ProductKind::RawMaterial, 500);
    let brn = h.product("BRN-DT01", ProductKind::RawMaterial, 500);
    let ar = h.product("AR-ZP401", ProductKind::PreAssembled, 0);
    h.edge(&ar, &trn, 2);
    h.edge(&ar, &brn, 1);
    h.work("assembly", 12, &ar, 1);
    let assembler = h.assembler("Taller Lopez");

    let outcome = h
        .service
        .create_assembly_order(
            assembler.id,
            ar.id,
            Decimal::from(10),
            h.actor,
            OrderMode::Commit,
        )
        .unwrap();
    let order = match outcome {
        OrderOutcome::Order(order) => order,
        OrderOutcome::Preview(_) => panic!("expected a committed order"),
    };
    let order_id = order.id_typed();

    assert_eq!(order.status(), OrderStatus::PendingDelivery);
    assert_eq!(order.lines().len(), 2);
    assert_eq!(order.steps().len(), 1);
    assert_eq!(h.stock_of(&trn), Decimal::from(480));
    assert_eq!(h.stock_of(&brn), Decimal::from(490));

    let sent = h
        .store
        .snapshot()
        .unwrap()
        .movements_for_product(trn.id)
        .unwrap();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].kind, MovementKind::SentToAssembler);

    h.service
        .transition_order(
            order_id,
            OrderTransition::AssignCourier {
                courier: Some(UserId::new()),
            },
            h.actor,
        )
        .unwrap();
    h.service
        .transition_order(order_id, OrderTransition::ConfirmDelivered, h.actor)
        .unwrap();
    h.service
        .transition_order(order_id, OrderTransition::ConfirmAssembled, h.actor)
        .unwrap();
    h.service
        .transition_order(
            order_id,
            OrderTransition::AssignPickup {
                person: UserId::new(),
            },
            h.actor,
        )
        .unwrap();

    let order = h
        .service
        .transition_order(
            order_id,
            OrderTransition::ReceiveGoods {
                received: vec![(ar.id, Decimal::from(7))],
                justified: false,
                note: None,
            },
            h.actor,
        )
        .unwrap();

    assert_eq!(order.status(), OrderStatus::CompletedWithDiscrepancy);
    assert!(order.has_discrepancy());
    assert_eq!(h.stock_of(&ar), Decimal::from(7));

    let received: Vec<_> = h
        .store
        .snapshot()
        .unwrap()
        .movements_for_product(ar.id)
        .unwrap()
        .into_iter()
        .filter(|m| m.kind == MovementKind::ReceivedFromAssembler)
        .collect();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].quantity, Decimal::from(7));
}

#[test]
fn cancelling_a_pending_order_restores_sent_stock() {
    let h = Harness::new();
    let trn = h.product("TRN-DT01", ProductKind::RawMaterial, 100);
    let ar = h.product("AR-ZP401", ProductKind::PreAssembled, 0);
    h.edge(&ar, &trn, 3);
    let assembler = h.assembler("Taller Lopez");

    let outcome = h
        .service
        .create_assembly_order(
            assembler.id,
            ar.id,
            Decimal::from(10),
            h.actor,
            OrderMode::Commit,
        )
        .unwrap();
    let order = match outcome {
        OrderOutcome::Order(order) => order,
        OrderOutcome::Preview(_) => panic!("expected a committed order"),
    };
    assert_eq!(h.stock_of(&trn), Decimal::from(70));

    let order = h
        .service
        .transition_order(order.id_typed(), OrderTransition::Cancel, h.actor)
        .unwrap();
    assert_eq!(order.status(), OrderStatus::Cancelled);
    assert_eq!(h.stock_of(&trn), Decimal::from(100));

    let restocks: Vec<_> = h
        .store
        .snapshot()
        .unwrap()
        .movements_for_product(trn.id)
        .unwrap()
        .into_iter()
        .filter(|m| m.kind == MovementKind::AdjustmentIn)
        .collect();
    assert_eq!(restocks.len(), 1);
    assert_eq!(restocks[0].quantity, Decimal::from(30));
}

#[test]
fn order_creation_shortage_leaves_no_trace() {
    let h = Harness::new();
    let trn = h.product("TRN-DT01", ProductKind::RawMaterial, 5);
    let ar = h.product("AR-ZP401", ProductKind::PreAssembled, 0);
    h.edge(&ar, &trn, 1);
    let assembler = h.assembler("Taller Lopez");

    let err = h
        .service
        .create_assembly_order(
            assembler.id,
            ar.id,
            Decimal::from(10),
            h.actor,
            OrderMode::Commit,
        )
        .unwrap_err();
    assert!(matches!(
        domain_err(err),
        DomainError::InsufficientStock { .. }
    ));

    assert_eq!(h.stock_of(&trn), Decimal::from(5));
    assert_eq!(h.movement_count(&trn), 0);
    assert!(h
        .service
        .orders_by_status(OrderStatus::PendingDelivery)
        .unwrap()
        .is_empty());
}

#[test]
fn order_dry_run_returns_a_preview() {
    let h = Harness::new();
    let trn = h.product("TRN-DT01", ProductKind::RawMaterial, 5);
    let ar = h.product("AR-ZP401", ProductKind::PreAssembled, 0);
    h.edge(&ar, &trn, 1);
    let assembler = h.assembler("Taller Lopez");

    let outcome = h
        .service
        .create_assembly_order(
            assembler.id,
            ar.id,
            Decimal::from(10),
            h.actor,
            OrderMode::DryRun,
        )
        .unwrap();
    match outcome {
        OrderOutcome::Preview(preview) => {
            assert_eq!(preview.materials.len(), 1);
            assert_eq!(preview.shortages.len(), 1);
        }
        OrderOutcome::Order(_) => panic!("dry run must not create an order"),
    }
    assert_eq!(h.stock_of(&trn), Decimal::from(5));
}

#[test]
fn transitions_from_the_wrong_state_are_rejected() {
    let h = Harness::new();
    let trn = h.product("TRN-DT01", ProductKind::RawMaterial, 100);
    let ar = h.product("AR-ZP401", ProductKind::PreAssembled, 0);
    h.edge(&ar, &trn, 1);
    let assembler = h.assembler("Taller Lopez");

    let outcome = h
        .service
        .create_assembly_order(assembler.id, ar.id, Decimal::from(10), h.actor, OrderMode::Commit)
        .unwrap();
    let order = match outcome {
        OrderOutcome::Order(order) => order,
        OrderOutcome::Preview(_) => panic!("expected a committed order"),
    };

    let err = h
        .service
        .transition_order(order.id_typed(), OrderTransition::ConfirmAssembled, h.actor)
        .unwrap_err();
    match domain_err(err) {
        DomainError::InvalidStateTransition { current, expected } => {
            assert_eq!(current, "pending_delivery");
            assert_eq!(expected, "in_assembly");
        }
        other => panic!("expected InvalidStateTransition, got {other:?}"),
    }
}

#[test]
fn add_component_guards_the_graph() {
    let h = Harness::new();
    let frame = h.product("FRAME", ProductKind::PreAssembled, 0);
    let panel = h.product("PANEL", ProductKind::PreAssembled, 0);
    let bolt = h.product("BOLT", ProductKind::RawMaterial, 0);

    h.service
        .add_component(frame.id, panel.id, Decimal::from(2))
        .unwrap();
    h.service
        .add_component(panel.id, bolt.id, Decimal::from(8))
        .unwrap();

    // panel → frame would close frame → panel → frame.
    let err = h
        .service
        .add_component(panel.id, frame.id, Decimal::ONE)
        .unwrap_err();
    assert!(matches!(domain_err(err), DomainError::Validation(_)));

    let err = h
        .service
        .add_component(frame.id, panel.id, Decimal::from(2))
        .unwrap_err();
    assert!(matches!(domain_err(err), DomainError::Conflict(_)));

    // Raw materials are leaves and cannot carry a recipe.
    let err = h
        .service
        .add_component(bolt.id, panel.id, Decimal::ONE)
        .unwrap_err();
    assert!(matches!(
        domain_err(err),
        DomainError::WrongProductType { .. }
    ));
}

#[test]
fn low_stock_listing_uses_the_threshold() {
    let h = Harness::new();
    let low = h.product_with_threshold("LOW", ProductKind::RawMaterial, 3, 10);
    let _ok = h.product_with_threshold("OK", ProductKind::RawMaterial, 30, 10);

    let listed = h.service.low_stock_products().unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, low.id);
}

#[test]
fn movement_history_tracks_the_ledger_in_order() {
    let h = Harness::new();
    let bolt = h.product("BOLT", ProductKind::RawMaterial, 0);

    h.service
        .commit_purchase(bolt.id, Decimal::from(10), h.actor, None)
        .unwrap();
    h.service
        .commit_adjustment(bolt.id, MovementKind::Wastage, Decimal::from(2), h.actor, None)
        .unwrap();

    let history = h.service.movement_history(bolt.id).unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].kind, MovementKind::Purchase);
    assert_eq!(history[1].kind, MovementKind::Wastage);
    assert_eq!(h.stock_of(&bolt), Decimal::from(8));
}
