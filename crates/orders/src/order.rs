use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use tallerp_core::{
    Aggregate, AggregateRoot, AssemblerId, DomainError, DomainResult, OrderId, ProductId, UserId,
    WorkId,
};

/// Assembly order status lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    PendingDelivery,
    OutForDelivery,
    DeliveryFailed,
    InAssembly,
    PendingPickup,
    ReturnInTransit,
    Completed,
    CompletedWithNotes,
    CompletedWithDiscrepancy,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            OrderStatus::PendingDelivery => "pending_delivery",
            OrderStatus::OutForDelivery => "out_for_delivery",
            OrderStatus::DeliveryFailed => "delivery_failed",
            OrderStatus::InAssembly => "in_assembly",
            OrderStatus::PendingPickup => "pending_pickup",
            OrderStatus::ReturnInTransit => "return_in_transit",
            OrderStatus::Completed => "completed",
            OrderStatus::CompletedWithNotes => "completed_with_notes",
            OrderStatus::CompletedWithDiscrepancy => "completed_with_discrepancy",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> DomainResult<Self> {
        match s {
            "pending_delivery" => Ok(OrderStatus::PendingDelivery),
            "out_for_delivery" => Ok(OrderStatus::OutForDelivery),
            "delivery_failed" => Ok(OrderStatus::DeliveryFailed),
            "in_assembly" => Ok(OrderStatus::InAssembly),
            "pending_pickup" => Ok(OrderStatus::PendingPickup),
            "return_in_transit" => Ok(OrderStatus::ReturnInTransit),
            "completed" => Ok(OrderStatus::Completed),
            "completed_with_notes" => Ok(OrderStatus::CompletedWithNotes),
            "completed_with_discrepancy" => Ok(OrderStatus::CompletedWithDiscrepancy),
            "cancelled" => Ok(OrderStatus::Cancelled),
            other => Err(DomainError::validation(format!(
                "unknown order status '{other}'"
            ))),
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OrderStatus::Completed
                | OrderStatus::CompletedWithNotes
                | OrderStatus::CompletedWithDiscrepancy
                | OrderStatus::Cancelled
        )
    }
}

impl core::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Material line item sent out to the assembler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SentLine {
    pub product_id: ProductId,
    pub quantity: Decimal,
}

/// Expected finished-good output of the order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpectedOutput {
    pub product_id: ProductId,
    pub expected: Decimal,
    /// Filled when goods are received; zero until then.
    pub received: Decimal,
}

impl ExpectedOutput {
    pub fn new(product_id: ProductId, expected: Decimal) -> Self {
        Self {
            product_id,
            expected,
            received: Decimal::ZERO,
        }
    }
}

/// Informational assembly step carried on the order (no stock effect).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssemblyStep {
    pub work_id: WorkId,
    pub name: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
}

/// One entry of the order's append-only note log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderNote {
    pub author: UserId,
    pub text: String,
    pub at: DateTime<Utc>,
}

/// Per-output comparison computed at receive time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptLine {
    pub product_id: ProductId,
    pub expected: Decimal,
    pub received: Decimal,
}

/// Aggregate root: AssemblyOrder (an outsourced-production order).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssemblyOrder {
    id: OrderId,
    assembler_id: Option<AssemblerId>,
    status: OrderStatus,
    created_at: Option<DateTime<Utc>>,
    expected_by: Option<DateTime<Utc>>,
    courier: Option<UserId>,
    pickup_person: Option<UserId>,
    lines: Vec<SentLine>,
    outputs: Vec<ExpectedOutput>,
    steps: Vec<AssemblyStep>,
    notes: Vec<OrderNote>,
    discrepancy: bool,
    version: u64,
    created: bool,
}

impl AssemblyOrder {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: OrderId) -> Self {
        Self {
            id,
            assembler_id: None,
            status: OrderStatus::PendingDelivery,
            created_at: None,
            expected_by: None,
            courier: None,
            pickup_person: None,
            lines: Vec::new(),
            outputs: Vec::new(),
            steps: Vec::new(),
            notes: Vec::new(),
            discrepancy: false,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> OrderId {
        self.id
    }

    pub fn assembler_id(&self) -> Option<AssemblerId> {
        self.assembler_id
    }

    pub fn status(&self) -> OrderStatus {
        self.status
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    pub fn expected_by(&self) -> Option<DateTime<Utc>> {
        self.expected_by
    }

    pub fn courier(&self) -> Option<UserId> {
        self.courier
    }

    pub fn pickup_person(&self) -> Option<UserId> {
        self.pickup_person
    }

    pub fn lines(&self) -> &[SentLine] {
        &self.lines
    }

    pub fn outputs(&self) -> &[ExpectedOutput] {
        &self.outputs
    }

    pub fn steps(&self) -> &[AssemblyStep] {
        &self.steps
    }

    pub fn notes(&self) -> &[OrderNote] {
        &self.notes
    }

    pub fn has_discrepancy(&self) -> bool {
        self.discrepancy
    }
}

impl AggregateRoot for AssemblyOrder {
    type Id = OrderId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: Open (created on commit of an external-order creation).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Open {
    pub order_id: OrderId,
    pub assembler_id: AssemblerId,
    pub lines: Vec<SentLine>,
    pub outputs: Vec<ExpectedOutput>,
    pub steps: Vec<AssemblyStep>,
    pub expected_by: Option<DateTime<Utc>>,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AssignCourier. `None` clears the assignment and returns the order
/// to `PendingDelivery`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignCourier {
    pub order_id: OrderId,
    pub courier: Option<UserId>,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: Cancel (only while nothing has left for the assembler yet).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cancel {
    pub order_id: OrderId,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ConfirmDelivered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmDelivered {
    pub order_id: OrderId,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ReportDeliveryFailure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportDeliveryFailure {
    pub order_id: OrderId,
    pub note: String,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ConfirmAssembled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmAssembled {
    pub order_id: OrderId,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AssignPickup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignPickup {
    pub order_id: OrderId,
    pub person: UserId,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ReceiveGoods.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiveGoods {
    pub order_id: OrderId,
    /// Quantities received per product for this delivery.
    pub received: Vec<(ProductId, Decimal)>,
    /// Caller flags a discrepancy as justified (e.g. agreed breakage).
    pub justified: bool,
    pub note: Option<String>,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderCommand {
    Open(Open),
    AssignCourier(AssignCourier),
    Cancel(Cancel),
    ConfirmDelivered(ConfirmDelivered),
    ReportDeliveryFailure(ReportDeliveryFailure),
    ConfirmAssembled(ConfirmAssembled),
    AssignPickup(AssignPickup),
    ReceiveGoods(ReceiveGoods),
}

/// Event: Opened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Opened {
    pub order_id: OrderId,
    pub assembler_id: AssemblerId,
    pub lines: Vec<SentLine>,
    pub outputs: Vec<ExpectedOutput>,
    pub steps: Vec<AssemblyStep>,
    pub expected_by: Option<DateTime<Utc>>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: CourierAssigned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CourierAssigned {
    pub order_id: OrderId,
    pub courier: Option<UserId>,
    pub status_after: OrderStatus,
    pub occurred_at: DateTime<Utc>,
}

/// Event: Cancelled.
///
/// Carries the sent line items so the caller can restore their stock (one
/// offsetting ledger movement per line).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cancelled {
    pub order_id: OrderId,
    pub restock: Vec<SentLine>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: DeliveryConfirmed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryConfirmed {
    pub order_id: OrderId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: DeliveryFailureReported.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryFailureReported {
    pub order_id: OrderId,
    pub note: OrderNote,
    pub occurred_at: DateTime<Utc>,
}

/// Event: AssemblyConfirmed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssemblyConfirmed {
    pub order_id: OrderId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PickupAssigned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PickupAssigned {
    pub order_id: OrderId,
    pub person: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: GoodsReceived.
///
/// Carries the per-output receipt comparison so the caller can apply stock
/// increments and ledger writes for every line actually received.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GoodsReceived {
    pub order_id: OrderId,
    pub receipts: Vec<ReceiptLine>,
    pub discrepancy: bool,
    pub final_status: OrderStatus,
    pub note: Option<OrderNote>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderEvent {
    Opened(Opened),
    CourierAssigned(CourierAssigned),
    Cancelled(Cancelled),
    DeliveryConfirmed(DeliveryConfirmed),
    DeliveryFailureReported(DeliveryFailureReported),
    AssemblyConfirmed(AssemblyConfirmed),
    PickupAssigned(PickupAssigned),
    GoodsReceived(GoodsReceived),
}

impl Aggregate for AssemblyOrder {
    type Command = OrderCommand;
    type Event = OrderEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            OrderEvent::Opened(e) => {
                self.id = e.order_id;
                self.assembler_id = Some(e.assembler_id);
                self.status = OrderStatus::PendingDelivery;
                self.created_at = Some(e.occurred_at);
                self.expected_by = e.expected_by;
                self.lines = e.lines.clone();
                self.outputs = e.outputs.clone();
                self.steps = e.steps.clone();
                self.created = true;
            }
            OrderEvent::CourierAssigned(e) => {
                self.courier = e.courier;
                self.status = e.status_after;
            }
            OrderEvent::Cancelled(_) => {
                self.status = OrderStatus::Cancelled;
            }
            OrderEvent::DeliveryConfirmed(_) => {
                self.status = OrderStatus::InAssembly;
            }
            OrderEvent::DeliveryFailureReported(e) => {
                self.notes.push(e.note.clone());
                self.status = OrderStatus::DeliveryFailed;
            }
            OrderEvent::AssemblyConfirmed(_) => {
                self.status = OrderStatus::PendingPickup;
            }
            OrderEvent::PickupAssigned(e) => {
                self.pickup_person = Some(e.person);
                self.status = OrderStatus::ReturnInTransit;
            }
            OrderEvent::GoodsReceived(e) => {
                for receipt in &e.receipts {
                    if let Some(output) = self
                        .outputs
                        .iter_mut()
                        .find(|o| o.product_id == receipt.product_id)
                    {
                        output.received = receipt.received;
                    }
                }
                self.discrepancy = e.discrepancy;
                if let Some(note) = &e.note {
                    self.notes.push(note.clone());
                }
                self.status = e.final_status;
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            OrderCommand::Open(cmd) => self.handle_open(cmd),
            OrderCommand::AssignCourier(cmd) => self.handle_assign_courier(cmd),
            OrderCommand::Cancel(cmd) => self.handle_cancel(cmd),
            OrderCommand::ConfirmDelivered(cmd) => self.handle_confirm_delivered(cmd),
            OrderCommand::ReportDeliveryFailure(cmd) => self.handle_delivery_failure(cmd),
            OrderCommand::ConfirmAssembled(cmd) => self.handle_confirm_assembled(cmd),
            OrderCommand::AssignPickup(cmd) => self.handle_assign_pickup(cmd),
            OrderCommand::ReceiveGoods(cmd) => self.handle_receive(cmd),
        }
    }
}

impl AssemblyOrder {
    fn ensure_created(&self) -> DomainResult<()> {
        if !self.created {
            return Err(DomainError::not_found(format!("order {}", self.id)));
        }
        Ok(())
    }

    fn require_status(&self, expected: OrderStatus) -> DomainResult<()> {
        if self.status != expected {
            return Err(DomainError::invalid_transition(
                self.status.as_str(),
                expected.as_str(),
            ));
        }
        Ok(())
    }

    fn handle_open(&self, cmd: &Open) -> DomainResult<Vec<OrderEvent>> {
        if self.created {
            return Err(DomainError::conflict("order already exists"));
        }
        if cmd.outputs.is_empty() {
            return Err(DomainError::validation(
                "order must expect at least one output",
            ));
        }

        Ok(vec![OrderEvent::Opened(Opened {
            order_id: cmd.order_id,
            assembler_id: cmd.assembler_id,
            lines: cmd.lines.clone(),
            outputs: cmd.outputs.clone(),
            steps: cmd.steps.clone(),
            expected_by: cmd.expected_by,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_assign_courier(&self, cmd: &AssignCourier) -> DomainResult<Vec<OrderEvent>> {
        self.ensure_created()?;

        let assignable = matches!(
            self.status,
            OrderStatus::PendingDelivery | OrderStatus::OutForDelivery | OrderStatus::DeliveryFailed
        );
        if !assignable {
            return Err(DomainError::invalid_transition(
                self.status.as_str(),
                "pending_delivery | out_for_delivery | delivery_failed",
            ));
        }

        let status_after = if cmd.courier.is_some() {
            OrderStatus::OutForDelivery
        } else {
            OrderStatus::PendingDelivery
        };

        Ok(vec![OrderEvent::CourierAssigned(CourierAssigned {
            order_id: cmd.order_id,
            courier: cmd.courier,
            status_after,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_cancel(&self, cmd: &Cancel) -> DomainResult<Vec<OrderEvent>> {
        self.ensure_created()?;
        self.require_status(OrderStatus::PendingDelivery)?;

        Ok(vec![OrderEvent::Cancelled(Cancelled {
            order_id: cmd.order_id,
            restock: self.lines.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_confirm_delivered(&self, cmd: &ConfirmDelivered) -> DomainResult<Vec<OrderEvent>> {
        self.ensure_created()?;
        self.require_status(OrderStatus::OutForDelivery)?;

        Ok(vec![OrderEvent::DeliveryConfirmed(DeliveryConfirmed {
            order_id: cmd.order_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_delivery_failure(&self, cmd: &ReportDeliveryFailure) -> DomainResult<Vec<OrderEvent>> {
        self.ensure_created()?;
        self.require_status(OrderStatus::OutForDelivery)?;

        if cmd.note.trim().is_empty() {
            return Err(DomainError::validation(
                "delivery failure requires a note explaining what happened",
            ));
        }

        Ok(vec![OrderEvent::DeliveryFailureReported(
            DeliveryFailureReported {
                order_id: cmd.order_id,
                note: OrderNote {
                    author: cmd.actor,
                    text: cmd.note.clone(),
                    at: cmd.occurred_at,
                },
                occurred_at: cmd.occurred_at,
            },
        )])
    }

    fn handle_confirm_assembled(&self, cmd: &ConfirmAssembled) -> DomainResult<Vec<OrderEvent>> {
        self.ensure_created()?;
        self.require_status(OrderStatus::InAssembly)?;

        Ok(vec![OrderEvent::AssemblyConfirmed(AssemblyConfirmed {
            order_id: cmd.order_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_assign_pickup(&self, cmd: &AssignPickup) -> DomainResult<Vec<OrderEvent>> {
        self.ensure_created()?;
        self.require_status(OrderStatus::PendingPickup)?;

        Ok(vec![OrderEvent::PickupAssigned(PickupAssigned {
            order_id: cmd.order_id,
            person: cmd.person,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_receive(&self, cmd: &ReceiveGoods) -> DomainResult<Vec<OrderEvent>> {
        self.ensure_created()?;
        self.require_status(OrderStatus::ReturnInTransit)?;

        let mut seen = std::collections::HashSet::new();
        for (product_id, qty) in &cmd.received {
            if *qty < Decimal::ZERO {
                return Err(DomainError::validation(
                    "received quantity cannot be negative",
                ));
            }
            if !seen.insert(*product_id) {
                return Err(DomainError::validation(format!(
                    "product {product_id} appears more than once in the receipt"
                )));
            }
            if !self.outputs.iter().any(|o| o.product_id == *product_id) {
                return Err(DomainError::validation(format!(
                    "product {product_id} is not an expected output of this order"
                )));
            }
        }

        let receipts: Vec<ReceiptLine> = self
            .outputs
            .iter()
            .map(|output| {
                let received = cmd
                    .received
                    .iter()
                    .find(|(id, _)| *id == output.product_id)
                    .map(|(_, qty)| *qty)
                    .unwrap_or(Decimal::ZERO);
                ReceiptLine {
                    product_id: output.product_id,
                    expected: output.expected,
                    received,
                }
            })
            .collect();

        let discrepancy = receipts.iter().any(|r| r.received != r.expected);
        let final_status = if !discrepancy {
            OrderStatus::Completed
        } else if cmd.justified {
            OrderStatus::CompletedWithNotes
        } else {
            OrderStatus::CompletedWithDiscrepancy
        };

        let note = cmd.note.as_ref().map(|text| OrderNote {
            author: cmd.actor,
            text: text.clone(),
            at: cmd.occurred_at,
        });

        Ok(vec![OrderEvent::GoodsReceived(GoodsReceived {
            order_id: cmd.order_id,
            receipts,
            discrepancy,
            final_status,
            note,
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_order_id() -> OrderId {
        OrderId::new()
    }

    fn test_actor() -> UserId {
        UserId::new()
    }

    fn test_time() -> DateTime<Utc> {
        Utc::now()
    }

    fn apply_all(order: &mut AssemblyOrder, events: &[OrderEvent]) {
        for e in events {
            order.apply(e);
        }
    }

    /// Open an order expecting 10 units of one product, with one sent line.
    fn opened_order() -> (AssemblyOrder, ProductId, ProductId) {
        let order_id = test_order_id();
        let output_product = ProductId::new();
        let sent_product = ProductId::new();
        let mut order = AssemblyOrder::empty(order_id);

        let cmd = Open {
            order_id,
            assembler_id: AssemblerId::new(),
            lines: vec![SentLine {
                product_id: sent_product,
                quantity: Decimal::from(20),
            }],
            outputs: vec![ExpectedOutput::new(output_product, Decimal::from(10))],
            steps: Vec::new(),
            expected_by: None,
            actor: test_actor(),
            occurred_at: test_time(),
        };
        let events = order.handle(&OrderCommand::Open(cmd)).unwrap();
        apply_all(&mut order, &events);
        (order, output_product, sent_product)
    }

    fn drive_to(order: &mut AssemblyOrder, target: OrderStatus) {
        let order_id = order.id_typed();
        let actor = test_actor();

        let commands: Vec<OrderCommand> = vec![
            OrderCommand::AssignCourier(AssignCourier {
                order_id,
                courier: Some(UserId::new()),
                actor,
                occurred_at: test_time(),
            }),
            OrderCommand::ConfirmDelivered(ConfirmDelivered {
                order_id,
                actor,
                occurred_at: test_time(),
            }),
            OrderCommand::ConfirmAssembled(ConfirmAssembled {
                order_id,
                actor,
                occurred_at: test_time(),
            }),
            OrderCommand::AssignPickup(AssignPickup {
                order_id,
                person: UserId::new(),
                actor,
                occurred_at: test_time(),
            }),
        ];

        for cmd in commands {
            if order.status() == target {
                return;
            }
            let events = order.handle(&cmd).unwrap();
            apply_all(order, &events);
        }
        assert_eq!(order.status(), target);
    }

    #[test]
    fn open_starts_in_pending_delivery() {
        let (order, _, _) = opened_order();
        assert_eq!(order.status(), OrderStatus::PendingDelivery);
        assert_eq!(order.lines().len(), 1);
        assert_eq!(order.outputs().len(), 1);
    }

    #[test]
    fn open_without_outputs_is_rejected() {
        let order_id = test_order_id();
        let order = AssemblyOrder::empty(order_id);
        let cmd = Open {
            order_id,
            assembler_id: AssemblerId::new(),
            lines: Vec::new(),
            outputs: Vec::new(),
            steps: Vec::new(),
            expected_by: None,
            actor: test_actor(),
            occurred_at: test_time(),
        };
        let err = order.handle(&OrderCommand::Open(cmd)).unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn assigning_courier_moves_to_out_for_delivery() {
        let (mut order, _, _) = opened_order();
        let events = order
            .handle(&OrderCommand::AssignCourier(AssignCourier {
                order_id: order.id_typed(),
                courier: Some(UserId::new()),
                actor: test_actor(),
                occurred_at: test_time(),
            }))
            .unwrap();
        apply_all(&mut order, &events);
        assert_eq!(order.status(), OrderStatus::OutForDelivery);
        assert!(order.courier().is_some());
    }

    #[test]
    fn clearing_courier_returns_to_pending_delivery() {
        let (mut order, _, _) = opened_order();
        drive_to(&mut order, OrderStatus::OutForDelivery);

        let events = order
            .handle(&OrderCommand::AssignCourier(AssignCourier {
                order_id: order.id_typed(),
                courier: None,
                actor: test_actor(),
                occurred_at: test_time(),
            }))
            .unwrap();
        apply_all(&mut order, &events);
        assert_eq!(order.status(), OrderStatus::PendingDelivery);
        assert!(order.courier().is_none());
    }

    #[test]
    fn cancel_is_only_allowed_before_delivery_starts() {
        let (mut order, _, sent_product) = opened_order();

        // Cancel from PendingDelivery carries the restock lines.
        let events = order
            .handle(&OrderCommand::Cancel(Cancel {
                order_id: order.id_typed(),
                actor: test_actor(),
                occurred_at: test_time(),
            }))
            .unwrap();
        match &events[0] {
            OrderEvent::Cancelled(e) => {
                assert_eq!(e.restock.len(), 1);
                assert_eq!(e.restock[0].product_id, sent_product);
                assert_eq!(e.restock[0].quantity, Decimal::from(20));
            }
            other => panic!("expected Cancelled event, got {other:?}"),
        }
        apply_all(&mut order, &events);
        assert_eq!(order.status(), OrderStatus::Cancelled);
    }

    #[test]
    fn cancel_after_dispatch_fails_with_state_error() {
        let (mut order, _, _) = opened_order();
        drive_to(&mut order, OrderStatus::OutForDelivery);

        let err = order
            .handle(&OrderCommand::Cancel(Cancel {
                order_id: order.id_typed(),
                actor: test_actor(),
                occurred_at: test_time(),
            }))
            .unwrap_err();
        match err {
            DomainError::InvalidStateTransition { current, expected } => {
                assert_eq!(current, "out_for_delivery");
                assert_eq!(expected, "pending_delivery");
            }
            other => panic!("expected InvalidStateTransition, got {other:?}"),
        }
    }

    #[test]
    fn confirm_assembly_from_pending_delivery_fails() {
        let (order, _, _) = opened_order();
        let err = order
            .handle(&OrderCommand::ConfirmAssembled(ConfirmAssembled {
                order_id: order.id_typed(),
                actor: test_actor(),
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidStateTransition { .. }));
    }

    #[test]
    fn delivery_failure_appends_note_and_allows_reassignment() {
        let (mut order, _, _) = opened_order();
        drive_to(&mut order, OrderStatus::OutForDelivery);

        let events = order
            .handle(&OrderCommand::ReportDeliveryFailure(ReportDeliveryFailure {
                order_id: order.id_typed(),
                note: "nobody at the workshop".to_string(),
                actor: test_actor(),
                occurred_at: test_time(),
            }))
            .unwrap();
        apply_all(&mut order, &events);
        assert_eq!(order.status(), OrderStatus::DeliveryFailed);
        assert_eq!(order.notes().len(), 1);

        // A failed delivery can be sent out again.
        let events = order
            .handle(&OrderCommand::AssignCourier(AssignCourier {
                order_id: order.id_typed(),
                courier: Some(UserId::new()),
                actor: test_actor(),
                occurred_at: test_time(),
            }))
            .unwrap();
        apply_all(&mut order, &events);
        assert_eq!(order.status(), OrderStatus::OutForDelivery);
    }

    #[test]
    fn exact_receipt_completes_the_order() {
        let (mut order, output_product, _) = opened_order();
        drive_to(&mut order, OrderStatus::ReturnInTransit);

        let events = order
            .handle(&OrderCommand::ReceiveGoods(ReceiveGoods {
                order_id: order.id_typed(),
                received: vec![(output_product, Decimal::from(10))],
                justified: false,
                note: None,
                actor: test_actor(),
                occurred_at: test_time(),
            }))
            .unwrap();
        apply_all(&mut order, &events);
        assert_eq!(order.status(), OrderStatus::Completed);
        assert!(!order.has_discrepancy());
        assert_eq!(order.outputs()[0].received, Decimal::from(10));
    }

    #[test]
    fn short_receipt_without_justification_marks_discrepancy() {
        let (mut order, output_product, _) = opened_order();
        drive_to(&mut order, OrderStatus::ReturnInTransit);

        let events = order
            .handle(&OrderCommand::ReceiveGoods(ReceiveGoods {
                order_id: order.id_typed(),
                received: vec![(output_product, Decimal::from(7))],
                justified: false,
                note: None,
                actor: test_actor(),
                occurred_at: test_time(),
            }))
            .unwrap();
        match &events[0] {
            OrderEvent::GoodsReceived(e) => {
                assert!(e.discrepancy);
                assert_eq!(e.final_status, OrderStatus::CompletedWithDiscrepancy);
                assert_eq!(e.receipts[0].received, Decimal::from(7));
                assert_eq!(e.receipts[0].expected, Decimal::from(10));
            }
            other => panic!("expected GoodsReceived event, got {other:?}"),
        }
        apply_all(&mut order, &events);
        assert_eq!(order.status(), OrderStatus::CompletedWithDiscrepancy);
        assert!(order.has_discrepancy());
    }

    #[test]
    fn justified_short_receipt_completes_with_notes() {
        let (mut order, output_product, _) = opened_order();
        drive_to(&mut order, OrderStatus::ReturnInTransit);

        let events = order
            .handle(&OrderCommand::ReceiveGoods(ReceiveGoods {
                order_id: order.id_typed(),
                received: vec![(output_product, Decimal::from(7))],
                justified: true,
                note: Some("three units broke in transit, photos attached".to_string()),
                actor: test_actor(),
                occurred_at: test_time(),
            }))
            .unwrap();
        apply_all(&mut order, &events);
        assert_eq!(order.status(), OrderStatus::CompletedWithNotes);
        assert_eq!(order.notes().len(), 1);
    }

    #[test]
    fn receiving_an_unexpected_product_is_rejected() {
        let (mut order, _, _) = opened_order();
        drive_to(&mut order, OrderStatus::ReturnInTransit);

        let err = order
            .handle(&OrderCommand::ReceiveGoods(ReceiveGoods {
                order_id: order.id_typed(),
                received: vec![(ProductId::new(), Decimal::from(1))],
                justified: false,
                note: None,
                actor: test_actor(),
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn receive_from_wrong_state_names_both_states() {
        let (mut order, output_product, _) = opened_order();
        drive_to(&mut order, OrderStatus::OutForDelivery);

        let err = order
            .handle(&OrderCommand::ReceiveGoods(ReceiveGoods {
                order_id: order.id_typed(),
                received: vec![(output_product, Decimal::from(10))],
                justified: false,
                note: None,
                actor: test_actor(),
                occurred_at: test_time(),
            }))
            .unwrap_err();
        match err {
            DomainError::InvalidStateTransition { current, expected } => {
                assert_eq!(current, "out_for_delivery");
                assert_eq!(expected, "return_in_transit");
            }
            other => panic!("expected InvalidStateTransition, got {other:?}"),
        }
    }
}
