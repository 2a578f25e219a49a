use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use tallerp_core::{DomainError, DomainResult, EventGroupId, MovementId, ProductId, UserId};

/// Economic direction of a movement; implied by its kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Income,
    Outgoing,
}

/// Movement taxonomy. Quantity is always positive; the kind carries direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovementKind {
    Purchase,
    ProductionIn,
    ProductionOut,
    Sale,
    CustomerReturn,
    AdjustmentIn,
    AdjustmentOut,
    Wastage,
    SentToAssembler,
    ReceivedFromAssembler,
}

impl MovementKind {
    pub fn direction(self) -> Direction {
        match self {
            MovementKind::Purchase
            | MovementKind::ProductionIn
            | MovementKind::CustomerReturn
            | MovementKind::AdjustmentIn
            | MovementKind::ReceivedFromAssembler => Direction::Income,
            MovementKind::ProductionOut
            | MovementKind::Sale
            | MovementKind::AdjustmentOut
            | MovementKind::Wastage
            | MovementKind::SentToAssembler => Direction::Outgoing,
        }
    }

    /// Kind of the offsetting movement written when this one is reversed.
    ///
    /// Income kinds reverse to `AdjustmentOut` and outgoing kinds to
    /// `AdjustmentIn`, so a reversal always flips the economic direction.
    pub fn reversal_kind(self) -> MovementKind {
        match self.direction() {
            Direction::Income => MovementKind::AdjustmentOut,
            Direction::Outgoing => MovementKind::AdjustmentIn,
        }
    }

    /// Kinds a caller may record directly as a manual stock correction.
    pub fn is_manual_adjustment(self) -> bool {
        matches!(
            self,
            MovementKind::AdjustmentIn
                | MovementKind::AdjustmentOut
                | MovementKind::Wastage
                | MovementKind::CustomerReturn
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MovementKind::Purchase => "purchase",
            MovementKind::ProductionIn => "production_in",
            MovementKind::ProductionOut => "production_out",
            MovementKind::Sale => "sale",
            MovementKind::CustomerReturn => "customer_return",
            MovementKind::AdjustmentIn => "adjustment_in",
            MovementKind::AdjustmentOut => "adjustment_out",
            MovementKind::Wastage => "wastage",
            MovementKind::SentToAssembler => "sent_to_assembler",
            MovementKind::ReceivedFromAssembler => "received_from_assembler",
        }
    }

    pub fn parse(s: &str) -> DomainResult<Self> {
        match s {
            "purchase" => Ok(MovementKind::Purchase),
            "production_in" => Ok(MovementKind::ProductionIn),
            "production_out" => Ok(MovementKind::ProductionOut),
            "sale" => Ok(MovementKind::Sale),
            "customer_return" => Ok(MovementKind::CustomerReturn),
            "adjustment_in" => Ok(MovementKind::AdjustmentIn),
            "adjustment_out" => Ok(MovementKind::AdjustmentOut),
            "wastage" => Ok(MovementKind::Wastage),
            "sent_to_assembler" => Ok(MovementKind::SentToAssembler),
            "received_from_assembler" => Ok(MovementKind::ReceivedFromAssembler),
            other => Err(DomainError::validation(format!(
                "unknown movement kind '{other}'"
            ))),
        }
    }
}

impl core::fmt::Display for MovementKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A movement ready to be appended to the ledger (not yet assigned an id).
///
/// The store assigns `MovementId` and the timestamp at append time, together
/// with the matching stock delta in the same atomic unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMovement {
    pub product_id: ProductId,
    pub kind: MovementKind,
    pub quantity: Decimal,
    pub actor: UserId,
    pub note: Option<String>,
    pub group: Option<EventGroupId>,
    /// Set when this movement offsets an earlier one.
    pub reverses: Option<MovementId>,
}

impl NewMovement {
    pub fn new(
        product_id: ProductId,
        kind: MovementKind,
        quantity: Decimal,
        actor: UserId,
    ) -> DomainResult<Self> {
        if quantity <= Decimal::ZERO {
            return Err(DomainError::validation("movement quantity must be positive"));
        }
        Ok(Self {
            product_id,
            kind,
            quantity,
            actor,
            note: None,
            group: None,
            reverses: None,
        })
    }

    pub fn with_note(mut self, note: Option<String>) -> Self {
        self.note = note;
        self
    }

    pub fn in_group(mut self, group: EventGroupId) -> Self {
        self.group = Some(group);
        self
    }

    pub fn reversing(mut self, original: MovementId) -> Self {
        self.reverses = Some(original);
        self
    }

    /// Quantity signed by economic direction.
    pub fn signed_quantity(&self) -> Decimal {
        match self.kind.direction() {
            Direction::Income => self.quantity,
            Direction::Outgoing => -self.quantity,
        }
    }
}

/// An appended ledger entry. Immutable except for the `reversed_by`
/// back-reference, which is set once, transactionally, when a reversal is
/// recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryMovement {
    pub id: MovementId,
    pub product_id: ProductId,
    pub kind: MovementKind,
    pub quantity: Decimal,
    pub actor: UserId,
    pub note: Option<String>,
    pub group: Option<EventGroupId>,
    pub reverses: Option<MovementId>,
    pub reversed_by: Option<MovementId>,
    pub occurred_at: DateTime<Utc>,
}

impl InventoryMovement {
    /// Quantity signed by economic direction.
    pub fn signed_quantity(&self) -> Decimal {
        match self.kind.direction() {
            Direction::Income => self.quantity,
            Direction::Outgoing => -self.quantity,
        }
    }

    pub fn is_reversal(&self) -> bool {
        self.reverses.is_some()
    }

    pub fn is_reversed(&self) -> bool {
        self.reversed_by.is_some()
    }
}
