//! `tallerp-ledger` — the append-only inventory movement ledger model.
//!
//! Movements are the single source of truth for stock deltas. They are
//! created, never mutated or deleted; "undo" is a new offsetting movement.

pub mod movement;

pub use movement::{Direction, InventoryMovement, MovementKind, NewMovement};
