//! `tallerp-orders` — the outsourced-assembly order lifecycle.
//!
//! An order is mutated exclusively through its state transitions and is never
//! deleted; cancellation is a terminal state, not removal.

pub mod order;

pub use order::{
    AssemblyOrder, AssemblyStep, ExpectedOutput, OrderCommand, OrderEvent, OrderNote, OrderStatus,
    ReceiptLine, SentLine,
};
