//! `tallerp-catalog` — products, bill-of-materials edges, and assembly work.
//!
//! Stock on a [`Product`] is a denormalized cache: it is mutated only in
//! lockstep with ledger writes, never directly by catalog code.

pub mod assembler;
pub mod bom;
pub mod product;
pub mod work;

pub use assembler::Assembler;
pub use bom::{closes_cycle, BomEdge};
pub use product::{Product, ProductKind};
pub use work::{AssemblyWork, RequiredWork, WorkRequirement};
