//! `tallerp-engine` — BOM resolution and production transaction management.
//!
//! The engine exposes the operation contracts consumed by the routing layer:
//! dry-run BOM explosion and the atomic commit workflows (internal production,
//! purchase, sale, manual adjustment, external-order creation, reversal, and
//! order transitions).

pub mod error;
pub mod resolver;
pub mod service;

pub use error::{EngineError, EngineResult};
pub use resolver::{explode, LaborRequirement, MaterialRequirement, Resolution, Shortage};
pub use service::{
    BomPreview, MovementBatch, OrderMode, OrderOutcome, OrderTransition, ProductionService,
};
