//! `tallerp-store` — the persistence boundary of the engine.
//!
//! Defines the read capability and transaction traits the engine is
//! parameterized over, an in-memory snapshot-isolated implementation
//! (tests/dev), and a Postgres-backed implementation (production).

pub mod in_memory;
pub mod postgres;
pub mod r#trait;

pub use in_memory::InMemoryStore;
pub use postgres::PostgresStore;
pub use r#trait::{CatalogReader, InventoryStore, StoreError, StoreReader, StoreTx};
