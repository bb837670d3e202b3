//! Stock storage: unit-of-work contract and backends.

pub mod contract;
pub mod in_memory;
pub mod postgres;

pub use contract::{InventoryStore, InventoryTx, StoreError};
pub use in_memory::InMemoryInventoryStore;
pub use postgres::PostgresInventoryStore;
