//! Inventory domain module.
//!
//! This crate contains the business rules of the stock reservation subsystem,
//! implemented purely as deterministic domain logic (no IO, no HTTP, no
//! storage): the product stock slice and its guarded mutations, the
//! reservation row state machine, operation requests/receipts, and limits.

pub mod config;
pub mod product;
pub mod request;
pub mod reservation;

pub use config::InventoryConfig;
pub use product::{ProductStock, StockChange, StockUpdateType};
pub use request::{
    BulkAppliedItem, BulkFailureReason, BulkItem, BulkItemFailure, BulkStockUpdate,
    BulkUpdateReceipt, ConfirmReceipt, ItemFailureReason, ItemOutcome, ReleaseReceipt,
    ReservationReceipt, ReserveItem, ReserveStock, StockUpdateReceipt, UpdateStock,
};
pub use reservation::{ReservationStatus, StockReservation};
