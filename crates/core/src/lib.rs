//! `forgemarket-core`: domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns).

pub mod cancel;
pub mod error;
pub mod id;
pub mod version;

pub use cancel::CancellationFlag;
pub use error::{DomainError, DomainResult};
pub use id::{
    CustomerId, OrderId, ProductId, ReservationGroupId, ReservationRecordId, StockMovementId,
    StoreId, TenantId, UserId,
};
pub use version::ExpectedVersion;
