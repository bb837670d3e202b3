use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use forgemarket_core::{ProductId, ReservationGroupId, TenantId};
use forgemarket_inventory::{ProductStock, ReservationStatus, StockReservation};

/// Storage operation error.
///
/// These are **infrastructure errors** (concurrency, connectivity, data
/// mapping) as opposed to domain errors (validation, invariants).
#[derive(Debug, Error)]
pub enum StoreError {
    /// Optimistic concurrency check failed (stale version stamp or a
    /// reservation row that already left its expected status).
    #[error("optimistic concurrency check failed: {0}")]
    Conflict(String),

    /// A record with the same identity already exists.
    #[error("duplicate record: {0}")]
    Duplicate(String),

    /// Row data could not be mapped to/from the domain model.
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// The backend rejected the operation (connectivity, constraint, pool).
    #[error("storage backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict(_))
    }
}

/// Stock storage with unit-of-work transactions.
///
/// `begin()` opens a transaction covering all reads and writes of one
/// operation. Implementations must guarantee:
/// - **Atomicity**: everything staged in a transaction is applied on commit
///   or nothing is.
/// - **Optimistic concurrency**: `save_product` is conditioned on the
///   product's version stamp, `save_reservation` on the row's expected prior
///   status; a mismatch yields [`StoreError::Conflict`] and nothing is
///   applied.
/// - **Tenant isolation**: product reads and group lookups are scoped to the
///   tenant they are called with.
#[async_trait]
pub trait InventoryStore: Send + Sync {
    type Tx: InventoryTx;

    /// Open a new unit-of-work transaction.
    async fn begin(&self) -> Result<Self::Tx, StoreError>;
}

/// One unit-of-work transaction.
///
/// Exactly one terminal call (`commit` or `rollback`) must be made on every
/// transaction, on every exit path. Reads observe the transaction's own
/// staged writes.
#[async_trait]
pub trait InventoryTx: Send {
    /// Point lookup of a product's stock slice.
    async fn product(
        &mut self,
        tenant_id: TenantId,
        product_id: ProductId,
    ) -> Result<Option<ProductStock>, StoreError>;

    /// Bulk lookup in a single round trip. Missing ids are absent from the
    /// result map, not errors.
    async fn products(
        &mut self,
        tenant_id: TenantId,
        product_ids: &[ProductId],
    ) -> Result<HashMap<ProductId, ProductStock>, StoreError>;

    /// Version-checked write of a product's stock slice.
    ///
    /// On success the product's `version` is advanced in place so follow-up
    /// saves within the same transaction keep passing the check.
    async fn save_product(&mut self, product: &mut ProductStock) -> Result<(), StoreError>;

    /// Insert freshly created reservation rows.
    async fn insert_reservations(&mut self, rows: &[StockReservation]) -> Result<(), StoreError>;

    /// All Pending rows of a reservation group.
    async fn pending_by_group(
        &mut self,
        tenant_id: TenantId,
        group_id: ReservationGroupId,
    ) -> Result<Vec<StockReservation>, StoreError>;

    /// Pending rows (across tenants) whose deadline passed before `cutoff`,
    /// oldest first, at most `limit`.
    async fn expired_pending(
        &mut self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<StockReservation>, StoreError>;

    /// Status-conditioned write of a reservation row.
    ///
    /// The write only applies if the stored row is still in
    /// `expected_status`; otherwise [`StoreError::Conflict`]. This is what
    /// makes terminal transitions exactly-once under concurrency.
    async fn save_reservation(
        &mut self,
        row: &StockReservation,
        expected_status: ReservationStatus,
    ) -> Result<(), StoreError>;

    async fn commit(self) -> Result<(), StoreError>;

    async fn rollback(self) -> Result<(), StoreError>;
}

#[async_trait]
impl<S> InventoryStore for Arc<S>
where
    S: InventoryStore + ?Sized,
{
    type Tx = S::Tx;

    async fn begin(&self) -> Result<Self::Tx, StoreError> {
        (**self).begin().await
    }
}
