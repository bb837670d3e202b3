//! Stock reservation manager (application-level orchestration).
//!
//! Every public operation follows the same shape:
//!
//! ```text
//! validate request (no transaction yet)
//!   ↓
//! begin transaction
//!   ↓
//! bulk reads → in-memory mutation → version-checked writes
//!   ↓
//! commit, or rollback on any error, cancellation included
//! ```
//!
//! The whole body is wrapped by [`ConcurrencyRetry`], so a write conflict
//! re-runs the operation with fresh reads. Partial writes are never
//! observable: the transaction either commits everything or nothing.

use std::collections::HashMap;
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tracing::{info, warn};

use forgemarket_core::{
    CancellationFlag, DomainError, OrderId, ProductId, ReservationGroupId, StockMovementId,
    TenantId,
};
use forgemarket_inventory::{
    BulkAppliedItem, BulkFailureReason, BulkItemFailure, BulkStockUpdate, BulkUpdateReceipt,
    ConfirmReceipt, InventoryConfig, ItemFailureReason, ItemOutcome, ProductStock,
    ReleaseReceipt, ReservationReceipt, ReservationStatus, ReserveStock, StockReservation,
    StockUpdateReceipt, UpdateStock,
};

use crate::retry::{ConcurrencyRetry, RetryClass};
use crate::store::{InventoryStore, InventoryTx, StoreError};

/// Operation-level failure of a stock operation.
#[derive(Debug, Error)]
pub enum InventoryOpError {
    /// Bad input shape/range; rejected before any transaction opened.
    #[error("validation failed: {0}")]
    Validation(String),

    /// A domain invariant was violated mid-operation.
    #[error("invariant violated: {0}")]
    Invariant(String),

    /// The product does not exist or is soft-deleted.
    #[error("product not found: {0}")]
    ProductNotFound(ProductId),

    /// The computed stock level fell outside the configured range.
    #[error("out of range: {0}")]
    OutOfRange(String),

    /// One or more reserve items were unavailable; nothing was reserved.
    /// Carries the per-item outcome of every requested item.
    #[error("reservation items unavailable")]
    ItemsUnavailable(Vec<ItemOutcome>),

    /// The group has no Pending rows (already released/confirmed/expired, or
    /// never existed). Benign for idempotent callers.
    #[error("no pending reservations for group {0}")]
    NoPendingReservations(ReservationGroupId),

    /// The group contains a hold past its deadline; it can no longer be
    /// confirmed and awaits the expiry sweep.
    #[error("reservation group {0} has expired")]
    ReservationExpired(ReservationGroupId),

    /// Every bulk item failed; nothing was committed. Carries the per-item
    /// failures.
    #[error("all bulk items failed")]
    AllItemsFailed(Vec<BulkItemFailure>),

    /// The operation was cancelled; the transaction was rolled back.
    #[error("operation cancelled")]
    Cancelled,

    /// Optimistic-concurrency conflict that survived the retry budget.
    #[error("write conflict: {0}")]
    Conflict(String),

    /// Storage failure; the transaction was rolled back.
    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for InventoryOpError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::Conflict(msg) => InventoryOpError::Conflict(msg),
            other => InventoryOpError::Store(other),
        }
    }
}

impl From<DomainError> for InventoryOpError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Validation(msg) | DomainError::InvalidId(msg) => {
                InventoryOpError::Validation(msg)
            }
            DomainError::InvariantViolation(msg) => InventoryOpError::Invariant(msg),
            DomainError::OutOfRange(msg) => InventoryOpError::OutOfRange(msg),
            DomainError::Conflict(msg) => InventoryOpError::Conflict(msg),
            DomainError::Cancelled => InventoryOpError::Cancelled,
            DomainError::NotFound => InventoryOpError::Invariant("not found".to_string()),
        }
    }
}

impl RetryClass for InventoryOpError {
    fn is_conflict(&self) -> bool {
        matches!(self, InventoryOpError::Conflict(_))
    }
}

/// Orchestrates stock mutation, reservation lifecycle, bulk adjustment, and
/// expired-reservation cleanup against an [`InventoryStore`].
///
/// The manager holds no per-operation state and is safe to share behind an
/// `Arc` across concurrent callers; correctness under contention comes from
/// the store's version stamps plus the retry coordinator, not from locks.
#[derive(Debug)]
pub struct StockReservationManager<S: InventoryStore> {
    store: S,
    config: InventoryConfig,
    retry: ConcurrencyRetry,
}

impl<S: InventoryStore> StockReservationManager<S> {
    pub fn new(store: S, config: InventoryConfig, retry: ConcurrencyRetry) -> Self {
        Self {
            store,
            config,
            retry,
        }
    }

    pub fn config(&self) -> &InventoryConfig {
        &self.config
    }

    /// Directly update a single product's stock level.
    ///
    /// Purchase/Return add, Sale/Damage/Transfer subtract (floored at 0),
    /// Adjustment/Correction set an absolute value. A result above the
    /// configured maximum is rejected with [`InventoryOpError::OutOfRange`].
    pub async fn update_stock(
        &self,
        request: UpdateStock,
        cancel: &CancellationFlag,
    ) -> Result<StockUpdateReceipt, InventoryOpError> {
        request.validate(&self.config)?;
        cancel.ensure_active()?;

        self.retry
            .run("update_stock", || self.try_update_stock(&request, cancel))
            .await
    }

    async fn try_update_stock(
        &self,
        request: &UpdateStock,
        cancel: &CancellationFlag,
    ) -> Result<StockUpdateReceipt, InventoryOpError> {
        let mut tx = self.store.begin().await?;
        match self.update_stock_in_tx(&mut tx, request, cancel).await {
            Ok(receipt) => {
                tx.commit().await?;
                info!(
                    tenant_id = %request.tenant_id,
                    product_id = %request.product_id,
                    movement_id = %receipt.movement_id,
                    update_type = %request.update_type,
                    previous = receipt.change.previous,
                    new = receipt.change.new,
                    actor = %request.actor,
                    reason = %request.reason,
                    "stock updated"
                );
                Ok(receipt)
            }
            Err(err) => {
                rollback_quietly(tx, "update_stock").await;
                Err(err)
            }
        }
    }

    async fn update_stock_in_tx(
        &self,
        tx: &mut S::Tx,
        request: &UpdateStock,
        cancel: &CancellationFlag,
    ) -> Result<StockUpdateReceipt, InventoryOpError> {
        cancel.ensure_active()?;

        let mut product = tx
            .product(request.tenant_id, request.product_id)
            .await?
            .filter(ProductStock::is_mutable)
            .ok_or(InventoryOpError::ProductNotFound(request.product_id))?;

        let change =
            product.apply_update(request.update_type, request.quantity, self.config.max_stock)?;
        tx.save_product(&mut product).await?;

        Ok(StockUpdateReceipt {
            movement_id: StockMovementId::new(),
            product_id: request.product_id,
            update_type: request.update_type,
            change,
        })
    }

    /// Place a multi-item hold. All-or-nothing: if any item is unavailable
    /// the whole request fails with per-item outcomes and no stock changes.
    pub async fn reserve_stock(
        &self,
        request: ReserveStock,
        cancel: &CancellationFlag,
    ) -> Result<ReservationReceipt, InventoryOpError> {
        request.validate(&self.config)?;
        cancel.ensure_active()?;

        self.retry
            .run("reserve_stock", || self.try_reserve_stock(&request, cancel))
            .await
    }

    async fn try_reserve_stock(
        &self,
        request: &ReserveStock,
        cancel: &CancellationFlag,
    ) -> Result<ReservationReceipt, InventoryOpError> {
        let mut tx = self.store.begin().await?;
        match self.reserve_stock_in_tx(&mut tx, request, cancel).await {
            Ok(receipt) => {
                tx.commit().await?;
                info!(
                    tenant_id = %request.tenant_id,
                    customer_id = %request.customer_id,
                    group_id = %receipt.group_id,
                    items = receipt.items.len(),
                    expires_at = %receipt.expires_at,
                    "stock reserved"
                );
                Ok(receipt)
            }
            Err(err) => {
                rollback_quietly(tx, "reserve_stock").await;
                Err(err)
            }
        }
    }

    async fn reserve_stock_in_tx(
        &self,
        tx: &mut S::Tx,
        request: &ReserveStock,
        cancel: &CancellationFlag,
    ) -> Result<ReservationReceipt, InventoryOpError> {
        let now = Utc::now();
        let ttl = request.ttl.unwrap_or(self.config.default_reservation_ttl);
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|e| InventoryOpError::Validation(format!("reservation ttl: {e}")))?;
        let expires_at = now + ttl;

        let product_ids: Vec<ProductId> =
            request.items.iter().map(|item| item.product_id).collect();
        let mut products = tx.products(request.tenant_id, &product_ids).await?;

        // Validate every item before touching anything.
        let mut outcomes = Vec::with_capacity(request.items.len());
        let mut all_available = true;
        for item in &request.items {
            cancel.ensure_active()?;
            let outcome = match products.get(&item.product_id) {
                None => {
                    ItemOutcome::failed(item.product_id, item.quantity, ItemFailureReason::NotFound)
                }
                Some(product) if product.is_deleted => {
                    ItemOutcome::failed(item.product_id, item.quantity, ItemFailureReason::Deleted)
                }
                Some(product) if product.stock_quantity < item.quantity => ItemOutcome::failed(
                    item.product_id,
                    item.quantity,
                    ItemFailureReason::InsufficientStock {
                        available: product.stock_quantity,
                    },
                ),
                Some(_) => ItemOutcome::reserved(item.product_id, item.quantity),
            };
            all_available &= outcome.is_reserved();
            outcomes.push(outcome);
        }
        if !all_available {
            return Err(InventoryOpError::ItemsUnavailable(outcomes));
        }

        // Hold stock and create one Pending row per item, all sharing the group.
        let group_id = ReservationGroupId::new();
        let mut rows = Vec::with_capacity(request.items.len());
        for item in &request.items {
            cancel.ensure_active()?;
            let product = products
                .get_mut(&item.product_id)
                .ok_or(InventoryOpError::ProductNotFound(item.product_id))?;
            product.hold(item.quantity)?;
            tx.save_product(product).await?;

            rows.push(StockReservation::new_pending(
                group_id,
                request.tenant_id,
                item.product_id,
                request.customer_id,
                item.quantity,
                now,
                expires_at,
                request.external_reference.clone(),
            )?);
        }
        tx.insert_reservations(&rows).await?;

        Ok(ReservationReceipt {
            group_id,
            expires_at,
            items: outcomes,
        })
    }

    /// Cancel a group's holds, restoring the held stock.
    pub async fn release_reservation(
        &self,
        tenant_id: TenantId,
        group_id: ReservationGroupId,
        reason: &str,
        cancel: &CancellationFlag,
    ) -> Result<ReleaseReceipt, InventoryOpError> {
        cancel.ensure_active()?;

        let receipt = self
            .retry
            .run("release_reservation", || {
                self.try_release(tenant_id, group_id, cancel)
            })
            .await?;
        info!(
            tenant_id = %tenant_id,
            group_id = %group_id,
            released_rows = receipt.released_rows,
            restored_quantity = receipt.restored_quantity,
            reason,
            "reservation released"
        );
        Ok(receipt)
    }

    async fn try_release(
        &self,
        tenant_id: TenantId,
        group_id: ReservationGroupId,
        cancel: &CancellationFlag,
    ) -> Result<ReleaseReceipt, InventoryOpError> {
        let mut tx = self.store.begin().await?;
        match self.release_in_tx(&mut tx, tenant_id, group_id, cancel).await {
            Ok(receipt) => {
                tx.commit().await?;
                Ok(receipt)
            }
            Err(err) => {
                rollback_quietly(tx, "release_reservation").await;
                Err(err)
            }
        }
    }

    async fn release_in_tx(
        &self,
        tx: &mut S::Tx,
        tenant_id: TenantId,
        group_id: ReservationGroupId,
        cancel: &CancellationFlag,
    ) -> Result<ReleaseReceipt, InventoryOpError> {
        let rows = tx.pending_by_group(tenant_id, group_id).await?;
        if rows.is_empty() {
            return Err(InventoryOpError::NoPendingReservations(group_id));
        }

        let now = Utc::now();
        let product_ids: Vec<ProductId> = rows.iter().map(|r| r.product_id).collect();
        let mut products = tx.products(tenant_id, &product_ids).await?;

        let mut restored_quantity = 0;
        let mut skipped_products = Vec::new();
        let released_rows = rows.len();
        for mut row in rows {
            cancel.ensure_active()?;
            match products.get_mut(&row.product_id) {
                Some(product) if product.is_mutable() => {
                    product.restore(row.quantity, self.config.max_stock)?;
                    tx.save_product(product).await?;
                    restored_quantity += row.quantity;
                }
                _ => {
                    warn!(
                        tenant_id = %tenant_id,
                        group_id = %group_id,
                        product_id = %row.product_id,
                        quantity = row.quantity,
                        "product missing or deleted, skipping stock restore"
                    );
                    skipped_products.push(row.product_id);
                }
            }
            row.release(now)?;
            tx.save_reservation(&row, ReservationStatus::Pending).await?;
        }

        Ok(ReleaseReceipt {
            group_id,
            released_rows,
            restored_quantity,
            skipped_products,
        })
    }

    /// Finalize a group's holds against an order. Stock is not restored; the
    /// earlier decrement becomes permanent.
    pub async fn confirm_reservation(
        &self,
        tenant_id: TenantId,
        group_id: ReservationGroupId,
        order_id: OrderId,
        cancel: &CancellationFlag,
    ) -> Result<ConfirmReceipt, InventoryOpError> {
        cancel.ensure_active()?;

        let receipt = self
            .retry
            .run("confirm_reservation", || {
                self.try_confirm(tenant_id, group_id, order_id, cancel)
            })
            .await?;
        info!(
            tenant_id = %tenant_id,
            group_id = %group_id,
            order_id = %order_id,
            confirmed_rows = receipt.confirmed_rows,
            "reservation confirmed"
        );
        Ok(receipt)
    }

    async fn try_confirm(
        &self,
        tenant_id: TenantId,
        group_id: ReservationGroupId,
        order_id: OrderId,
        cancel: &CancellationFlag,
    ) -> Result<ConfirmReceipt, InventoryOpError> {
        let mut tx = self.store.begin().await?;
        match self
            .confirm_in_tx(&mut tx, tenant_id, group_id, order_id, cancel)
            .await
        {
            Ok(receipt) => {
                tx.commit().await?;
                Ok(receipt)
            }
            Err(err) => {
                rollback_quietly(tx, "confirm_reservation").await;
                Err(err)
            }
        }
    }

    async fn confirm_in_tx(
        &self,
        tx: &mut S::Tx,
        tenant_id: TenantId,
        group_id: ReservationGroupId,
        order_id: OrderId,
        cancel: &CancellationFlag,
    ) -> Result<ConfirmReceipt, InventoryOpError> {
        let rows = tx.pending_by_group(tenant_id, group_id).await?;
        if rows.is_empty() {
            return Err(InventoryOpError::NoPendingReservations(group_id));
        }

        let now = Utc::now();
        if rows.iter().any(|row| row.is_expired_at(now)) {
            return Err(InventoryOpError::ReservationExpired(group_id));
        }

        let confirmed_rows = rows.len();
        for mut row in rows {
            cancel.ensure_active()?;
            row.confirm(order_id, now)?;
            tx.save_reservation(&row, ReservationStatus::Pending).await?;
        }

        Ok(ConfirmReceipt {
            group_id,
            order_id,
            confirmed_rows,
        })
    }

    /// Apply absolute stock levels in bulk. Items are validated independently;
    /// the batch commits if at least one item applied.
    pub async fn bulk_update_stock(
        &self,
        request: BulkStockUpdate,
        cancel: &CancellationFlag,
    ) -> Result<BulkUpdateReceipt, InventoryOpError> {
        request.validate(&self.config)?;
        cancel.ensure_active()?;

        let receipt = self
            .retry
            .run("bulk_update_stock", || self.try_bulk_update(&request, cancel))
            .await?;
        info!(
            tenant_id = %request.tenant_id,
            actor = %request.actor,
            applied = receipt.applied.len(),
            failed = receipt.failed.len(),
            "bulk stock update committed"
        );
        Ok(receipt)
    }

    async fn try_bulk_update(
        &self,
        request: &BulkStockUpdate,
        cancel: &CancellationFlag,
    ) -> Result<BulkUpdateReceipt, InventoryOpError> {
        let mut tx = self.store.begin().await?;
        match self.bulk_update_in_tx(&mut tx, request, cancel).await {
            Ok(receipt) => {
                tx.commit().await?;
                Ok(receipt)
            }
            Err(err) => {
                rollback_quietly(tx, "bulk_update_stock").await;
                Err(err)
            }
        }
    }

    async fn bulk_update_in_tx(
        &self,
        tx: &mut S::Tx,
        request: &BulkStockUpdate,
        cancel: &CancellationFlag,
    ) -> Result<BulkUpdateReceipt, InventoryOpError> {
        let product_ids: Vec<ProductId> =
            request.items.iter().map(|item| item.product_id).collect();
        let mut products = tx.products(request.tenant_id, &product_ids).await?;

        let mut applied = Vec::new();
        let mut failed = Vec::new();
        for item in &request.items {
            cancel.ensure_active()?;
            match products.get_mut(&item.product_id) {
                None => failed.push(BulkItemFailure {
                    product_id: item.product_id,
                    reason: BulkFailureReason::NotFound,
                }),
                Some(product) if product.is_deleted => failed.push(BulkItemFailure {
                    product_id: item.product_id,
                    reason: BulkFailureReason::Deleted,
                }),
                Some(product) => {
                    match product.set_absolute(item.new_quantity, self.config.max_stock) {
                        Ok(change) => {
                            tx.save_product(product).await?;
                            applied.push(BulkAppliedItem {
                                product_id: item.product_id,
                                change,
                            });
                        }
                        Err(DomainError::OutOfRange(_)) => failed.push(BulkItemFailure {
                            product_id: item.product_id,
                            reason: BulkFailureReason::OutOfRange {
                                attempted: item.new_quantity,
                                max: self.config.max_stock,
                            },
                        }),
                        Err(err) => return Err(err.into()),
                    }
                }
            }
        }

        if applied.is_empty() {
            return Err(InventoryOpError::AllItemsFailed(failed));
        }

        Ok(BulkUpdateReceipt { applied, failed })
    }

    /// Expire stale holds and restore their stock. Returns the number of rows
    /// processed. Intended to run on a schedule; safe to invoke concurrently
    /// with reservation creation.
    pub async fn cleanup_expired_reservations(
        &self,
        grace: Option<Duration>,
        cancel: &CancellationFlag,
    ) -> Result<usize, InventoryOpError> {
        cancel.ensure_active()?;

        let grace = match grace {
            Some(grace) => chrono::Duration::from_std(grace)
                .map_err(|e| InventoryOpError::Validation(format!("cleanup grace: {e}")))?,
            None => chrono::Duration::zero(),
        };

        let processed = self
            .retry
            .run("cleanup_expired_reservations", || {
                self.try_cleanup(grace, cancel)
            })
            .await?;
        if processed > 0 {
            info!(processed, "expired reservations cleaned up");
        }
        Ok(processed)
    }

    async fn try_cleanup(
        &self,
        grace: chrono::Duration,
        cancel: &CancellationFlag,
    ) -> Result<usize, InventoryOpError> {
        let mut tx = self.store.begin().await?;
        match self.cleanup_in_tx(&mut tx, grace, cancel).await {
            Ok(processed) => {
                tx.commit().await?;
                Ok(processed)
            }
            Err(err) => {
                rollback_quietly(tx, "cleanup_expired_reservations").await;
                Err(err)
            }
        }
    }

    async fn cleanup_in_tx(
        &self,
        tx: &mut S::Tx,
        grace: chrono::Duration,
        cancel: &CancellationFlag,
    ) -> Result<usize, InventoryOpError> {
        let cutoff = Utc::now() - grace;
        let rows = tx
            .expired_pending(cutoff, self.config.sweep_batch_limit)
            .await?;
        if rows.is_empty() {
            return Ok(0);
        }

        let now = Utc::now();
        let mut by_tenant: HashMap<TenantId, Vec<StockReservation>> = HashMap::new();
        for row in rows {
            by_tenant.entry(row.tenant_id).or_default().push(row);
        }

        let mut processed = 0;
        for (tenant_id, rows) in by_tenant {
            let product_ids: Vec<ProductId> = rows.iter().map(|r| r.product_id).collect();
            let mut products = tx.products(tenant_id, &product_ids).await?;

            for mut row in rows {
                cancel.ensure_active()?;
                match products.get_mut(&row.product_id) {
                    Some(product) if product.is_mutable() => {
                        product.restore(row.quantity, self.config.max_stock)?;
                        tx.save_product(product).await?;
                    }
                    _ => {
                        warn!(
                            tenant_id = %tenant_id,
                            group_id = %row.group_id,
                            product_id = %row.product_id,
                            quantity = row.quantity,
                            "product missing or deleted, skipping stock restore on expiry"
                        );
                    }
                }
                row.expire(now)?;
                tx.save_reservation(&row, ReservationStatus::Pending).await?;
                processed += 1;
            }
        }

        Ok(processed)
    }
}

async fn rollback_quietly<T: InventoryTx>(tx: T, operation: &str) {
    if let Err(err) = tx.rollback().await {
        warn!(operation, error = %err, "transaction rollback failed");
    }
}
