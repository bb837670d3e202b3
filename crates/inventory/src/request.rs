//! Operation inputs and receipts.
//!
//! Requests validate their own shape (`validate`) so malformed input fails
//! fast, before any transaction opens. Availability checks against live data
//! stay with the manager; only deterministic shape/range rules live here.

use std::collections::HashSet;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use forgemarket_core::{
    CustomerId, DomainError, DomainResult, OrderId, ProductId, ReservationGroupId,
    StockMovementId, TenantId, UserId,
};

use crate::config::InventoryConfig;
use crate::product::{StockChange, StockUpdateType};

/// Direct stock update of a single product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateStock {
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub quantity: i64,
    pub update_type: StockUpdateType,
    /// Audit reason, required.
    pub reason: String,
    pub actor: UserId,
}

impl UpdateStock {
    pub fn validate(&self, config: &InventoryConfig) -> DomainResult<()> {
        if self.quantity < 0 {
            return Err(DomainError::validation("quantity cannot be negative"));
        }
        if self.quantity > config.max_stock {
            return Err(DomainError::validation(format!(
                "quantity {} exceeds maximum stock {}",
                self.quantity, config.max_stock
            )));
        }
        if self.reason.trim().is_empty() {
            return Err(DomainError::validation("reason cannot be empty"));
        }
        Ok(())
    }
}

/// Receipt for a committed direct stock update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockUpdateReceipt {
    pub movement_id: StockMovementId,
    pub product_id: ProductId,
    pub update_type: StockUpdateType,
    pub change: StockChange,
}

/// One requested hold within a reserve request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReserveItem {
    pub product_id: ProductId,
    pub quantity: i64,
}

/// Multi-item reservation request. All-or-nothing: either every item can be
/// held or the whole request fails.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReserveStock {
    pub tenant_id: TenantId,
    pub customer_id: CustomerId,
    pub items: Vec<ReserveItem>,
    /// Overrides the configured default TTL when set.
    pub ttl: Option<Duration>,
    pub external_reference: Option<String>,
}

impl ReserveStock {
    pub fn validate(&self, config: &InventoryConfig) -> DomainResult<()> {
        if self.items.is_empty() {
            return Err(DomainError::validation(
                "reservation must contain at least one item",
            ));
        }
        if self.items.len() > config.max_reservation_items {
            return Err(DomainError::validation(format!(
                "reservation contains {} items, maximum is {}",
                self.items.len(),
                config.max_reservation_items
            )));
        }
        let mut seen = HashSet::new();
        for item in &self.items {
            if item.quantity <= 0 {
                return Err(DomainError::validation(format!(
                    "reserved quantity must be positive (product {})",
                    item.product_id
                )));
            }
            if !seen.insert(item.product_id) {
                return Err(DomainError::validation(format!(
                    "duplicate product {} in reservation request",
                    item.product_id
                )));
            }
        }
        Ok(())
    }
}

/// Why a single reserve item could not be held.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemFailureReason {
    NotFound,
    Deleted,
    InsufficientStock { available: i64 },
}

/// Per-item outcome of a reserve request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemOutcome {
    pub product_id: ProductId,
    pub requested: i64,
    pub failure: Option<ItemFailureReason>,
}

impl ItemOutcome {
    pub fn reserved(product_id: ProductId, requested: i64) -> Self {
        Self {
            product_id,
            requested,
            failure: None,
        }
    }

    pub fn failed(product_id: ProductId, requested: i64, reason: ItemFailureReason) -> Self {
        Self {
            product_id,
            requested,
            failure: Some(reason),
        }
    }

    pub fn is_reserved(&self) -> bool {
        self.failure.is_none()
    }
}

/// Receipt for a committed reservation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationReceipt {
    pub group_id: ReservationGroupId,
    pub expires_at: DateTime<Utc>,
    pub items: Vec<ItemOutcome>,
}

/// Receipt for a committed release.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseReceipt {
    pub group_id: ReservationGroupId,
    pub released_rows: usize,
    pub restored_quantity: i64,
    /// Products whose stock could not be restored (deleted/missing in the
    /// interim); their rows were still transitioned.
    pub skipped_products: Vec<ProductId>,
}

/// Receipt for a committed confirmation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmReceipt {
    pub group_id: ReservationGroupId,
    pub order_id: OrderId,
    pub confirmed_rows: usize,
}

/// One absolute set within a bulk adjustment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkItem {
    pub product_id: ProductId,
    pub new_quantity: i64,
}

/// Bulk absolute stock adjustment. Unlike reservation, items are validated
/// independently: invalid items are collected as per-item errors without
/// aborting the batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkStockUpdate {
    pub tenant_id: TenantId,
    pub items: Vec<BulkItem>,
    pub actor: UserId,
}

impl BulkStockUpdate {
    /// Shape-level validation only; per-item range/existence failures are
    /// reported in the receipt instead of failing the request.
    pub fn validate(&self, config: &InventoryConfig) -> DomainResult<()> {
        if self.items.is_empty() {
            return Err(DomainError::validation(
                "bulk update must contain at least one item",
            ));
        }
        if self.items.len() > config.max_bulk_items {
            return Err(DomainError::validation(format!(
                "bulk update contains {} items, maximum is {}",
                self.items.len(),
                config.max_bulk_items
            )));
        }
        let mut seen = HashSet::new();
        for item in &self.items {
            if !seen.insert(item.product_id) {
                return Err(DomainError::validation(format!(
                    "duplicate product {} in bulk update",
                    item.product_id
                )));
            }
        }
        Ok(())
    }
}

/// Why a single bulk item was not applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BulkFailureReason {
    NotFound,
    Deleted,
    OutOfRange { attempted: i64, max: i64 },
}

/// A bulk item that failed validation against live data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkItemFailure {
    pub product_id: ProductId,
    pub reason: BulkFailureReason,
}

/// A bulk item that was applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkAppliedItem {
    pub product_id: ProductId,
    pub change: StockChange,
}

/// Receipt for a bulk adjustment (committed if at least one item applied).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkUpdateReceipt {
    pub applied: Vec<BulkAppliedItem>,
    pub failed: Vec<BulkItemFailure>,
}
