use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use forgemarket_core::{DomainError, DomainResult, ProductId, StoreId, TenantId};

/// Kind of direct stock update, determining how the quantity is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StockUpdateType {
    /// Goods received from a supplier (additive).
    Purchase,
    /// Goods sold outside the reservation flow (subtractive, floored at 0).
    Sale,
    /// Customer return (additive).
    Return,
    /// Manual absolute set.
    Adjustment,
    /// Write-off for damaged goods (subtractive, floored at 0).
    Damage,
    /// Moved to another location (subtractive, floored at 0).
    Transfer,
    /// Stocktake correction (absolute set).
    Correction,
}

impl StockUpdateType {
    /// Compute the new stock level from the current one.
    ///
    /// Subtractive kinds floor at 0 rather than going negative; additive and
    /// absolute kinds are range-checked by the caller against the stock cap.
    pub fn compute(self, current: i64, quantity: i64) -> i64 {
        match self {
            StockUpdateType::Purchase | StockUpdateType::Return => current + quantity,
            StockUpdateType::Sale | StockUpdateType::Damage | StockUpdateType::Transfer => {
                (current - quantity).max(0)
            }
            StockUpdateType::Adjustment | StockUpdateType::Correction => quantity,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StockUpdateType::Purchase => "purchase",
            StockUpdateType::Sale => "sale",
            StockUpdateType::Return => "return",
            StockUpdateType::Adjustment => "adjustment",
            StockUpdateType::Damage => "damage",
            StockUpdateType::Transfer => "transfer",
            StockUpdateType::Correction => "correction",
        }
    }
}

impl core::fmt::Display for StockUpdateType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Before/after quantities of a stock mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockChange {
    pub previous: i64,
    pub new: i64,
}

/// The stock-relevant slice of a product record.
///
/// Product CRUD lives elsewhere; once inventory tracking begins, this slice is
/// mutated exclusively through the stock reservation manager. `version` is the
/// optimistic-concurrency stamp: reads carry it and writes are conditioned on
/// it being unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductStock {
    pub product_id: ProductId,
    pub tenant_id: TenantId,
    pub store_id: StoreId,
    pub stock_quantity: i64,
    pub is_deleted: bool,
    pub version: u64,
    pub updated_at: DateTime<Utc>,
}

impl ProductStock {
    pub fn new(
        product_id: ProductId,
        tenant_id: TenantId,
        store_id: StoreId,
        stock_quantity: i64,
    ) -> DomainResult<Self> {
        if stock_quantity < 0 {
            return Err(DomainError::validation("stock_quantity cannot be negative"));
        }
        Ok(Self {
            product_id,
            tenant_id,
            store_id,
            stock_quantity,
            is_deleted: false,
            version: 0,
            updated_at: Utc::now(),
        })
    }

    /// Deleted products are never eligible for stock mutation.
    pub fn is_mutable(&self) -> bool {
        !self.is_deleted
    }

    /// Apply a direct stock update of the given kind.
    ///
    /// Rejects results above `max_stock` with [`DomainError::OutOfRange`];
    /// subtractive kinds floor at 0, so the result is never negative.
    pub fn apply_update(
        &mut self,
        update_type: StockUpdateType,
        quantity: i64,
        max_stock: i64,
    ) -> DomainResult<StockChange> {
        self.ensure_mutable()?;
        let previous = self.stock_quantity;
        let new = update_type.compute(previous, quantity);
        if new > max_stock {
            return Err(DomainError::out_of_range(format!(
                "stock {new} exceeds maximum {max_stock}"
            )));
        }
        self.stock_quantity = new;
        self.updated_at = Utc::now();
        Ok(StockChange { previous, new })
    }

    /// Subtract a reservation hold, flooring at 0.
    pub fn hold(&mut self, quantity: i64) -> DomainResult<StockChange> {
        self.ensure_mutable()?;
        let previous = self.stock_quantity;
        self.stock_quantity = (previous - quantity).max(0);
        self.updated_at = Utc::now();
        Ok(StockChange {
            previous,
            new: self.stock_quantity,
        })
    }

    /// Return a previously held quantity, capped at `max_stock`.
    ///
    /// The cap only engages if an absolute set raised the level while the hold
    /// was outstanding; the invariant `stock ≤ max_stock` wins over exact
    /// restoration in that case.
    pub fn restore(&mut self, quantity: i64, max_stock: i64) -> DomainResult<StockChange> {
        self.ensure_mutable()?;
        let previous = self.stock_quantity;
        self.stock_quantity = (previous + quantity).min(max_stock);
        self.updated_at = Utc::now();
        Ok(StockChange {
            previous,
            new: self.stock_quantity,
        })
    }

    /// Set an absolute stock level (bulk adjustment path).
    pub fn set_absolute(&mut self, quantity: i64, max_stock: i64) -> DomainResult<StockChange> {
        self.ensure_mutable()?;
        if quantity < 0 {
            return Err(DomainError::out_of_range(
                "stock level cannot be negative".to_string(),
            ));
        }
        if quantity > max_stock {
            return Err(DomainError::out_of_range(format!(
                "stock {quantity} exceeds maximum {max_stock}"
            )));
        }
        let previous = self.stock_quantity;
        self.stock_quantity = quantity;
        self.updated_at = Utc::now();
        Ok(StockChange {
            previous,
            new: quantity,
        })
    }

    fn ensure_mutable(&self) -> DomainResult<()> {
        if self.is_deleted {
            return Err(DomainError::invariant(
                "deleted products are not eligible for stock mutation",
            ));
        }
        Ok(())
    }
}
