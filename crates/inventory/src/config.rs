use std::time::Duration;

/// Tunable limits for the stock reservation subsystem.
#[derive(Debug, Clone)]
pub struct InventoryConfig {
    /// Hard cap on any product's stock level.
    pub max_stock: i64,
    /// How long a reservation hold lives unless the caller overrides it.
    pub default_reservation_ttl: Duration,
    /// Maximum items per reserve request.
    pub max_reservation_items: usize,
    /// Maximum items per bulk adjustment request.
    pub max_bulk_items: usize,
    /// Maximum expired rows processed per cleanup pass.
    pub sweep_batch_limit: usize,
}

impl Default for InventoryConfig {
    fn default() -> Self {
        Self {
            max_stock: 1_000_000,
            default_reservation_ttl: Duration::from_secs(30 * 60),
            max_reservation_items: 100,
            max_bulk_items: 1000,
            sweep_batch_limit: 500,
        }
    }
}

impl InventoryConfig {
    pub fn with_max_stock(mut self, max: i64) -> Self {
        self.max_stock = max;
        self
    }

    pub fn with_default_reservation_ttl(mut self, ttl: Duration) -> Self {
        self.default_reservation_ttl = ttl;
        self
    }

    pub fn with_max_reservation_items(mut self, max: usize) -> Self {
        self.max_reservation_items = max;
        self
    }

    pub fn with_max_bulk_items(mut self, max: usize) -> Self {
        self.max_bulk_items = max;
        self
    }

    pub fn with_sweep_batch_limit(mut self, limit: usize) -> Self {
        self.sweep_batch_limit = limit;
        self
    }
}
