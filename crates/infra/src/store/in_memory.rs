use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use forgemarket_core::{
    ExpectedVersion, ProductId, ReservationGroupId, ReservationRecordId, TenantId,
};
use forgemarket_inventory::{ProductStock, ReservationStatus, StockReservation};

use super::contract::{InventoryStore, InventoryTx, StoreError};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
struct ProductKey {
    tenant_id: TenantId,
    product_id: ProductId,
}

#[derive(Debug, Default)]
struct SharedState {
    products: RwLock<HashMap<ProductKey, ProductStock>>,
    reservations: RwLock<HashMap<ReservationRecordId, StockReservation>>,
}

/// In-memory stock store.
///
/// Intended for tests/dev. Transactions stage a write-set and apply it
/// atomically at commit after re-verifying every version stamp and expected
/// reservation status under one lock, which gives the same conflict behavior
/// as the Postgres backend.
#[derive(Debug, Clone, Default)]
pub struct InMemoryInventoryStore {
    state: Arc<SharedState>,
}

impl InMemoryInventoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a product directly (product CRUD is outside this subsystem).
    pub fn insert_product(&self, product: ProductStock) {
        let key = ProductKey {
            tenant_id: product.tenant_id,
            product_id: product.product_id,
        };
        self.state.products.write().unwrap().insert(key, product);
    }

    /// Flip a product's soft-delete flag (test seam for interim deletions).
    pub fn mark_product_deleted(&self, tenant_id: TenantId, product_id: ProductId) {
        let key = ProductKey {
            tenant_id,
            product_id,
        };
        if let Some(product) = self.state.products.write().unwrap().get_mut(&key) {
            product.is_deleted = true;
        }
    }

    /// Seed a reservation row directly (e.g. an already-expired hold).
    pub fn insert_reservation(&self, row: StockReservation) {
        self.state
            .reservations
            .write()
            .unwrap()
            .insert(row.record_id, row);
    }

    /// Committed state of a product, outside any transaction.
    pub fn product_snapshot(
        &self,
        tenant_id: TenantId,
        product_id: ProductId,
    ) -> Option<ProductStock> {
        let key = ProductKey {
            tenant_id,
            product_id,
        };
        self.state.products.read().unwrap().get(&key).cloned()
    }

    /// Committed rows of a group, outside any transaction.
    pub fn group_snapshot(
        &self,
        tenant_id: TenantId,
        group_id: ReservationGroupId,
    ) -> Vec<StockReservation> {
        let mut rows: Vec<StockReservation> = self
            .state
            .reservations
            .read()
            .unwrap()
            .values()
            .filter(|r| r.tenant_id == tenant_id && r.group_id == group_id)
            .cloned()
            .collect();
        rows.sort_by_key(|r| *r.record_id.as_uuid());
        rows
    }
}

#[derive(Debug)]
struct StagedProduct {
    /// Version observed in committed state when this product was first saved.
    base_version: u64,
    record: ProductStock,
}

/// A staged write-set over the shared state.
#[derive(Debug)]
pub struct InMemoryTx {
    state: Arc<SharedState>,
    staged_products: HashMap<ProductKey, StagedProduct>,
    staged_inserts: Vec<StockReservation>,
    staged_updates: HashMap<ReservationRecordId, (ReservationStatus, StockReservation)>,
}

impl InMemoryTx {
    fn committed_product(&self, key: &ProductKey) -> Result<Option<ProductStock>, StoreError> {
        Ok(self
            .state
            .products
            .read()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))?
            .get(key)
            .cloned())
    }

    fn read_product(&self, key: &ProductKey) -> Result<Option<ProductStock>, StoreError> {
        // Read-your-writes: staged state shadows committed state.
        if let Some(staged) = self.staged_products.get(key) {
            return Ok(Some(staged.record.clone()));
        }
        self.committed_product(key)
    }
}

#[async_trait]
impl InventoryTx for InMemoryTx {
    async fn product(
        &mut self,
        tenant_id: TenantId,
        product_id: ProductId,
    ) -> Result<Option<ProductStock>, StoreError> {
        let key = ProductKey {
            tenant_id,
            product_id,
        };
        self.read_product(&key)
    }

    async fn products(
        &mut self,
        tenant_id: TenantId,
        product_ids: &[ProductId],
    ) -> Result<HashMap<ProductId, ProductStock>, StoreError> {
        let mut found = HashMap::with_capacity(product_ids.len());
        for product_id in product_ids {
            let key = ProductKey {
                tenant_id,
                product_id: *product_id,
            };
            if let Some(product) = self.read_product(&key)? {
                found.insert(*product_id, product);
            }
        }
        Ok(found)
    }

    async fn save_product(&mut self, product: &mut ProductStock) -> Result<(), StoreError> {
        let key = ProductKey {
            tenant_id: product.tenant_id,
            product_id: product.product_id,
        };

        let base_version = match self.staged_products.get(&key) {
            Some(staged) => {
                if staged.record.version != product.version {
                    return Err(StoreError::Conflict(format!(
                        "stale in-transaction save of product {} (expected {}, found {})",
                        product.product_id, staged.record.version, product.version
                    )));
                }
                staged.base_version
            }
            None => match self.committed_product(&key)? {
                Some(committed)
                    if ExpectedVersion::Exact(product.version).matches(committed.version) =>
                {
                    committed.version
                }
                Some(committed) => {
                    return Err(StoreError::Conflict(format!(
                        "stale save of product {} (expected {}, found {})",
                        product.product_id, committed.version, product.version
                    )));
                }
                None => {
                    return Err(StoreError::Conflict(format!(
                        "product {} no longer exists",
                        product.product_id
                    )));
                }
            },
        };

        product.version += 1;
        self.staged_products.insert(
            key,
            StagedProduct {
                base_version,
                record: product.clone(),
            },
        );
        Ok(())
    }

    async fn insert_reservations(&mut self, rows: &[StockReservation]) -> Result<(), StoreError> {
        self.staged_inserts.extend_from_slice(rows);
        Ok(())
    }

    async fn pending_by_group(
        &mut self,
        tenant_id: TenantId,
        group_id: ReservationGroupId,
    ) -> Result<Vec<StockReservation>, StoreError> {
        let reservations = self
            .state
            .reservations
            .read()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))?;
        let mut rows: Vec<StockReservation> = reservations
            .values()
            .filter(|r| {
                r.tenant_id == tenant_id
                    && r.group_id == group_id
                    && r.status == ReservationStatus::Pending
            })
            .cloned()
            .collect();
        rows.sort_by_key(|r| *r.record_id.as_uuid());
        Ok(rows)
    }

    async fn expired_pending(
        &mut self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<StockReservation>, StoreError> {
        let reservations = self
            .state
            .reservations
            .read()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))?;
        let mut rows: Vec<StockReservation> = reservations
            .values()
            .filter(|r| {
                r.status == ReservationStatus::Pending
                    && r.expires_at.is_some_and(|at| at < cutoff)
            })
            .cloned()
            .collect();
        rows.sort_by_key(|r| r.expires_at);
        rows.truncate(limit);
        Ok(rows)
    }

    async fn save_reservation(
        &mut self,
        row: &StockReservation,
        expected_status: ReservationStatus,
    ) -> Result<(), StoreError> {
        self.staged_updates
            .insert(row.record_id, (expected_status, row.clone()));
        Ok(())
    }

    async fn commit(self) -> Result<(), StoreError> {
        let mut products = self
            .state
            .products
            .write()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))?;
        let mut reservations = self
            .state
            .reservations
            .write()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))?;

        // Verify phase: every check passes before anything is applied, so a
        // conflicted commit leaves committed state untouched.
        for (key, staged) in &self.staged_products {
            match products.get(key) {
                Some(committed)
                    if ExpectedVersion::Exact(staged.base_version).matches(committed.version) => {}
                Some(committed) => {
                    return Err(StoreError::Conflict(format!(
                        "product {} changed concurrently (expected {}, found {})",
                        key.product_id, staged.base_version, committed.version
                    )));
                }
                None => {
                    return Err(StoreError::Conflict(format!(
                        "product {} no longer exists",
                        key.product_id
                    )));
                }
            }
        }
        for row in &self.staged_inserts {
            if reservations.contains_key(&row.record_id) {
                return Err(StoreError::Duplicate(format!(
                    "reservation record {}",
                    row.record_id
                )));
            }
        }
        for (record_id, (expected_status, _)) in &self.staged_updates {
            match reservations.get(record_id) {
                Some(committed) if committed.status == *expected_status => {}
                Some(committed) => {
                    return Err(StoreError::Conflict(format!(
                        "reservation {} changed concurrently (expected {}, found {})",
                        record_id, expected_status, committed.status
                    )));
                }
                None => {
                    return Err(StoreError::Conflict(format!(
                        "reservation {} no longer exists",
                        record_id
                    )));
                }
            }
        }

        // Apply phase.
        for (key, staged) in self.staged_products {
            products.insert(key, staged.record);
        }
        for row in self.staged_inserts {
            reservations.insert(row.record_id, row);
        }
        for (record_id, (_, row)) in self.staged_updates {
            reservations.insert(record_id, row);
        }

        Ok(())
    }

    async fn rollback(self) -> Result<(), StoreError> {
        // Staged writes are dropped with the transaction.
        Ok(())
    }
}

#[async_trait]
impl InventoryStore for InMemoryInventoryStore {
    type Tx = InMemoryTx;

    async fn begin(&self) -> Result<Self::Tx, StoreError> {
        Ok(InMemoryTx {
            state: Arc::clone(&self.state),
            staged_products: HashMap::new(),
            staged_inserts: Vec::new(),
            staged_updates: HashMap::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use forgemarket_core::{CustomerId, StoreId};

    fn product(tenant_id: TenantId, stock: i64) -> ProductStock {
        ProductStock::new(ProductId::new(), tenant_id, StoreId::new(), stock).unwrap()
    }

    #[tokio::test]
    async fn rollback_discards_staged_writes() {
        let store = InMemoryInventoryStore::new();
        let tenant_id = TenantId::new();
        let seeded = product(tenant_id, 10);
        let product_id = seeded.product_id;
        store.insert_product(seeded);

        let mut tx = store.begin().await.unwrap();
        let mut loaded = tx.product(tenant_id, product_id).await.unwrap().unwrap();
        loaded.stock_quantity = 3;
        tx.save_product(&mut loaded).await.unwrap();
        tx.rollback().await.unwrap();

        assert_eq!(
            store.product_snapshot(tenant_id, product_id).unwrap().stock_quantity,
            10
        );
    }

    #[tokio::test]
    async fn commit_applies_staged_writes_and_bumps_version() {
        let store = InMemoryInventoryStore::new();
        let tenant_id = TenantId::new();
        let seeded = product(tenant_id, 10);
        let product_id = seeded.product_id;
        store.insert_product(seeded);

        let mut tx = store.begin().await.unwrap();
        let mut loaded = tx.product(tenant_id, product_id).await.unwrap().unwrap();
        loaded.stock_quantity = 7;
        tx.save_product(&mut loaded).await.unwrap();
        assert_eq!(loaded.version, 1);
        tx.commit().await.unwrap();

        let committed = store.product_snapshot(tenant_id, product_id).unwrap();
        assert_eq!(committed.stock_quantity, 7);
        assert_eq!(committed.version, 1);
    }

    #[tokio::test]
    async fn concurrent_commit_detects_stale_version() {
        let store = InMemoryInventoryStore::new();
        let tenant_id = TenantId::new();
        let seeded = product(tenant_id, 10);
        let product_id = seeded.product_id;
        store.insert_product(seeded);

        let mut tx_a = store.begin().await.unwrap();
        let mut tx_b = store.begin().await.unwrap();
        let mut a = tx_a.product(tenant_id, product_id).await.unwrap().unwrap();
        let mut b = tx_b.product(tenant_id, product_id).await.unwrap().unwrap();

        a.stock_quantity = 5;
        tx_a.save_product(&mut a).await.unwrap();
        tx_a.commit().await.unwrap();

        b.stock_quantity = 2;
        tx_b.save_product(&mut b).await.unwrap();
        let err = tx_b.commit().await.unwrap_err();
        assert!(err.is_conflict());

        // The losing transaction applied nothing.
        assert_eq!(
            store.product_snapshot(tenant_id, product_id).unwrap().stock_quantity,
            5
        );
    }

    #[tokio::test]
    async fn reservation_transition_requires_expected_status() {
        let store = InMemoryInventoryStore::new();
        let tenant_id = TenantId::new();
        let now = Utc::now();
        let row = StockReservation::new_pending(
            ReservationGroupId::new(),
            tenant_id,
            ProductId::new(),
            CustomerId::new(),
            3,
            now,
            now + chrono::Duration::minutes(30),
            None,
        )
        .unwrap();
        let record_id = row.record_id;
        store.insert_reservation(row.clone());

        let mut released = row.clone();
        released.release(now).unwrap();

        let mut tx_a = store.begin().await.unwrap();
        tx_a.save_reservation(&released, ReservationStatus::Pending)
            .await
            .unwrap();
        tx_a.commit().await.unwrap();

        // A second transition of the same row conflicts: it is no longer Pending.
        let mut expired = row;
        expired.expire(now).unwrap();
        let mut tx_b = store.begin().await.unwrap();
        tx_b.save_reservation(&expired, ReservationStatus::Pending)
            .await
            .unwrap();
        assert!(tx_b.commit().await.unwrap_err().is_conflict());

        let stored = store
            .state
            .reservations
            .read()
            .unwrap()
            .get(&record_id)
            .cloned()
            .unwrap();
        assert_eq!(stored.status, ReservationStatus::Released);
    }
}
