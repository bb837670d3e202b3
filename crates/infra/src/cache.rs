//! In-memory TTL cache with single-flight recomputation.
//!
//! `get_or_compute` callers that miss concurrently on the same key serialize
//! on a per-key guard: the first computes, the rest wait and then hit the
//! fresh entry. Used for read-path lookups (stock-level display) that must
//! not hammer the store under load; never used inside the transactional
//! mutation paths, which always read fresh.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

use forgemarket_core::{ProductId, TenantId};

use crate::store::{InventoryStore, InventoryTx, StoreError};

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    cached_at: DateTime<Utc>,
}

/// Generic get-or-compute cache with TTL staleness.
#[derive(Debug)]
pub struct TtlCache<K, V> {
    ttl: Duration,
    entries: RwLock<HashMap<K, CacheEntry<V>>>,
    guards: Mutex<HashMap<K, Arc<Mutex<()>>>>,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
            guards: Mutex::new(HashMap::new()),
        }
    }

    /// Return the cached value if present and not stale.
    pub async fn get(&self, key: &K) -> Option<V> {
        let entries = self.entries.read().await;
        let entry = entries.get(key)?;
        if self.is_fresh(entry) {
            Some(entry.value.clone())
        } else {
            None
        }
    }

    /// Return the cached value, computing it on miss.
    ///
    /// Concurrent misses on the same key compute once: callers queue on a
    /// per-key guard and re-check the cache after acquiring it.
    pub async fn get_or_compute<F, Fut, E>(&self, key: K, compute: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        if let Some(value) = self.get(&key).await {
            return Ok(value);
        }

        let guard = self.key_guard(&key).await;
        let _held = guard.lock().await;

        // Another caller may have computed while we waited for the guard.
        if let Some(value) = self.get(&key).await {
            return Ok(value);
        }

        let value = compute().await?;
        self.entries.write().await.insert(
            key,
            CacheEntry {
                value: value.clone(),
                cached_at: Utc::now(),
            },
        );
        Ok(value)
    }

    /// Drop a single entry (e.g. after a write to the underlying data).
    pub async fn invalidate(&self, key: &K) {
        self.entries.write().await.remove(key);
        self.guards.lock().await.remove(key);
    }

    /// Drop every stale entry and its guard.
    pub async fn purge_expired(&self) -> usize {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| self.is_fresh(entry));
        let purged = before - entries.len();
        if purged > 0 {
            debug!(purged, "purged stale cache entries");
        }
        purged
    }

    fn is_fresh(&self, entry: &CacheEntry<V>) -> bool {
        let age = Utc::now().signed_duration_since(entry.cached_at);
        match chrono::Duration::from_std(self.ttl) {
            Ok(ttl) => age <= ttl,
            Err(_) => true,
        }
    }

    async fn key_guard(&self, key: &K) -> Arc<Mutex<()>> {
        let mut guards = self.guards.lock().await;
        Arc::clone(guards.entry(key.clone()).or_default())
    }
}

/// Read-only stock levels with TTL caching, for display paths.
///
/// Returns `None` for missing or soft-deleted products. Mutation paths do not
/// go through this; call [`CachedStockLevels::invalidate`] after a known write
/// to shorten staleness.
#[derive(Debug)]
pub struct CachedStockLevels<S> {
    store: S,
    cache: TtlCache<(TenantId, ProductId), Option<i64>>,
}

impl<S: InventoryStore> CachedStockLevels<S> {
    pub fn new(store: S, ttl: Duration) -> Self {
        Self {
            store,
            cache: TtlCache::new(ttl),
        }
    }

    pub async fn stock_level(
        &self,
        tenant_id: TenantId,
        product_id: ProductId,
    ) -> Result<Option<i64>, StoreError> {
        self.cache
            .get_or_compute((tenant_id, product_id), || async move {
                let mut tx = self.store.begin().await?;
                let level = tx
                    .product(tenant_id, product_id)
                    .await?
                    .filter(|p| !p.is_deleted)
                    .map(|p| p.stock_quantity);
                // Read-only lookup; nothing to keep.
                tx.rollback().await?;
                Ok(level)
            })
            .await
    }

    pub async fn invalidate(&self, tenant_id: TenantId, product_id: ProductId) {
        self.cache.invalidate(&(tenant_id, product_id)).await;
    }
}
