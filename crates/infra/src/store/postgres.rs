//! Postgres-backed stock store.
//!
//! Persists the product stock slice and reservation rows with tenant
//! isolation and optimistic concurrency enforced at the database level.
//!
//! ## Expected schema
//!
//! ```sql
//! CREATE TABLE product_stock (
//!     tenant_id      UUID        NOT NULL,
//!     product_id     UUID        NOT NULL,
//!     store_id       UUID        NOT NULL,
//!     stock_quantity BIGINT      NOT NULL CHECK (stock_quantity >= 0),
//!     is_deleted     BOOLEAN     NOT NULL DEFAULT FALSE,
//!     version        BIGINT      NOT NULL DEFAULT 0,
//!     updated_at     TIMESTAMPTZ NOT NULL,
//!     PRIMARY KEY (tenant_id, product_id)
//! );
//!
//! CREATE TABLE stock_reservations (
//!     record_id          UUID        PRIMARY KEY,
//!     group_id           UUID        NOT NULL,
//!     tenant_id          UUID        NOT NULL,
//!     product_id         UUID        NOT NULL,
//!     customer_id        UUID        NOT NULL,
//!     quantity           BIGINT      NOT NULL CHECK (quantity > 0),
//!     status             TEXT        NOT NULL,
//!     created_at         TIMESTAMPTZ NOT NULL,
//!     expires_at         TIMESTAMPTZ NULL,
//!     confirmed_at       TIMESTAMPTZ NULL,
//!     released_at        TIMESTAMPTZ NULL,
//!     order_id           UUID        NULL,
//!     external_reference TEXT        NULL
//! );
//! CREATE INDEX idx_reservations_group
//!     ON stock_reservations (tenant_id, group_id, status);
//! CREATE INDEX idx_reservations_expiry
//!     ON stock_reservations (expires_at) WHERE status = 'pending';
//! ```
//!
//! ## Error mapping
//!
//! | Situation | StoreError |
//! |-----------|------------|
//! | `UPDATE … WHERE version = $n` affects 0 rows | `Conflict` |
//! | `UPDATE … WHERE status = $expected` affects 0 rows | `Conflict` |
//! | Unique violation (`23505`) on insert | `Duplicate` |
//! | Unparseable row data (status, timestamps) | `Serialization` |
//! | Any other sqlx error (pool, network, constraints) | `Backend` |
//!
//! The version check and the status condition are both evaluated inside the
//! surrounding transaction, so a conflicted operation leaves no partial
//! writes behind once the transaction rolls back.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::instrument;
use uuid::Uuid;

use forgemarket_core::{ProductId, ReservationGroupId, TenantId};
use forgemarket_inventory::{ProductStock, ReservationStatus, StockReservation};

use super::contract::{InventoryStore, InventoryTx, StoreError};

/// Postgres-backed stock store handing out sqlx transactions.
#[derive(Debug, Clone)]
pub struct PostgresInventoryStore {
    pool: PgPool,
}

impl PostgresInventoryStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl InventoryStore for PostgresInventoryStore {
    type Tx = PostgresTx;

    async fn begin(&self) -> Result<Self::Tx, StoreError> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;
        Ok(PostgresTx { tx })
    }
}

/// One sqlx transaction over the stock tables.
pub struct PostgresTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl InventoryTx for PostgresTx {
    #[instrument(
        skip(self),
        fields(tenant_id = %tenant_id, product_id = %product_id),
        err
    )]
    async fn product(
        &mut self,
        tenant_id: TenantId,
        product_id: ProductId,
    ) -> Result<Option<ProductStock>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT tenant_id, product_id, store_id, stock_quantity, is_deleted, version, updated_at
            FROM product_stock
            WHERE tenant_id = $1 AND product_id = $2
            "#,
        )
        .bind(tenant_id.as_uuid())
        .bind(product_id.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("load_product", e))?;

        row.map(|r| product_from_row(&r)).transpose()
    }

    #[instrument(
        skip(self, product_ids),
        fields(tenant_id = %tenant_id, requested = product_ids.len()),
        err
    )]
    async fn products(
        &mut self,
        tenant_id: TenantId,
        product_ids: &[ProductId],
    ) -> Result<HashMap<ProductId, ProductStock>, StoreError> {
        if product_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let ids: Vec<Uuid> = product_ids.iter().map(|id| *id.as_uuid()).collect();
        let rows = sqlx::query(
            r#"
            SELECT tenant_id, product_id, store_id, stock_quantity, is_deleted, version, updated_at
            FROM product_stock
            WHERE tenant_id = $1 AND product_id = ANY($2)
            "#,
        )
        .bind(tenant_id.as_uuid())
        .bind(&ids)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("load_products", e))?;

        let mut found = HashMap::with_capacity(rows.len());
        for row in rows {
            let product = product_from_row(&row)?;
            found.insert(product.product_id, product);
        }
        Ok(found)
    }

    #[instrument(
        skip(self, product),
        fields(
            tenant_id = %product.tenant_id,
            product_id = %product.product_id,
            version = product.version
        ),
        err
    )]
    async fn save_product(&mut self, product: &mut ProductStock) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE product_stock
            SET stock_quantity = $1, is_deleted = $2, version = version + 1, updated_at = $3
            WHERE tenant_id = $4 AND product_id = $5 AND version = $6
            "#,
        )
        .bind(product.stock_quantity)
        .bind(product.is_deleted)
        .bind(product.updated_at)
        .bind(product.tenant_id.as_uuid())
        .bind(product.product_id.as_uuid())
        .bind(product.version as i64)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("save_product", e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Conflict(format!(
                "stale save of product {} (version {})",
                product.product_id, product.version
            )));
        }

        product.version += 1;
        Ok(())
    }

    #[instrument(skip(self, rows), fields(row_count = rows.len()), err)]
    async fn insert_reservations(&mut self, rows: &[StockReservation]) -> Result<(), StoreError> {
        for row in rows {
            sqlx::query(
                r#"
                INSERT INTO stock_reservations (
                    record_id, group_id, tenant_id, product_id, customer_id,
                    quantity, status, created_at, expires_at,
                    confirmed_at, released_at, order_id, external_reference
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
                "#,
            )
            .bind(row.record_id.as_uuid())
            .bind(row.group_id.as_uuid())
            .bind(row.tenant_id.as_uuid())
            .bind(row.product_id.as_uuid())
            .bind(row.customer_id.as_uuid())
            .bind(row.quantity)
            .bind(row.status.as_str())
            .bind(row.created_at)
            .bind(row.expires_at)
            .bind(row.confirmed_at)
            .bind(row.released_at)
            .bind(row.order_id.map(|id| *id.as_uuid()))
            .bind(row.external_reference.as_deref())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    StoreError::Duplicate(format!("reservation record {}", row.record_id))
                } else {
                    map_sqlx_error("insert_reservation", e)
                }
            })?;
        }
        Ok(())
    }

    #[instrument(
        skip(self),
        fields(tenant_id = %tenant_id, group_id = %group_id),
        err
    )]
    async fn pending_by_group(
        &mut self,
        tenant_id: TenantId,
        group_id: ReservationGroupId,
    ) -> Result<Vec<StockReservation>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT record_id, group_id, tenant_id, product_id, customer_id,
                   quantity, status, created_at, expires_at,
                   confirmed_at, released_at, order_id, external_reference
            FROM stock_reservations
            WHERE tenant_id = $1 AND group_id = $2 AND status = 'pending'
            ORDER BY record_id
            "#,
        )
        .bind(tenant_id.as_uuid())
        .bind(group_id.as_uuid())
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("load_pending_by_group", e))?;

        rows.iter().map(reservation_from_row).collect()
    }

    #[instrument(skip(self), fields(cutoff = %cutoff, limit), err)]
    async fn expired_pending(
        &mut self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<StockReservation>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT record_id, group_id, tenant_id, product_id, customer_id,
                   quantity, status, created_at, expires_at,
                   confirmed_at, released_at, order_id, external_reference
            FROM stock_reservations
            WHERE status = 'pending' AND expires_at < $1
            ORDER BY expires_at ASC
            LIMIT $2
            "#,
        )
        .bind(cutoff)
        .bind(limit as i64)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("load_expired_pending", e))?;

        rows.iter().map(reservation_from_row).collect()
    }

    #[instrument(
        skip(self, row),
        fields(
            record_id = %row.record_id,
            status = %row.status,
            expected = %expected_status
        ),
        err
    )]
    async fn save_reservation(
        &mut self,
        row: &StockReservation,
        expected_status: ReservationStatus,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE stock_reservations
            SET status = $1, confirmed_at = $2, released_at = $3, order_id = $4
            WHERE record_id = $5 AND status = $6
            "#,
        )
        .bind(row.status.as_str())
        .bind(row.confirmed_at)
        .bind(row.released_at)
        .bind(row.order_id.map(|id| *id.as_uuid()))
        .bind(row.record_id.as_uuid())
        .bind(expected_status.as_str())
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("save_reservation", e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Conflict(format!(
                "reservation {} is no longer {}",
                row.record_id, expected_status
            )));
        }
        Ok(())
    }

    async fn commit(self) -> Result<(), StoreError> {
        self.tx
            .commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))
    }

    async fn rollback(self) -> Result<(), StoreError> {
        self.tx
            .rollback()
            .await
            .map_err(|e| map_sqlx_error("rollback_transaction", e))
    }
}

fn product_from_row(row: &PgRow) -> Result<ProductStock, StoreError> {
    let version: i64 = try_get(row, "version")?;
    Ok(ProductStock {
        tenant_id: TenantId::from_uuid(try_get(row, "tenant_id")?),
        product_id: ProductId::from_uuid(try_get(row, "product_id")?),
        store_id: forgemarket_core::StoreId::from_uuid(try_get(row, "store_id")?),
        stock_quantity: try_get(row, "stock_quantity")?,
        is_deleted: try_get(row, "is_deleted")?,
        version: version as u64,
        updated_at: try_get(row, "updated_at")?,
    })
}

fn reservation_from_row(row: &PgRow) -> Result<StockReservation, StoreError> {
    let status: String = try_get(row, "status")?;
    let status = status
        .parse::<ReservationStatus>()
        .map_err(|e| StoreError::Serialization(e.to_string()))?;
    let order_id: Option<Uuid> = try_get(row, "order_id")?;

    Ok(StockReservation {
        record_id: forgemarket_core::ReservationRecordId::from_uuid(try_get(row, "record_id")?),
        group_id: ReservationGroupId::from_uuid(try_get(row, "group_id")?),
        tenant_id: TenantId::from_uuid(try_get(row, "tenant_id")?),
        product_id: ProductId::from_uuid(try_get(row, "product_id")?),
        customer_id: forgemarket_core::CustomerId::from_uuid(try_get(row, "customer_id")?),
        quantity: try_get(row, "quantity")?,
        status,
        created_at: try_get(row, "created_at")?,
        expires_at: try_get(row, "expires_at")?,
        confirmed_at: try_get(row, "confirmed_at")?,
        released_at: try_get(row, "released_at")?,
        order_id: order_id.map(forgemarket_core::OrderId::from_uuid),
        external_reference: try_get(row, "external_reference")?,
    })
}

fn try_get<'r, T>(row: &'r PgRow, column: &str) -> Result<T, StoreError>
where
    T: sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
{
    row.try_get(column)
        .map_err(|e| StoreError::Serialization(format!("column {column}: {e}")))
}

fn map_sqlx_error(context: &str, err: sqlx::Error) -> StoreError {
    StoreError::Backend(format!("{context}: {err}"))
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db) if db.code().as_deref() == Some("23505")
    )
}
