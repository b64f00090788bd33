//! Postgres-backed stock store.
//!
//! ## Error Mapping
//!
//! SQLx errors are mapped to `StoreError` as follows:
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError |
//! |------------|----------------------|------------|
//! | Database (unique violation) | `23505` | `Constraint` |
//! | Database (foreign key violation) | `23503` | `Constraint` |
//! | Database (check constraint violation) | `23514` | `Constraint` |
//! | Database (other) | Any other | `Query` |
//! | PoolClosed / PoolTimedOut / Io / Tls | N/A | `Connection` |
//! | RowNotFound | N/A | `Missing` |
//! | ColumnDecode / Decode | N/A | `Decode` |
//! | Other | N/A | `Query` |
//!
//! ## Isolation
//!
//! Transactions lock the unit rows they touch (`SELECT ... FOR UPDATE`) before
//! reading occupancy, so two transfers into the same unit cannot both pass the
//! capacity check. Callers lock units in ascending id order to avoid deadlocks.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{Executor, FromRow, PgPool, Postgres, Row, Transaction};
use tracing::{debug, instrument};

use coldstock_core::{LotId, Money, StorageUnitId};
use coldstock_stock::{
    Environment, LedgerEntry, Lot, LotFilter, NewLot, NewStorageUnit, StorageUnit, UnitStatus,
};

use super::{StockStore, StockTransaction, StoreError};
use crate::config::StockConfig;

const SCHEMA: [&str; 4] = [
    r#"
    CREATE TABLE IF NOT EXISTS storage_units (
        id BIGSERIAL PRIMARY KEY,
        name TEXT NOT NULL,
        capacity_total BIGINT NOT NULL CHECK (capacity_total >= 1),
        environment TEXT NOT NULL,
        kwh_per_day DOUBLE PRECISION,
        status TEXT NOT NULL DEFAULT 'available'
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS lots (
        id BIGSERIAL PRIMARY KEY,
        product TEXT NOT NULL,
        flavor TEXT NOT NULL,
        purchase_price BIGINT NOT NULL,
        sale_price BIGINT NOT NULL,
        quantity BIGINT NOT NULL CHECK (quantity >= 0),
        expires_on DATE,
        unit_id BIGINT NOT NULL REFERENCES storage_units (id) ON DELETE CASCADE,
        barcode TEXT
    )
    "#,
    "CREATE INDEX IF NOT EXISTS lots_unit_flavor_idx ON lots (unit_id, flavor)",
    r#"
    CREATE TABLE IF NOT EXISTS ledger_entries (
        id UUID PRIMARY KEY,
        kind TEXT NOT NULL,
        amount BIGINT NOT NULL,
        description TEXT NOT NULL,
        recorded_at TIMESTAMPTZ NOT NULL
    )
    "#,
];

const UNIT_COLUMNS: &str = "id, name, capacity_total, environment, kwh_per_day, status";

const LOT_QUERY: &str = r#"
    SELECT
        id,
        product,
        flavor,
        purchase_price,
        sale_price,
        quantity,
        expires_on,
        unit_id,
        barcode
    FROM lots
    WHERE ($1::BIGINT IS NULL OR unit_id = $1)
      AND ($2::TEXT IS NULL OR product = $2)
      AND ($3::TEXT IS NULL OR flavor = $3)
      AND (NOT $4 OR barcode IS NOT DISTINCT FROM $5)
      AND ($6::DATE IS NULL OR expires_on <= $6)
    ORDER BY id ASC
"#;

/// Postgres-backed stock store.
///
/// Uses the SQLx connection pool, which is `Send + Sync`; each transaction
/// checks out one connection for its lifetime.
#[derive(Debug, Clone)]
pub struct PostgresStockStore {
    pool: Arc<PgPool>,
}

impl PostgresStockStore {
    /// Create a store over an existing connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Connect using `database_url` and `db_max_connections` from the config.
    #[instrument(skip(config), fields(max_connections = config.db_max_connections), err)]
    pub async fn connect(config: &StockConfig) -> Result<Self, StoreError> {
        let url = config
            .database_url
            .as_deref()
            .ok_or_else(|| StoreError::Connection("DATABASE_URL is not set".to_string()))?;
        let pool = PgPoolOptions::new()
            .max_connections(config.db_max_connections)
            .connect(url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    /// Create tables and indexes if they do not exist yet.
    #[instrument(skip(self), err)]
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&*self.pool)
                .await
                .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        }
        Ok(())
    }
}

#[async_trait]
impl StockStore for PostgresStockStore {
    async fn begin(&self) -> Result<Box<dyn StockTransaction>, StoreError> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;
        Ok(Box::new(PostgresTransaction { tx }))
    }

    async fn get_unit(&self, id: StorageUnitId) -> Result<Option<StorageUnit>, StoreError> {
        fetch_unit(&*self.pool, id, false).await
    }

    async fn list_units(
        &self,
        environment: Option<Environment>,
    ) -> Result<Vec<StorageUnit>, StoreError> {
        let sql = format!(
            "SELECT {UNIT_COLUMNS} FROM storage_units \
             WHERE ($1::TEXT IS NULL OR environment = $1) ORDER BY id ASC"
        );
        let rows = sqlx::query(&sql)
            .bind(environment.map(Environment::as_str))
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_units", e))?;
        rows.iter().map(decode_unit).collect()
    }

    async fn search_lots(&self, filter: &LotFilter) -> Result<Vec<Lot>, StoreError> {
        fetch_lots(&*self.pool, filter).await
    }

    async fn occupancy(&self, unit_id: StorageUnitId) -> Result<i64, StoreError> {
        sum_occupancy(&*self.pool, unit_id).await
    }
}

/// One Postgres transaction. Dropping it without `commit` rolls back.
pub struct PostgresTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl StockTransaction for PostgresTransaction {
    async fn lock_unit(&mut self, id: StorageUnitId) -> Result<Option<StorageUnit>, StoreError> {
        fetch_unit(&mut *self.tx, id, true).await
    }

    async fn get_lots(&mut self, filter: &LotFilter) -> Result<Vec<Lot>, StoreError> {
        fetch_lots(&mut *self.tx, filter).await
    }

    async fn get_lot(&mut self, id: LotId) -> Result<Option<Lot>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, product, flavor, purchase_price, sale_price, quantity, expires_on, unit_id, barcode
            FROM lots
            WHERE id = $1
            "#,
        )
        .bind(id.get())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("get_lot", e))?;
        row.as_ref().map(decode_lot).transpose()
    }

    async fn occupancy(&mut self, unit_id: StorageUnitId) -> Result<i64, StoreError> {
        sum_occupancy(&mut *self.tx, unit_id).await
    }

    async fn insert_unit(&mut self, unit: &NewStorageUnit) -> Result<StorageUnit, StoreError> {
        let sql = format!(
            "INSERT INTO storage_units (name, capacity_total, environment, kwh_per_day, status) \
             VALUES ($1, $2, $3, $4, $5) RETURNING {UNIT_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(&unit.name)
            .bind(unit.capacity_total)
            .bind(unit.environment.as_str())
            .bind(unit.kwh_per_day)
            .bind(UnitStatus::Available.as_str())
            .fetch_one(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("insert_unit", e))?;
        decode_unit(&row)
    }

    async fn delete_unit(&mut self, id: StorageUnitId) -> Result<u64, StoreError> {
        let lots = sqlx::query("DELETE FROM lots WHERE unit_id = $1")
            .bind(id.get())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("delete_unit_lots", e))?
            .rows_affected();
        let units = sqlx::query("DELETE FROM storage_units WHERE id = $1")
            .bind(id.get())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("delete_unit", e))?
            .rows_affected();
        if units == 0 {
            return Err(StoreError::Missing(format!("storage unit {id}")));
        }
        Ok(lots)
    }

    async fn insert_lot(&mut self, lot: &NewLot) -> Result<LotId, StoreError> {
        let row = sqlx::query(
            r#"
            INSERT INTO lots (
                product,
                flavor,
                purchase_price,
                sale_price,
                quantity,
                expires_on,
                unit_id,
                barcode
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING id
            "#,
        )
        .bind(&lot.product)
        .bind(&lot.flavor)
        .bind(lot.purchase_price.minor())
        .bind(lot.sale_price.minor())
        .bind(lot.quantity)
        .bind(lot.expires_on)
        .bind(lot.unit_id.get())
        .bind(lot.barcode.as_deref())
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_lot", e))?;
        let id: i64 = row
            .try_get("id")
            .map_err(|e| StoreError::Decode(e.to_string()))?;
        debug!(lot_id = id, unit_id = %lot.unit_id, "inserted lot");
        Ok(LotId::new(id))
    }

    async fn update_lot_quantity(&mut self, id: LotId, quantity: i64) -> Result<(), StoreError> {
        let affected = sqlx::query("UPDATE lots SET quantity = $2 WHERE id = $1")
            .bind(id.get())
            .bind(quantity)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("update_lot_quantity", e))?
            .rows_affected();
        if affected == 0 {
            return Err(StoreError::Missing(format!("lot {id}")));
        }
        Ok(())
    }

    async fn delete_lot(&mut self, id: LotId) -> Result<(), StoreError> {
        let affected = sqlx::query("DELETE FROM lots WHERE id = $1")
            .bind(id.get())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("delete_lot", e))?
            .rows_affected();
        if affected == 0 {
            return Err(StoreError::Missing(format!("lot {id}")));
        }
        Ok(())
    }

    async fn set_unit_status(
        &mut self,
        id: StorageUnitId,
        status: UnitStatus,
    ) -> Result<(), StoreError> {
        let affected = sqlx::query("UPDATE storage_units SET status = $2 WHERE id = $1")
            .bind(id.get())
            .bind(status.as_str())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("set_unit_status", e))?
            .rows_affected();
        if affected == 0 {
            return Err(StoreError::Missing(format!("storage unit {id}")));
        }
        Ok(())
    }

    async fn record_ledger_entry(&mut self, entry: &LedgerEntry) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO ledger_entries (id, kind, amount, description, recorded_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(*entry.id.as_uuid())
        .bind(entry.kind.as_str())
        .bind(entry.amount.minor())
        .bind(&entry.description)
        .bind(entry.recorded_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("record_ledger_entry", e))?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx
            .commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        self.tx
            .rollback()
            .await
            .map_err(|e| map_sqlx_error("rollback", e))
    }
}

async fn fetch_unit<'e, E>(
    executor: E,
    id: StorageUnitId,
    for_update: bool,
) -> Result<Option<StorageUnit>, StoreError>
where
    E: Executor<'e, Database = Postgres>,
{
    let lock = if for_update { " FOR UPDATE" } else { "" };
    let sql = format!("SELECT {UNIT_COLUMNS} FROM storage_units WHERE id = $1{lock}");
    let row = sqlx::query(&sql)
        .bind(id.get())
        .fetch_optional(executor)
        .await
        .map_err(|e| map_sqlx_error("fetch_unit", e))?;
    row.as_ref().map(decode_unit).transpose()
}

async fn fetch_lots<'e, E>(executor: E, filter: &LotFilter) -> Result<Vec<Lot>, StoreError>
where
    E: Executor<'e, Database = Postgres>,
{
    let rows = sqlx::query(LOT_QUERY)
        .bind(filter.unit_id.map(StorageUnitId::get))
        .bind(filter.product.as_deref())
        .bind(filter.flavor.as_deref())
        .bind(filter.barcode.is_some())
        .bind(filter.barcode.clone().flatten())
        .bind(filter.expiring_on_or_before)
        .fetch_all(executor)
        .await
        .map_err(|e| map_sqlx_error("fetch_lots", e))?;
    rows.iter().map(decode_lot).collect()
}

async fn sum_occupancy<'e, E>(executor: E, unit_id: StorageUnitId) -> Result<i64, StoreError>
where
    E: Executor<'e, Database = Postgres>,
{
    // SUM(BIGINT) is NUMERIC in Postgres; cast back so it decodes as i64.
    let row = sqlx::query("SELECT COALESCE(SUM(quantity), 0)::BIGINT AS occupied FROM lots WHERE unit_id = $1")
        .bind(unit_id.get())
        .fetch_one(executor)
        .await
        .map_err(|e| map_sqlx_error("occupancy", e))?;
    row.try_get("occupied")
        .map_err(|e| StoreError::Decode(e.to_string()))
}

fn decode_unit(row: &PgRow) -> Result<StorageUnit, StoreError> {
    let row = UnitRow::from_row(row).map_err(|e| StoreError::Decode(e.to_string()))?;
    row.try_into()
}

fn decode_lot(row: &PgRow) -> Result<Lot, StoreError> {
    let row = LotRow::from_row(row).map_err(|e| StoreError::Decode(e.to_string()))?;
    Ok(row.into())
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                // unique, foreign key, check
                Some("23505") | Some("23503") | Some("23514") => StoreError::Constraint(msg),
                _ => StoreError::Query(msg),
            }
        }
        sqlx::Error::PoolClosed | sqlx::Error::PoolTimedOut => {
            StoreError::Connection(format!("connection pool unavailable in {}", operation))
        }
        sqlx::Error::Io(e) => StoreError::Connection(format!("io error in {}: {}", operation, e)),
        sqlx::Error::Tls(e) => StoreError::Connection(format!("tls error in {}: {}", operation, e)),
        sqlx::Error::RowNotFound => {
            StoreError::Missing(format!("unexpected row not found in {}", operation))
        }
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
            StoreError::Decode(format!("{} in {}", err, operation))
        }
        _ => StoreError::Query(format!("sqlx error in {}: {}", operation, err)),
    }
}

// SQLx row types

#[derive(Debug)]
struct UnitRow {
    id: i64,
    name: String,
    capacity_total: i64,
    environment: String,
    kwh_per_day: Option<f64>,
    status: String,
}

impl<'r> FromRow<'r, PgRow> for UnitRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(UnitRow {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            capacity_total: row.try_get("capacity_total")?,
            environment: row.try_get("environment")?,
            kwh_per_day: row.try_get("kwh_per_day")?,
            status: row.try_get("status")?,
        })
    }
}

impl TryFrom<UnitRow> for StorageUnit {
    type Error = StoreError;

    fn try_from(row: UnitRow) -> Result<Self, Self::Error> {
        let environment = row
            .environment
            .parse::<Environment>()
            .map_err(|e| StoreError::Decode(e.to_string()))?;
        let status = row
            .status
            .parse::<UnitStatus>()
            .map_err(|e| StoreError::Decode(e.to_string()))?;
        Ok(StorageUnit {
            id: StorageUnitId::new(row.id),
            name: row.name,
            capacity_total: row.capacity_total,
            environment,
            kwh_per_day: row.kwh_per_day,
            status,
        })
    }
}

#[derive(Debug)]
struct LotRow {
    id: i64,
    product: String,
    flavor: String,
    purchase_price: i64,
    sale_price: i64,
    quantity: i64,
    expires_on: Option<NaiveDate>,
    unit_id: i64,
    barcode: Option<String>,
}

impl<'r> FromRow<'r, PgRow> for LotRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(LotRow {
            id: row.try_get("id")?,
            product: row.try_get("product")?,
            flavor: row.try_get("flavor")?,
            purchase_price: row.try_get("purchase_price")?,
            sale_price: row.try_get("sale_price")?,
            quantity: row.try_get("quantity")?,
            expires_on: row.try_get("expires_on")?,
            unit_id: row.try_get("unit_id")?,
            barcode: row.try_get("barcode")?,
        })
    }
}

impl From<LotRow> for Lot {
    fn from(row: LotRow) -> Self {
        Lot {
            id: LotId::new(row.id),
            product: row.product,
            flavor: row.flavor,
            purchase_price: Money::from_minor(row.purchase_price),
            sale_price: Money::from_minor(row.sale_price),
            quantity: row.quantity,
            expires_on: row.expires_on,
            unit_id: StorageUnitId::new(row.unit_id),
            barcode: row.barcode,
        }
    }
}
