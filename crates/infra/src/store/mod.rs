//! Transactional store boundary for storage units and lots.
//!
//! The allocator never talks to a database directly. It opens a
//! `StockTransaction` from an injected `StockStore`, reads and mutates through
//! it, and either commits or rolls back. Isolation between concurrent
//! transactions is the store's job:
//!
//! - `InMemoryStockStore` serializes transactions behind an async mutex and
//!   applies a transaction's writes only on commit (tests/dev).
//! - `PostgresStockStore` runs each transaction in a Postgres transaction and
//!   locks the involved unit rows with `SELECT ... FOR UPDATE`.

pub mod in_memory;
pub mod postgres;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use coldstock_core::{LotId, StorageUnitId};
use coldstock_stock::{
    AllocationError, Environment, LedgerEntry, Lot, LotFilter, NewLot, NewStorageUnit, StorageUnit,
    UnitStatus,
};

pub use in_memory::InMemoryStockStore;
pub use postgres::PostgresStockStore;

/// Store operation error.
///
/// These are **infrastructure errors** as opposed to allocation rejections
/// (capacity, stock, validation). They surface to callers as
/// `AllocationError::StoreFailure`.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("constraint violation: {0}")]
    Constraint(String),

    #[error("missing row: {0}")]
    Missing(String),

    #[error("connection failure: {0}")]
    Connection(String),

    #[error("query failed: {0}")]
    Query(String),

    #[error("failed to decode row: {0}")]
    Decode(String),
}

impl From<StoreError> for AllocationError {
    fn from(value: StoreError) -> Self {
        AllocationError::StoreFailure(value.to_string())
    }
}

/// Read access plus the ability to open transactions.
#[async_trait]
pub trait StockStore: Send + Sync {
    /// Open a transaction. Mutations become visible only after `commit`.
    async fn begin(&self) -> Result<Box<dyn StockTransaction>, StoreError>;

    async fn get_unit(&self, id: StorageUnitId) -> Result<Option<StorageUnit>, StoreError>;

    /// Units ordered by id, optionally restricted to one environment.
    async fn list_units(
        &self,
        environment: Option<Environment>,
    ) -> Result<Vec<StorageUnit>, StoreError>;

    /// Lots matching `filter`, ordered by lot id ascending.
    async fn search_lots(&self, filter: &LotFilter) -> Result<Vec<Lot>, StoreError>;

    /// Sum of lot quantities held by a unit.
    async fn occupancy(&self, unit_id: StorageUnitId) -> Result<i64, StoreError>;
}

/// Unit of work against the store.
///
/// Dropping a transaction without calling `commit` discards its writes.
#[async_trait]
pub trait StockTransaction: Send {
    /// Fetch a unit and hold it against concurrent writers until the
    /// transaction ends.
    async fn lock_unit(&mut self, id: StorageUnitId) -> Result<Option<StorageUnit>, StoreError>;

    /// Lots matching `filter`, ordered by lot id ascending.
    async fn get_lots(&mut self, filter: &LotFilter) -> Result<Vec<Lot>, StoreError>;

    async fn get_lot(&mut self, id: LotId) -> Result<Option<Lot>, StoreError>;

    async fn occupancy(&mut self, unit_id: StorageUnitId) -> Result<i64, StoreError>;

    async fn insert_unit(&mut self, unit: &NewStorageUnit) -> Result<StorageUnit, StoreError>;

    /// Delete a unit and every lot it owns. Returns the number of lots removed.
    async fn delete_unit(&mut self, id: StorageUnitId) -> Result<u64, StoreError>;

    async fn insert_lot(&mut self, lot: &NewLot) -> Result<LotId, StoreError>;

    async fn update_lot_quantity(&mut self, id: LotId, quantity: i64) -> Result<(), StoreError>;

    async fn delete_lot(&mut self, id: LotId) -> Result<(), StoreError>;

    async fn set_unit_status(
        &mut self,
        id: StorageUnitId,
        status: UnitStatus,
    ) -> Result<(), StoreError>;

    async fn record_ledger_entry(&mut self, entry: &LedgerEntry) -> Result<(), StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}

#[async_trait]
impl<S> StockStore for Arc<S>
where
    S: StockStore + ?Sized,
{
    async fn begin(&self) -> Result<Box<dyn StockTransaction>, StoreError> {
        (**self).begin().await
    }

    async fn get_unit(&self, id: StorageUnitId) -> Result<Option<StorageUnit>, StoreError> {
        (**self).get_unit(id).await
    }

    async fn list_units(
        &self,
        environment: Option<Environment>,
    ) -> Result<Vec<StorageUnit>, StoreError> {
        (**self).list_units(environment).await
    }

    async fn search_lots(&self, filter: &LotFilter) -> Result<Vec<Lot>, StoreError> {
        (**self).search_lots(filter).await
    }

    async fn occupancy(&self, unit_id: StorageUnitId) -> Result<i64, StoreError> {
        (**self).occupancy(unit_id).await
    }
}
