use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, OwnedMutexGuard};

use coldstock_core::{LotId, StorageUnitId};
use coldstock_stock::{
    Environment, LedgerEntry, Lot, LotFilter, NewLot, NewStorageUnit, StorageUnit, UnitStatus,
};

use super::{StockStore, StockTransaction, StoreError};

#[derive(Debug, Clone, Default)]
struct State {
    units: BTreeMap<StorageUnitId, StorageUnit>,
    lots: BTreeMap<LotId, Lot>,
    ledger: Vec<LedgerEntry>,
    last_unit_id: i64,
    last_lot_id: i64,
}

impl State {
    fn lots_matching(&self, filter: &LotFilter) -> Vec<Lot> {
        // BTreeMap iteration is already in ascending id order.
        self.lots
            .values()
            .filter(|lot| filter.matches(lot))
            .cloned()
            .collect()
    }

    fn occupancy(&self, unit_id: StorageUnitId) -> i64 {
        self.lots
            .values()
            .filter(|lot| lot.unit_id == unit_id)
            .map(|lot| lot.quantity)
            .sum()
    }
}

/// In-memory stock store.
///
/// Intended for tests/dev. Transactions are serialized: `begin` waits for the
/// previous transaction to finish, works on a private copy of the state and
/// publishes it on `commit`.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStockStore {
    state: Arc<Mutex<State>>,
}

impl InMemoryStockStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every committed ledger entry, oldest first.
    pub async fn ledger_entries(&self) -> Vec<LedgerEntry> {
        self.state.lock().await.ledger.clone()
    }
}

#[async_trait]
impl StockStore for InMemoryStockStore {
    async fn begin(&self) -> Result<Box<dyn StockTransaction>, StoreError> {
        let guard = self.state.clone().lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(InMemoryTransaction { guard, working }))
    }

    async fn get_unit(&self, id: StorageUnitId) -> Result<Option<StorageUnit>, StoreError> {
        Ok(self.state.lock().await.units.get(&id).cloned())
    }

    async fn list_units(
        &self,
        environment: Option<Environment>,
    ) -> Result<Vec<StorageUnit>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .units
            .values()
            .filter(|u| environment.is_none_or(|env| u.environment == env))
            .cloned()
            .collect())
    }

    async fn search_lots(&self, filter: &LotFilter) -> Result<Vec<Lot>, StoreError> {
        Ok(self.state.lock().await.lots_matching(filter))
    }

    async fn occupancy(&self, unit_id: StorageUnitId) -> Result<i64, StoreError> {
        Ok(self.state.lock().await.occupancy(unit_id))
    }
}

/// Transaction over a private copy of the in-memory state.
pub struct InMemoryTransaction {
    guard: OwnedMutexGuard<State>,
    working: State,
}

#[async_trait]
impl StockTransaction for InMemoryTransaction {
    async fn lock_unit(&mut self, id: StorageUnitId) -> Result<Option<StorageUnit>, StoreError> {
        // The whole store is already held by this transaction.
        Ok(self.working.units.get(&id).cloned())
    }

    async fn get_lots(&mut self, filter: &LotFilter) -> Result<Vec<Lot>, StoreError> {
        Ok(self.working.lots_matching(filter))
    }

    async fn get_lot(&mut self, id: LotId) -> Result<Option<Lot>, StoreError> {
        Ok(self.working.lots.get(&id).cloned())
    }

    async fn occupancy(&mut self, unit_id: StorageUnitId) -> Result<i64, StoreError> {
        Ok(self.working.occupancy(unit_id))
    }

    async fn insert_unit(&mut self, unit: &NewStorageUnit) -> Result<StorageUnit, StoreError> {
        self.working.last_unit_id += 1;
        let stored = StorageUnit {
            id: StorageUnitId::new(self.working.last_unit_id),
            name: unit.name.clone(),
            capacity_total: unit.capacity_total,
            environment: unit.environment,
            kwh_per_day: unit.kwh_per_day,
            status: UnitStatus::Available,
        };
        self.working.units.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn delete_unit(&mut self, id: StorageUnitId) -> Result<u64, StoreError> {
        if self.working.units.remove(&id).is_none() {
            return Err(StoreError::Missing(format!("storage unit {id}")));
        }
        let before = self.working.lots.len();
        self.working.lots.retain(|_, lot| lot.unit_id != id);
        Ok((before - self.working.lots.len()) as u64)
    }

    async fn insert_lot(&mut self, lot: &NewLot) -> Result<LotId, StoreError> {
        if !self.working.units.contains_key(&lot.unit_id) {
            return Err(StoreError::Constraint(format!(
                "lot references unknown storage unit {}",
                lot.unit_id
            )));
        }
        if lot.quantity < 0 {
            return Err(StoreError::Constraint("lot quantity cannot be negative".to_string()));
        }
        self.working.last_lot_id += 1;
        let id = LotId::new(self.working.last_lot_id);
        self.working.lots.insert(id, lot.clone().with_id(id));
        Ok(id)
    }

    async fn update_lot_quantity(&mut self, id: LotId, quantity: i64) -> Result<(), StoreError> {
        if quantity < 0 {
            return Err(StoreError::Constraint("lot quantity cannot be negative".to_string()));
        }
        let lot = self
            .working
            .lots
            .get_mut(&id)
            .ok_or_else(|| StoreError::Missing(format!("lot {id}")))?;
        lot.quantity = quantity;
        Ok(())
    }

    async fn delete_lot(&mut self, id: LotId) -> Result<(), StoreError> {
        self.working
            .lots
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| StoreError::Missing(format!("lot {id}")))
    }

    async fn set_unit_status(
        &mut self,
        id: StorageUnitId,
        status: UnitStatus,
    ) -> Result<(), StoreError> {
        let unit = self
            .working
            .units
            .get_mut(&id)
            .ok_or_else(|| StoreError::Missing(format!("storage unit {id}")))?;
        unit.status = status;
        Ok(())
    }

    async fn record_ledger_entry(&mut self, entry: &LedgerEntry) -> Result<(), StoreError> {
        self.working.ledger.push(entry.clone());
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let InMemoryTransaction { mut guard, working } = *self;
        *guard = working;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coldstock_core::Money;

    fn freezer() -> NewStorageUnit {
        NewStorageUnit {
            name: "freezer".to_string(),
            capacity_total: 10,
            environment: Environment::OpenStock,
            kwh_per_day: None,
        }
    }

    fn new_lot(unit_id: StorageUnitId, quantity: i64) -> NewLot {
        NewLot {
            product: "cone".to_string(),
            flavor: "strawberry".to_string(),
            purchase_price: Money::from_minor(200),
            sale_price: Money::from_minor(500),
            quantity,
            expires_on: None,
            unit_id,
            barcode: None,
        }
    }

    #[tokio::test]
    async fn writes_are_invisible_until_commit() {
        let store = InMemoryStockStore::new();

        let mut tx = store.begin().await.unwrap();
        let unit = tx.insert_unit(&freezer()).await.unwrap();
        tx.insert_lot(&new_lot(unit.id, 4)).await.unwrap();
        tx.rollback().await.unwrap();
        assert!(store.get_unit(unit.id).await.unwrap().is_none());

        let mut tx = store.begin().await.unwrap();
        let unit = tx.insert_unit(&freezer()).await.unwrap();
        tx.insert_lot(&new_lot(unit.id, 4)).await.unwrap();
        tx.commit().await.unwrap();
        assert_eq!(store.occupancy(unit.id).await.unwrap(), 4);
    }

    #[tokio::test]
    async fn lot_ids_increase_with_insertion_order() {
        let store = InMemoryStockStore::new();
        let mut tx = store.begin().await.unwrap();
        let unit = tx.insert_unit(&freezer()).await.unwrap();
        let first = tx.insert_lot(&new_lot(unit.id, 1)).await.unwrap();
        let second = tx.insert_lot(&new_lot(unit.id, 1)).await.unwrap();
        tx.commit().await.unwrap();

        assert!(first < second);
        let lots = store.search_lots(&LotFilter::in_unit(unit.id)).await.unwrap();
        assert_eq!(lots.iter().map(|l| l.id).collect::<Vec<_>>(), vec![first, second]);
    }

    #[tokio::test]
    async fn deleting_a_unit_cascades_to_its_lots() {
        let store = InMemoryStockStore::new();
        let mut tx = store.begin().await.unwrap();
        let unit = tx.insert_unit(&freezer()).await.unwrap();
        tx.insert_lot(&new_lot(unit.id, 2)).await.unwrap();
        tx.insert_lot(&new_lot(unit.id, 3)).await.unwrap();
        assert_eq!(tx.delete_unit(unit.id).await.unwrap(), 2);
        tx.commit().await.unwrap();

        assert!(store.search_lots(&LotFilter::default()).await.unwrap().is_empty());
    }
}
