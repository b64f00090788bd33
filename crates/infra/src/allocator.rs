//! Stock allocation pipeline (application-level orchestration).
//!
//! Each mutating operation follows the same shape:
//!
//! ```text
//! begin transaction
//!   ↓
//! 1. Lock the involved storage units (ascending id order)
//!   ↓
//! 2. Read occupancy and the relevant lots through the transaction
//!   ↓
//! 3. Plan (pure domain logic in `coldstock_stock::allocation`)
//!   ↓
//! 4. Apply the planned `LotMutation`s
//!   ↓
//! 5. Recompute the status of every touched unit
//!   ↓
//! commit, or roll back on any failure
//! ```
//!
//! Rejections (capacity, stock, validation, missing rows) and store failures
//! both roll the transaction back, so no partial effect is ever committed.

use chrono::{NaiveDate, Utc};
use tracing::{error, info, instrument, warn};

use coldstock_core::{LotId, ReceiptId, StorageUnitId};
use coldstock_stock::{
    plan_register, plan_sale, plan_transfer, AllocationError, AllocationResult, Confirmation,
    Environment, Lot, LotDraft, LotFilter, LotMutation, NewStorageUnit, SaleReceipt, StorageUnit,
    TransferIntent, UnitStatus, UnitStatusReport,
};

use crate::config::StockConfig;
use crate::store::{StockStore, StockTransaction, StoreError};

/// Capacity-checked stock operations over an injected store.
#[derive(Debug, Clone)]
pub struct StockAllocator<S> {
    store: S,
    report_min_capacity: i64,
}

impl<S> StockAllocator<S>
where
    S: StockStore,
{
    pub fn new(store: S) -> Self {
        Self::with_config(store, &StockConfig::default())
    }

    pub fn with_config(store: S, config: &StockConfig) -> Self {
        Self {
            store,
            report_min_capacity: config.report_min_capacity,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Register a storage unit. New units start `Available`.
    #[instrument(skip_all, fields(name = %unit.name, capacity = unit.capacity_total))]
    pub async fn register_unit(&self, unit: NewStorageUnit) -> AllocationResult<StorageUnit> {
        unit.validate()?;
        let mut tx = self.store.begin().await?;
        let outcome = tx.insert_unit(&unit).await.map_err(AllocationError::from);
        let stored = settle("register_unit", tx, outcome).await?;
        info!(unit_id = %stored.id, environment = %stored.environment, "storage unit registered");
        Ok(stored)
    }

    /// Remove a unit together with every lot it holds.
    ///
    /// Returns the number of lots deleted.
    #[instrument(skip_all, fields(unit_id = %unit_id))]
    pub async fn remove_unit(&self, unit_id: StorageUnitId) -> AllocationResult<u64> {
        let mut tx = self.store.begin().await?;
        let outcome = remove_unit_in(tx.as_mut(), unit_id).await;
        let removed = settle("remove_unit", tx, outcome).await?;
        info!(lots_removed = removed, "storage unit removed");
        Ok(removed)
    }

    pub async fn get_unit(&self, unit_id: StorageUnitId) -> AllocationResult<StorageUnit> {
        self.store
            .get_unit(unit_id)
            .await?
            .ok_or_else(|| unit_not_found(unit_id))
    }

    pub async fn list_units(
        &self,
        environment: Option<Environment>,
    ) -> AllocationResult<Vec<StorageUnit>> {
        Ok(self.store.list_units(environment).await?)
    }

    /// Place incoming stock into `unit_id`, merging into a matching lot when
    /// one exists.
    #[instrument(
        skip_all,
        fields(unit_id = %unit_id, flavor = %draft.flavor, quantity = draft.quantity)
    )]
    pub async fn register_stock(
        &self,
        draft: LotDraft,
        unit_id: StorageUnitId,
    ) -> AllocationResult<Confirmation> {
        draft.validate()?;
        let mut tx = self.store.begin().await?;
        let outcome = register_in(tx.as_mut(), &draft, unit_id).await;
        let confirmation = settle("register_stock", tx, outcome).await?;
        info!(%confirmation, "stock registered");
        Ok(confirmation)
    }

    /// Move `quantity` units of `flavor` from `source` to `destination`.
    #[instrument(
        skip_all,
        fields(flavor = %flavor, source = %source, destination = %destination, quantity = quantity)
    )]
    pub async fn transfer_stock(
        &self,
        flavor: &str,
        source: StorageUnitId,
        destination: StorageUnitId,
        quantity: i64,
    ) -> AllocationResult<Confirmation> {
        let intent = TransferIntent {
            flavor: flavor.to_string(),
            quantity,
            source,
            destination,
        };
        intent.validate()?;
        let mut tx = self.store.begin().await?;
        let outcome = transfer_in(tx.as_mut(), &intent).await;
        let confirmation = settle("transfer_stock", tx, outcome).await?;
        info!(%confirmation, "stock transferred");
        Ok(confirmation)
    }

    /// Sell `quantity` units from one lot and record the revenue.
    #[instrument(skip_all, fields(lot_id = %lot_id, quantity = quantity))]
    pub async fn sell_stock(&self, lot_id: LotId, quantity: i64) -> AllocationResult<SaleReceipt> {
        if quantity <= 0 {
            return Err(AllocationError::validation("quantity must be positive"));
        }
        let mut tx = self.store.begin().await?;
        let outcome = sell_in(tx.as_mut(), lot_id, quantity).await;
        let receipt = settle("sell_stock", tx, outcome).await?;
        info!(receipt_id = %receipt.receipt_id, total = %receipt.total, "sale recorded");
        Ok(receipt)
    }

    /// Per-unit occupancy for one environment. Read-only.
    ///
    /// Units whose capacity is below the configured `report_min_capacity` are
    /// left out of the report.
    #[instrument(skip_all, fields(environment = %environment))]
    pub async fn unit_occupancy(
        &self,
        environment: Environment,
    ) -> AllocationResult<Vec<UnitStatusReport>> {
        let units = self.store.list_units(Some(environment)).await?;
        let mut reports = Vec::with_capacity(units.len());
        for unit in units
            .iter()
            .filter(|u| u.capacity_total >= self.report_min_capacity)
        {
            let occupied = self.store.occupancy(unit.id).await?;
            reports.push(UnitStatusReport::compute(unit, occupied));
        }
        Ok(reports)
    }

    pub async fn search_lots(&self, filter: &LotFilter) -> AllocationResult<Vec<Lot>> {
        Ok(self.store.search_lots(filter).await?)
    }

    /// Lots that expire on or before `date`, oldest lot first.
    pub async fn expiring_lots(&self, date: NaiveDate) -> AllocationResult<Vec<Lot>> {
        let filter = LotFilter {
            expiring_on_or_before: Some(date),
            ..LotFilter::default()
        };
        self.search_lots(&filter).await
    }
}

/// Commit on success, roll back on failure, and log the outcome.
async fn settle<T>(
    operation: &'static str,
    tx: Box<dyn StockTransaction>,
    outcome: AllocationResult<T>,
) -> AllocationResult<T> {
    match outcome {
        Ok(value) => {
            if let Err(err) = tx.commit().await {
                error!(operation, error = %err, "commit failed");
                return Err(err.into());
            }
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = tx.rollback().await {
                error!(operation, error = %rollback_err, "rollback failed");
            }
            if err.is_rejection() {
                warn!(operation, error = %err, "operation rejected");
            } else {
                error!(operation, error = %err, "operation failed");
            }
            Err(err)
        }
    }
}

async fn register_in(
    tx: &mut dyn StockTransaction,
    draft: &LotDraft,
    unit_id: StorageUnitId,
) -> AllocationResult<Confirmation> {
    let unit = tx
        .lock_unit(unit_id)
        .await?
        .ok_or_else(|| unit_not_found(unit_id))?;
    let occupied = tx.occupancy(unit_id).await?;
    let candidates = tx.get_lots(&draft.merge_key(unit_id).to_filter()).await?;

    let plan = plan_register(draft, &unit, occupied, &candidates)?;
    let inserted = apply_mutations(tx, std::slice::from_ref(&plan.mutation)).await?;
    refresh_status(tx, unit_id).await?;

    let lot_id = plan
        .merged_into
        .or_else(|| inserted.first().copied())
        .ok_or_else(|| AllocationError::StoreFailure("registration produced no lot".to_string()))?;

    Ok(Confirmation::Registered {
        lot_id,
        unit_id,
        quantity: draft.quantity,
        merged: plan.merged_into.is_some(),
    })
}

async fn transfer_in(
    tx: &mut dyn StockTransaction,
    intent: &TransferIntent,
) -> AllocationResult<Confirmation> {
    // Lock in ascending id order so opposing transfers cannot deadlock.
    let (low, high) = if intent.source < intent.destination {
        (intent.source, intent.destination)
    } else {
        (intent.destination, intent.source)
    };
    let low_unit = tx.lock_unit(low).await?.ok_or_else(|| unit_not_found(low))?;
    let high_unit = tx.lock_unit(high).await?.ok_or_else(|| unit_not_found(high))?;
    let destination = if low_unit.id == intent.destination {
        low_unit
    } else {
        high_unit
    };

    let source_lots = tx
        .get_lots(&LotFilter::flavor_in_unit(&intent.flavor, intent.source))
        .await?;
    let destination_occupied = tx.occupancy(intent.destination).await?;
    let destination_lots = tx
        .get_lots(&LotFilter::flavor_in_unit(&intent.flavor, intent.destination))
        .await?;

    let mutations = plan_transfer(
        intent,
        &source_lots,
        &destination,
        destination_occupied,
        &destination_lots,
    )?;
    apply_mutations(tx, &mutations).await?;
    refresh_status(tx, intent.source).await?;
    refresh_status(tx, intent.destination).await?;

    Ok(Confirmation::Transferred {
        flavor: intent.flavor.clone(),
        quantity: intent.quantity,
        source: intent.source,
        destination: intent.destination,
    })
}

async fn sell_in(
    tx: &mut dyn StockTransaction,
    lot_id: LotId,
    quantity: i64,
) -> AllocationResult<SaleReceipt> {
    let owner = tx
        .get_lot(lot_id)
        .await?
        .ok_or_else(|| lot_not_found(lot_id))?
        .unit_id;
    tx.lock_unit(owner)
        .await?
        .ok_or_else(|| unit_not_found(owner))?;

    // Re-read under the unit lock: every lot writer holds it.
    let lot = tx
        .get_lot(lot_id)
        .await?
        .filter(|lot| lot.unit_id == owner)
        .ok_or_else(|| lot_not_found(lot_id))?;

    let mutation = plan_sale(&lot, quantity)?;
    apply_mutations(tx, std::slice::from_ref(&mutation)).await?;
    refresh_status(tx, owner).await?;

    let receipt = SaleReceipt {
        receipt_id: ReceiptId::new(),
        lot_id,
        product: lot.product.clone(),
        flavor: lot.flavor.clone(),
        quantity,
        unit_price: lot.sale_price,
        total: lot.sale_price.times(quantity)?,
        sold_at: Utc::now(),
    };
    tx.record_ledger_entry(&receipt.revenue_entry()).await?;
    Ok(receipt)
}

async fn remove_unit_in(
    tx: &mut dyn StockTransaction,
    unit_id: StorageUnitId,
) -> AllocationResult<u64> {
    tx.lock_unit(unit_id)
        .await?
        .ok_or_else(|| unit_not_found(unit_id))?;
    Ok(tx.delete_unit(unit_id).await?)
}

/// Apply mutations in order. Returns the ids of inserted lots.
async fn apply_mutations(
    tx: &mut dyn StockTransaction,
    mutations: &[LotMutation],
) -> Result<Vec<LotId>, StoreError> {
    let mut inserted = Vec::new();
    for mutation in mutations {
        match mutation {
            LotMutation::Insert(lot) => inserted.push(tx.insert_lot(lot).await?),
            LotMutation::SetQuantity { lot_id, quantity } => {
                tx.update_lot_quantity(*lot_id, *quantity).await?
            }
            LotMutation::Delete { lot_id } => tx.delete_lot(*lot_id).await?,
        }
    }
    Ok(inserted)
}

/// Recompute a unit's derived status from its current occupancy.
async fn refresh_status(
    tx: &mut dyn StockTransaction,
    unit_id: StorageUnitId,
) -> AllocationResult<UnitStatus> {
    let unit = tx
        .lock_unit(unit_id)
        .await?
        .ok_or_else(|| unit_not_found(unit_id))?;
    let occupied = tx.occupancy(unit_id).await?;
    let status = UnitStatus::for_occupancy(occupied, unit.capacity_total);
    if status != unit.status {
        tx.set_unit_status(unit_id, status).await?;
    }
    Ok(status)
}

fn unit_not_found(unit_id: StorageUnitId) -> AllocationError {
    AllocationError::not_found(format!("storage unit {unit_id}"))
}

fn lot_not_found(lot_id: LotId) -> AllocationError {
    AllocationError::not_found(format!("lot {lot_id}"))
}
