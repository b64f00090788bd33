//! Stock domain module: storage units, lots and allocation planning.
//!
//! This crate contains the business rules for placing, moving and selling
//! stock, implemented purely as deterministic domain logic (no IO, no storage).
//! Planning functions inspect a snapshot of units and lots and return the
//! `LotMutation`s an operation needs; the infrastructure layer applies them
//! inside a single store transaction.

pub mod allocation;
pub mod error;
pub mod lot;
pub mod sale;
pub mod unit;

pub use allocation::{
    available_space, plan_register, plan_sale, plan_transfer, Confirmation, LotMutation,
    RegisterPlan, TransferIntent,
};
pub use error::{AllocationError, AllocationResult};
pub use lot::{Lot, LotDraft, LotFilter, MergeKey, NewLot};
pub use sale::{LedgerEntry, LedgerKind, SaleReceipt};
pub use unit::{Environment, NewStorageUnit, StorageUnit, UnitStatus, UnitStatusReport};
