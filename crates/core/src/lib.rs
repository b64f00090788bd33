//! `coldstock-core`: shared domain building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns):
//! identifiers, money, and the workspace-wide domain error.

pub mod error;
pub mod id;
pub mod money;

pub use error::{DomainError, DomainResult};
pub use id::{LedgerEntryId, LotId, ReceiptId, StorageUnitId};
pub use money::Money;
