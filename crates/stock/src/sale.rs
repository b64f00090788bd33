//! Sale receipts and the ledger entries they produce.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use coldstock_core::{LedgerEntryId, LotId, Money, ReceiptId};

/// Side of the simple revenue/expense ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LedgerKind {
    Revenue,
    Expense,
}

impl LedgerKind {
    pub fn as_str(self) -> &'static str {
        match self {
            LedgerKind::Revenue => "revenue",
            LedgerKind::Expense => "expense",
        }
    }
}

/// One ledger line. Amounts are always positive; `kind` carries the sign.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: LedgerEntryId,
    pub kind: LedgerKind,
    pub amount: Money,
    pub description: String,
    pub recorded_at: DateTime<Utc>,
}

/// Outcome of a successful sale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleReceipt {
    pub receipt_id: ReceiptId,
    pub lot_id: LotId,
    pub product: String,
    pub flavor: String,
    pub quantity: i64,
    pub unit_price: Money,
    pub total: Money,
    pub sold_at: DateTime<Utc>,
}

impl SaleReceipt {
    /// The revenue entry recorded alongside this sale.
    pub fn revenue_entry(&self) -> LedgerEntry {
        LedgerEntry {
            id: LedgerEntryId::new(),
            kind: LedgerKind::Revenue,
            amount: self.total,
            description: format!(
                "sale {}: {} x {} {}",
                self.receipt_id, self.quantity, self.product, self.flavor
            ),
            recorded_at: self.sold_at,
        }
    }
}
