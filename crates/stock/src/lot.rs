use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use coldstock_core::{DomainError, LotId, Money, StorageUnitId};

/// A quantity of one product/flavor held in one storage unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lot {
    pub id: LotId,
    pub product: String,
    pub flavor: String,
    pub purchase_price: Money,
    pub sale_price: Money,
    pub quantity: i64,
    pub expires_on: Option<NaiveDate>,
    pub unit_id: StorageUnitId,
    pub barcode: Option<String>,
}

impl Lot {
    pub fn merge_key(&self) -> MergeKey {
        MergeKey {
            product: self.product.clone(),
            flavor: self.flavor.clone(),
            unit_id: self.unit_id,
            barcode: self.barcode.clone(),
        }
    }
}

/// Identity used to decide whether a registration merges into an existing lot.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MergeKey {
    pub product: String,
    pub flavor: String,
    pub unit_id: StorageUnitId,
    pub barcode: Option<String>,
}

impl MergeKey {
    pub fn to_filter(&self) -> LotFilter {
        LotFilter {
            unit_id: Some(self.unit_id),
            product: Some(self.product.clone()),
            flavor: Some(self.flavor.clone()),
            barcode: Some(self.barcode.clone()),
            expiring_on_or_before: None,
        }
    }
}

/// Candidate lot fields supplied when registering incoming stock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LotDraft {
    pub product: String,
    pub flavor: String,
    pub purchase_price: Money,
    pub sale_price: Money,
    pub quantity: i64,
    pub expires_on: Option<NaiveDate>,
    pub barcode: Option<String>,
}

impl LotDraft {
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.product.trim().is_empty() {
            return Err(DomainError::validation("product cannot be empty"));
        }
        if self.flavor.trim().is_empty() {
            return Err(DomainError::validation("flavor cannot be empty"));
        }
        if self.quantity <= 0 {
            return Err(DomainError::validation("quantity must be positive"));
        }
        if self.purchase_price.is_negative() || self.sale_price.is_negative() {
            return Err(DomainError::validation("prices cannot be negative"));
        }
        if matches!(&self.barcode, Some(code) if code.trim().is_empty()) {
            return Err(DomainError::validation("barcode cannot be blank when present"));
        }
        Ok(())
    }

    pub fn merge_key(&self, unit_id: StorageUnitId) -> MergeKey {
        MergeKey {
            product: self.product.clone(),
            flavor: self.flavor.clone(),
            unit_id,
            barcode: self.barcode.clone(),
        }
    }

    pub fn into_new_lot(self, unit_id: StorageUnitId) -> NewLot {
        NewLot {
            product: self.product,
            flavor: self.flavor,
            purchase_price: self.purchase_price,
            sale_price: self.sale_price,
            quantity: self.quantity,
            expires_on: self.expires_on,
            unit_id,
            barcode: self.barcode,
        }
    }
}

/// A lot row that has not been assigned an identifier yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewLot {
    pub product: String,
    pub flavor: String,
    pub purchase_price: Money,
    pub sale_price: Money,
    pub quantity: i64,
    pub expires_on: Option<NaiveDate>,
    pub unit_id: StorageUnitId,
    pub barcode: Option<String>,
}

impl NewLot {
    pub fn with_id(self, id: LotId) -> Lot {
        Lot {
            id,
            product: self.product,
            flavor: self.flavor,
            purchase_price: self.purchase_price,
            sale_price: self.sale_price,
            quantity: self.quantity,
            expires_on: self.expires_on,
            unit_id: self.unit_id,
            barcode: self.barcode,
        }
    }
}

/// Conjunctive lot query. `None` fields match anything.
///
/// `barcode` is doubly optional: `Some(None)` matches lots *without* a barcode,
/// which is what merge lookups need.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LotFilter {
    pub unit_id: Option<StorageUnitId>,
    pub product: Option<String>,
    pub flavor: Option<String>,
    pub barcode: Option<Option<String>>,
    pub expiring_on_or_before: Option<NaiveDate>,
}

impl LotFilter {
    pub fn in_unit(unit_id: StorageUnitId) -> Self {
        Self {
            unit_id: Some(unit_id),
            ..Self::default()
        }
    }

    pub fn flavor_in_unit(flavor: impl Into<String>, unit_id: StorageUnitId) -> Self {
        Self {
            unit_id: Some(unit_id),
            flavor: Some(flavor.into()),
            ..Self::default()
        }
    }

    pub fn matches(&self, lot: &Lot) -> bool {
        if matches!(self.unit_id, Some(u) if u != lot.unit_id) {
            return false;
        }
        if matches!(&self.product, Some(p) if *p != lot.product) {
            return false;
        }
        if matches!(&self.flavor, Some(f) if *f != lot.flavor) {
            return false;
        }
        if matches!(&self.barcode, Some(b) if *b != lot.barcode) {
            return false;
        }
        if let Some(cutoff) = self.expiring_on_or_before {
            match lot.expires_on {
                Some(date) if date <= cutoff => {}
                _ => return false,
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lot(id: i64, flavor: &str, barcode: Option<&str>) -> Lot {
        Lot {
            id: LotId::new(id),
            product: "popsicle".to_string(),
            flavor: flavor.to_string(),
            purchase_price: Money::from_minor(150),
            sale_price: Money::from_minor(400),
            quantity: 5,
            expires_on: NaiveDate::from_ymd_opt(2026, 12, 1),
            unit_id: StorageUnitId::new(1),
            barcode: barcode.map(str::to_string),
        }
    }

    #[test]
    fn merge_key_filter_distinguishes_missing_barcode() {
        let key = lot(1, "lemon", None).merge_key();
        let filter = key.to_filter();
        assert!(filter.matches(&lot(1, "lemon", None)));
        assert!(!filter.matches(&lot(2, "lemon", Some("789100"))));
        assert!(!filter.matches(&lot(3, "grape", None)));
    }

    #[test]
    fn expiry_filter_skips_lots_without_date() {
        let filter = LotFilter {
            expiring_on_or_before: NaiveDate::from_ymd_opt(2026, 12, 31),
            ..LotFilter::default()
        };
        let mut undated = lot(1, "lemon", None);
        undated.expires_on = None;
        assert!(!filter.matches(&undated));
        assert!(filter.matches(&lot(2, "lemon", None)));
    }

    #[test]
    fn draft_validation() {
        let mut draft = LotDraft {
            product: "popsicle".to_string(),
            flavor: "lemon".to_string(),
            purchase_price: Money::from_minor(150),
            sale_price: Money::from_minor(400),
            quantity: 1,
            expires_on: None,
            barcode: None,
        };
        assert!(draft.validate().is_ok());

        draft.quantity = 0;
        assert!(draft.validate().is_err());

        draft.quantity = 1;
        draft.flavor = "  ".to_string();
        assert!(draft.validate().is_err());
    }
}
