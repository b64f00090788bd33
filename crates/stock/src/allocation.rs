//! Capacity-checked allocation planning.
//!
//! Every function here is pure: it receives the current state of the involved
//! units and lots and either rejects the request or returns the list of
//! `LotMutation`s that implement it. Nothing is mutated until the caller
//! applies the plan inside a store transaction.

use serde::{Deserialize, Serialize};

use coldstock_core::{LotId, StorageUnitId};

use crate::error::{AllocationError, AllocationResult};
use crate::lot::{Lot, LotDraft, NewLot};
use crate::unit::StorageUnit;

/// A single change to the lot ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LotMutation {
    Insert(NewLot),
    SetQuantity { lot_id: LotId, quantity: i64 },
    Delete { lot_id: LotId },
}

/// A request to move `quantity` units of `flavor` between two units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferIntent {
    pub flavor: String,
    pub quantity: i64,
    pub source: StorageUnitId,
    pub destination: StorageUnitId,
}

impl TransferIntent {
    pub fn validate(&self) -> AllocationResult<()> {
        if self.flavor.trim().is_empty() {
            return Err(AllocationError::validation("flavor cannot be empty"));
        }
        if self.quantity <= 0 {
            return Err(AllocationError::validation("quantity must be positive"));
        }
        if self.source == self.destination {
            return Err(AllocationError::validation(
                "source and destination must be different units",
            ));
        }
        Ok(())
    }
}

/// Result of planning a registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterPlan {
    pub mutation: LotMutation,
    /// The existing lot the quantity merges into, if any.
    pub merged_into: Option<LotId>,
}

/// Success confirmation returned to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Confirmation {
    Registered {
        lot_id: LotId,
        unit_id: StorageUnitId,
        quantity: i64,
        merged: bool,
    },
    Transferred {
        flavor: String,
        quantity: i64,
        source: StorageUnitId,
        destination: StorageUnitId,
    },
}

impl core::fmt::Display for Confirmation {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Confirmation::Registered {
                lot_id,
                unit_id,
                quantity,
                merged: true,
            } => write!(f, "added {quantity} units to lot {lot_id} in unit {unit_id}"),
            Confirmation::Registered {
                lot_id,
                unit_id,
                quantity,
                merged: false,
            } => write!(f, "registered lot {lot_id} with {quantity} units in unit {unit_id}"),
            Confirmation::Transferred {
                flavor,
                quantity,
                source,
                destination,
            } => write!(
                f,
                "transferred {quantity} units of {flavor} from unit {source} to unit {destination}"
            ),
        }
    }
}

/// Free space left in a unit. Never negative.
pub fn available_space(capacity_total: i64, occupied: i64) -> i64 {
    (capacity_total - occupied).max(0)
}

/// Plan the placement of `draft` into `unit`.
///
/// `candidates` are lots already in the unit that may share the draft's merge
/// key; lots with a different key are ignored, so callers may pass a broader set.
pub fn plan_register(
    draft: &LotDraft,
    unit: &StorageUnit,
    occupied: i64,
    candidates: &[Lot],
) -> AllocationResult<RegisterPlan> {
    draft.validate()?;

    let available = available_space(unit.capacity_total, occupied);
    if draft.quantity > available {
        return Err(AllocationError::CapacityExceeded { available });
    }

    let key = draft.merge_key(unit.id);
    let existing = candidates
        .iter()
        .filter(|lot| lot.merge_key() == key)
        .min_by_key(|lot| lot.id);

    match existing {
        Some(lot) => Ok(RegisterPlan {
            mutation: LotMutation::SetQuantity {
                lot_id: lot.id,
                quantity: checked_quantity(lot.quantity, draft.quantity)?,
            },
            merged_into: Some(lot.id),
        }),
        None => Ok(RegisterPlan {
            mutation: LotMutation::Insert(draft.clone().into_new_lot(unit.id)),
            merged_into: None,
        }),
    }
}

/// Plan a transfer.
///
/// Mutations are returned destination side first, then the FIFO depletion of
/// the source lots (oldest lot id first).
pub fn plan_transfer(
    intent: &TransferIntent,
    source_lots: &[Lot],
    destination: &StorageUnit,
    destination_occupied: i64,
    destination_lots: &[Lot],
) -> AllocationResult<Vec<LotMutation>> {
    intent.validate()?;
    if destination.id != intent.destination {
        return Err(AllocationError::validation(format!(
            "destination unit mismatch: expected {}, got {}",
            intent.destination, destination.id
        )));
    }

    let mut ordered: Vec<&Lot> = source_lots
        .iter()
        .filter(|lot| lot.unit_id == intent.source && lot.flavor == intent.flavor)
        .collect();
    ordered.sort_by_key(|lot| lot.id);

    let Some(first) = ordered.first() else {
        return Err(AllocationError::not_found(format!(
            "no lots of '{}' in unit {}",
            intent.flavor, intent.source
        )));
    };

    let held: i64 = ordered.iter().map(|lot| lot.quantity).sum();
    if held < intent.quantity {
        return Err(AllocationError::InsufficientStock { available: held });
    }

    let free = available_space(destination.capacity_total, destination_occupied);
    if intent.quantity > free {
        return Err(AllocationError::CapacityExceeded { available: free });
    }

    let mut mutations = Vec::with_capacity(ordered.len() + 1);

    let receiving = destination_lots
        .iter()
        .filter(|lot| lot.unit_id == destination.id && lot.flavor == intent.flavor)
        .min_by_key(|lot| lot.id);
    match receiving {
        Some(lot) => mutations.push(LotMutation::SetQuantity {
            lot_id: lot.id,
            quantity: checked_quantity(lot.quantity, intent.quantity)?,
        }),
        None => mutations.push(LotMutation::Insert(NewLot {
            product: first.product.clone(),
            flavor: first.flavor.clone(),
            purchase_price: first.purchase_price,
            sale_price: first.sale_price,
            quantity: intent.quantity,
            expires_on: first.expires_on,
            unit_id: destination.id,
            barcode: first.barcode.clone(),
        })),
    }

    let mut remaining = intent.quantity;
    for lot in ordered {
        if remaining == 0 {
            break;
        }
        if lot.quantity > remaining {
            mutations.push(LotMutation::SetQuantity {
                lot_id: lot.id,
                quantity: lot.quantity - remaining,
            });
            remaining = 0;
        } else {
            mutations.push(LotMutation::Delete { lot_id: lot.id });
            remaining -= lot.quantity;
        }
    }

    Ok(mutations)
}

/// Plan the sale of `quantity` units out of `lot`. The row is kept even at zero.
pub fn plan_sale(lot: &Lot, quantity: i64) -> AllocationResult<LotMutation> {
    if quantity <= 0 {
        return Err(AllocationError::validation("quantity must be positive"));
    }
    if quantity > lot.quantity {
        return Err(AllocationError::InsufficientStock {
            available: lot.quantity,
        });
    }
    Ok(LotMutation::SetQuantity {
        lot_id: lot.id,
        quantity: lot.quantity - quantity,
    })
}

fn checked_quantity(current: i64, added: i64) -> AllocationResult<i64> {
    current
        .checked_add(added)
        .ok_or_else(|| AllocationError::validation("lot quantity overflow"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::unit::{Environment, UnitStatus};
    use coldstock_core::Money;
    use proptest::prelude::*;

    const A: StorageUnitId = StorageUnitId::new(1);
    const B: StorageUnitId = StorageUnitId::new(2);

    fn unit(id: StorageUnitId, capacity_total: i64) -> StorageUnit {
        StorageUnit {
            id,
            name: format!("freezer {id}"),
            capacity_total,
            environment: Environment::ClosedStock,
            kwh_per_day: None,
            status: UnitStatus::Available,
        }
    }

    fn lot(id: i64, unit_id: StorageUnitId, flavor: &str, quantity: i64) -> Lot {
        Lot {
            id: LotId::new(id),
            product: "popsicle".to_string(),
            flavor: flavor.to_string(),
            purchase_price: Money::from_minor(150),
            sale_price: Money::from_minor(400),
            quantity,
            expires_on: None,
            unit_id,
            barcode: None,
        }
    }

    fn draft(flavor: &str, quantity: i64) -> LotDraft {
        LotDraft {
            product: "popsicle".to_string(),
            flavor: flavor.to_string(),
            purchase_price: Money::from_minor(150),
            sale_price: Money::from_minor(400),
            quantity,
            expires_on: None,
            barcode: None,
        }
    }

    fn transfer(flavor: &str, quantity: i64) -> TransferIntent {
        TransferIntent {
            flavor: flavor.to_string(),
            quantity,
            source: A,
            destination: B,
        }
    }

    #[test]
    fn register_into_empty_unit_inserts() {
        let plan = plan_register(&draft("chocolate", 10), &unit(A, 10), 0, &[]).unwrap();
        assert_eq!(plan.merged_into, None);
        assert!(matches!(plan.mutation, LotMutation::Insert(ref l) if l.quantity == 10 && l.unit_id == A));
    }

    #[test]
    fn register_into_full_unit_reports_zero_available() {
        let err = plan_register(&draft("chocolate", 1), &unit(A, 10), 10, &[]).unwrap_err();
        assert_eq!(err, AllocationError::CapacityExceeded { available: 0 });
    }

    #[test]
    fn register_merges_into_matching_lot_only() {
        let mut barcoded = lot(1, A, "chocolate", 3);
        barcoded.barcode = Some("789".to_string());
        let plain = lot(2, A, "chocolate", 4);

        let plan =
            plan_register(&draft("chocolate", 2), &unit(A, 20), 7, &[barcoded, plain]).unwrap();
        assert_eq!(plan.merged_into, Some(LotId::new(2)));
        assert_eq!(
            plan.mutation,
            LotMutation::SetQuantity {
                lot_id: LotId::new(2),
                quantity: 6
            }
        );
    }

    #[test]
    fn transfer_depletes_oldest_lots_first() {
        let source = vec![lot(2, A, "chocolate", 5), lot(1, A, "chocolate", 5)];
        let mutations = plan_transfer(&transfer("chocolate", 7), &source, &unit(B, 20), 0, &[]).unwrap();

        assert_eq!(mutations.len(), 3);
        assert!(matches!(mutations[0], LotMutation::Insert(ref l) if l.quantity == 7 && l.unit_id == B));
        assert_eq!(mutations[1], LotMutation::Delete { lot_id: LotId::new(1) });
        assert_eq!(
            mutations[2],
            LotMutation::SetQuantity {
                lot_id: LotId::new(2),
                quantity: 3
            }
        );
    }

    #[test]
    fn transfer_merges_into_existing_destination_lot() {
        let source = vec![lot(1, A, "mint", 10)];
        let dest_lots = vec![lot(5, B, "mint", 2)];
        let mutations =
            plan_transfer(&transfer("mint", 4), &source, &unit(B, 10), 2, &dest_lots).unwrap();
        assert_eq!(
            mutations,
            vec![
                LotMutation::SetQuantity {
                    lot_id: LotId::new(5),
                    quantity: 6
                },
                LotMutation::SetQuantity {
                    lot_id: LotId::new(1),
                    quantity: 6
                },
            ]
        );
    }

    #[test]
    fn transfer_exactly_draining_a_lot_deletes_it() {
        let source = vec![lot(1, A, "mint", 4), lot(2, A, "mint", 4)];
        let mutations = plan_transfer(&transfer("mint", 4), &source, &unit(B, 10), 0, &[]).unwrap();
        assert_eq!(mutations.len(), 2);
        assert_eq!(mutations[1], LotMutation::Delete { lot_id: LotId::new(1) });
    }

    #[test]
    fn transfer_rejections_carry_available_amounts() {
        let source = vec![lot(1, A, "mint", 3)];

        let err = plan_transfer(&transfer("mint", 5), &source, &unit(B, 10), 0, &[]).unwrap_err();
        assert_eq!(err, AllocationError::InsufficientStock { available: 3 });

        let err = plan_transfer(&transfer("mint", 3), &source, &unit(B, 10), 8, &[]).unwrap_err();
        assert_eq!(err, AllocationError::CapacityExceeded { available: 2 });

        let err = plan_transfer(&transfer("grape", 1), &source, &unit(B, 10), 0, &[]).unwrap_err();
        assert!(matches!(err, AllocationError::NotFound(_)));
    }

    #[test]
    fn transfer_to_same_unit_is_invalid() {
        let mut intent = transfer("mint", 1);
        intent.destination = A;
        let err = plan_transfer(&intent, &[lot(1, A, "mint", 3)], &unit(A, 10), 3, &[]).unwrap_err();
        assert!(matches!(err, AllocationError::Validation(_)));
    }

    #[test]
    fn sale_keeps_row_at_zero() {
        let l = lot(1, A, "mint", 3);
        assert_eq!(
            plan_sale(&l, 3).unwrap(),
            LotMutation::SetQuantity {
                lot_id: LotId::new(1),
                quantity: 0
            }
        );
        assert_eq!(
            plan_sale(&l, 4).unwrap_err(),
            AllocationError::InsufficientStock { available: 3 }
        );
    }

    #[test]
    fn confirmation_message_names_both_units() {
        let c = Confirmation::Transferred {
            flavor: "chocolate".to_string(),
            quantity: 5,
            source: A,
            destination: B,
        };
        assert_eq!(
            c.to_string(),
            "transferred 5 units of chocolate from unit 1 to unit 2"
        );
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Applying a transfer plan moves exactly `quantity` units and removes
        /// only the oldest lots.
        #[test]
        fn transfer_plan_conserves_quantity(
            sizes in prop::collection::vec(1i64..20, 1..8),
            pick in 1i64..200,
        ) {
            let source: Vec<Lot> = sizes
                .iter()
                .enumerate()
                .map(|(i, q)| lot(i as i64 + 1, A, "vanilla", *q))
                .collect();
            let held: i64 = sizes.iter().sum();
            let quantity = 1 + (pick - 1) % held;

            let mutations = plan_transfer(
                &transfer("vanilla", quantity),
                &source,
                &unit(B, 1_000),
                0,
                &[],
            ).unwrap();

            let mut moved_in = 0;
            let mut removed = 0;
            let mut deleted = Vec::new();
            for m in &mutations {
                match m {
                    LotMutation::Insert(l) => moved_in += l.quantity,
                    LotMutation::SetQuantity { lot_id, quantity } => {
                        let before = source.iter().find(|l| l.id == *lot_id).unwrap().quantity;
                        removed += before - quantity;
                    }
                    LotMutation::Delete { lot_id } => {
                        removed += source.iter().find(|l| l.id == *lot_id).unwrap().quantity;
                        deleted.push(lot_id.get());
                    }
                }
            }

            prop_assert_eq!(moved_in, quantity);
            prop_assert_eq!(removed, quantity);
            let expected: Vec<i64> = (1..=deleted.len() as i64).collect();
            prop_assert_eq!(deleted, expected);
        }

        /// A successful registration never pushes occupancy past capacity.
        #[test]
        fn register_respects_capacity(
            capacity in 1i64..100,
            occupied_seed in 0i64..100,
            quantity in 1i64..150,
        ) {
            let occupied = occupied_seed % (capacity + 1);
            match plan_register(&draft("lemon", quantity), &unit(A, capacity), occupied, &[]) {
                Ok(_) => prop_assert!(occupied + quantity <= capacity),
                Err(AllocationError::CapacityExceeded { available }) => {
                    prop_assert_eq!(available, capacity - occupied);
                    prop_assert!(quantity > available);
                }
                Err(other) => prop_assert!(false, "unexpected error {:?}", other),
            }
        }
    }
}
