//! Money value object.

use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};

/// An amount in minor currency units (e.g. cents).
///
/// Prices are stored as integers so that totals are exact. Rendering with a
/// currency symbol or locale is left to callers.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(i64);

impl Money {
    pub const ZERO: Money = Money(0);

    pub const fn from_minor(minor: i64) -> Self {
        Self(minor)
    }

    pub const fn minor(self) -> i64 {
        self.0
    }

    pub fn is_negative(self) -> bool {
        self.0 < 0
    }

    /// Price of `quantity` units at `self` per unit.
    pub fn times(self, quantity: i64) -> DomainResult<Money> {
        self.0
            .checked_mul(quantity)
            .map(Money)
            .ok_or_else(|| DomainError::overflow(format!("{} x {}", self.0, quantity)))
    }

    pub fn checked_add(self, other: Money) -> DomainResult<Money> {
        self.0
            .checked_add(other.0)
            .map(Money)
            .ok_or_else(|| DomainError::overflow(format!("{} + {}", self.0, other.0)))
    }
}

impl core::fmt::Display for Money {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{sign}{}.{:02}", abs / 100, abs % 100)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn display_uses_two_decimal_places() {
        assert_eq!(Money::from_minor(350).to_string(), "3.50");
        assert_eq!(Money::from_minor(7).to_string(), "0.07");
        assert_eq!(Money::from_minor(-1205).to_string(), "-12.05");
    }

    #[test]
    fn times_reports_overflow() {
        let err = Money::from_minor(i64::MAX).times(2).unwrap_err();
        assert!(matches!(err, DomainError::Overflow(_)));
    }

    proptest! {
        #[test]
        fn times_matches_repeated_addition(price in 0i64..10_000, qty in 0i64..50) {
            let mut total = Money::ZERO;
            for _ in 0..qty {
                total = total.checked_add(Money::from_minor(price)).unwrap();
            }
            prop_assert_eq!(Money::from_minor(price).times(qty).unwrap(), total);
        }
    }
}
