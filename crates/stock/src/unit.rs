use core::str::FromStr;

use serde::{Deserialize, Serialize};

use coldstock_core::{DomainError, StorageUnitId};

/// Logical grouping of storage units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Environment {
    OpenStock,
    ClosedStock,
    Store,
}

impl Environment {
    pub const ALL: [Environment; 3] = [
        Environment::OpenStock,
        Environment::ClosedStock,
        Environment::Store,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Environment::OpenStock => "open_stock",
            Environment::ClosedStock => "closed_stock",
            Environment::Store => "store",
        }
    }
}

impl core::fmt::Display for Environment {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "open_stock" => Ok(Environment::OpenStock),
            "closed_stock" => Ok(Environment::ClosedStock),
            "store" => Ok(Environment::Store),
            other => Err(DomainError::validation(format!(
                "environment must be one of: open_stock, closed_stock, store (got '{other}')"
            ))),
        }
    }
}

/// Derived fill status of a storage unit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitStatus {
    #[default]
    Available,
    Full,
}

impl UnitStatus {
    /// `Full` iff occupancy has reached capacity.
    pub fn for_occupancy(occupied: i64, capacity_total: i64) -> Self {
        if occupied >= capacity_total {
            UnitStatus::Full
        } else {
            UnitStatus::Available
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            UnitStatus::Available => "available",
            UnitStatus::Full => "full",
        }
    }
}

impl FromStr for UnitStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "available" => Ok(UnitStatus::Available),
            "full" => Ok(UnitStatus::Full),
            other => Err(DomainError::validation(format!("unknown unit status '{other}'"))),
        }
    }
}

/// A physical container with a fixed capacity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageUnit {
    pub id: StorageUnitId,
    pub name: String,
    /// Maximum number of product units the container may hold.
    pub capacity_total: i64,
    pub environment: Environment,
    /// Daily energy draw of the appliance, if metered.
    pub kwh_per_day: Option<f64>,
    pub status: UnitStatus,
}

/// Input for registering a storage unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewStorageUnit {
    pub name: String,
    pub capacity_total: i64,
    pub environment: Environment,
    pub kwh_per_day: Option<f64>,
}

impl NewStorageUnit {
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.name.trim().is_empty() {
            return Err(DomainError::validation("unit name cannot be empty"));
        }
        if self.capacity_total < 1 {
            return Err(DomainError::validation("capacity_total must be at least 1"));
        }
        if let Some(kwh) = self.kwh_per_day {
            if !kwh.is_finite() || kwh < 0.0 {
                return Err(DomainError::validation("kwh_per_day must be a non-negative number"));
            }
        }
        Ok(())
    }
}

/// Occupancy report row for one storage unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitStatusReport {
    pub unit_id: StorageUnitId,
    pub name: String,
    pub environment: Environment,
    pub capacity_total: i64,
    pub occupied: i64,
    pub available: i64,
    /// `occupied * 100 / capacity_total`, rounded to two decimals.
    pub percent_occupied: f64,
    pub status: UnitStatus,
}

impl UnitStatusReport {
    pub fn compute(unit: &StorageUnit, occupied: i64) -> Self {
        let percent = if unit.capacity_total > 0 {
            occupied as f64 * 100.0 / unit.capacity_total as f64
        } else {
            0.0
        };
        Self {
            unit_id: unit.id,
            name: unit.name.clone(),
            environment: unit.environment,
            capacity_total: unit.capacity_total,
            occupied,
            available: unit.capacity_total - occupied,
            percent_occupied: (percent * 100.0).round() / 100.0,
            status: UnitStatus::for_occupancy(occupied, unit.capacity_total),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn freezer(capacity_total: i64) -> StorageUnit {
        StorageUnit {
            id: StorageUnitId::new(1),
            name: "freezer 1".to_string(),
            capacity_total,
            environment: Environment::ClosedStock,
            kwh_per_day: Some(1.2),
            status: UnitStatus::default(),
        }
    }

    #[test]
    fn status_flips_to_full_at_capacity() {
        assert_eq!(UnitStatus::for_occupancy(9, 10), UnitStatus::Available);
        assert_eq!(UnitStatus::for_occupancy(10, 10), UnitStatus::Full);
        assert_eq!(UnitStatus::default(), UnitStatus::Available);
    }

    #[test]
    fn report_rounds_percentage_to_two_decimals() {
        let report = UnitStatusReport::compute(&freezer(3), 1);
        assert_eq!(report.percent_occupied, 33.33);
        assert_eq!(report.available, 2);
        assert_eq!(report.status, UnitStatus::Available);

        let report = UnitStatusReport::compute(&freezer(3), 2);
        assert_eq!(report.percent_occupied, 66.67);
    }

    #[test]
    fn environment_parses_its_own_labels() {
        for env in Environment::ALL {
            assert_eq!(env.as_str().parse::<Environment>().unwrap(), env);
        }
        assert!("garage".parse::<Environment>().is_err());
    }

    #[test]
    fn new_unit_requires_positive_capacity() {
        let unit = NewStorageUnit {
            name: "display".to_string(),
            capacity_total: 0,
            environment: Environment::Store,
            kwh_per_day: None,
        };
        assert!(matches!(unit.validate(), Err(DomainError::Validation(_))));
    }
}
