//! Configuration loading and representation.
//!
//! All settings come from environment variables; `StockConfig::default()` gives
//! the values used when a variable is absent.

use thiserror::Error;

use coldstock_observability::LogFormat;

pub const DATABASE_URL: &str = "DATABASE_URL";
pub const DB_MAX_CONNECTIONS: &str = "COLDSTOCK_DB_MAX_CONNECTIONS";
pub const REPORT_MIN_CAPACITY: &str = "COLDSTOCK_REPORT_MIN_CAPACITY";
pub const LOG_FORMAT: &str = "COLDSTOCK_LOG_FORMAT";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{key} is not a valid {expected}: '{value}'")]
    Invalid {
        key: &'static str,
        expected: &'static str,
        value: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct StockConfig {
    /// Postgres connection string. Only the Postgres store needs it.
    pub database_url: Option<String>,
    pub db_max_connections: u32,
    /// Units with a smaller capacity are left out of occupancy reports.
    pub report_min_capacity: i64,
    pub log_format: LogFormat,
}

impl Default for StockConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            db_max_connections: 5,
            report_min_capacity: 2,
            log_format: LogFormat::Json,
        }
    }
}

impl StockConfig {
    /// Read configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read configuration through `lookup` (injectable for tests).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let value = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let db_max_connections = match value(DB_MAX_CONNECTIONS) {
            Some(raw) => raw
                .trim()
                .parse::<u32>()
                .ok()
                .filter(|n| *n > 0)
                .ok_or(ConfigError::Invalid {
                    key: DB_MAX_CONNECTIONS,
                    expected: "positive integer",
                    value: raw,
                })?,
            None => defaults.db_max_connections,
        };

        let report_min_capacity = match value(REPORT_MIN_CAPACITY) {
            Some(raw) => raw.trim().parse::<i64>().map_err(|_| ConfigError::Invalid {
                key: REPORT_MIN_CAPACITY,
                expected: "integer",
                value: raw.clone(),
            })?,
            None => defaults.report_min_capacity,
        };

        let log_format = match value(LOG_FORMAT) {
            Some(raw) => raw.parse::<LogFormat>().map_err(|_| ConfigError::Invalid {
                key: LOG_FORMAT,
                expected: "log format (json | pretty)",
                value: raw.clone(),
            })?,
            None => defaults.log_format,
        };

        Ok(Self {
            database_url: value(DATABASE_URL),
            db_max_connections,
            report_min_capacity,
            log_format,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn missing_variables_fall_back_to_defaults() {
        let config = StockConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, StockConfig::default());
    }

    #[test]
    fn reads_all_variables() {
        let config = StockConfig::from_lookup(lookup(&[
            (DATABASE_URL, "postgres://localhost/coldstock"),
            (DB_MAX_CONNECTIONS, "12"),
            (REPORT_MIN_CAPACITY, "1"),
            (LOG_FORMAT, "pretty"),
        ]))
        .unwrap();

        assert_eq!(config.database_url.as_deref(), Some("postgres://localhost/coldstock"));
        assert_eq!(config.db_max_connections, 12);
        assert_eq!(config.report_min_capacity, 1);
        assert_eq!(config.log_format, LogFormat::Pretty);
    }

    #[test]
    fn rejects_zero_connections() {
        let err = StockConfig::from_lookup(lookup(&[(DB_MAX_CONNECTIONS, "0")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: DB_MAX_CONNECTIONS, .. }));
    }
}
