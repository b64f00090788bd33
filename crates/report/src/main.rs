//! Prints per-unit occupancy as JSON, one report per environment.
//!
//! Usage: `coldstock-report [environment...]` where each environment is one
//! of `open_stock`, `closed_stock` or `store`. With no arguments every
//! environment is reported.

use anyhow::Context;
use serde::Serialize;

use coldstock_infra::{PostgresStockStore, StockAllocator, StockConfig};
use coldstock_stock::{Environment, UnitStatusReport};

#[derive(Debug, Serialize)]
struct EnvironmentReport {
    environment: Environment,
    units: Vec<UnitStatusReport>,
}

fn requested_environments(args: &[String]) -> anyhow::Result<Vec<Environment>> {
    if args.is_empty() {
        return Ok(Environment::ALL.to_vec());
    }
    args.iter()
        .map(|arg| {
            arg.parse::<Environment>()
                .with_context(|| format!("unknown environment '{arg}'"))
        })
        .collect()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = StockConfig::from_env().context("invalid configuration")?;
    coldstock_observability::init_with(config.log_format);

    let args: Vec<String> = std::env::args().skip(1).collect();
    let environments = requested_environments(&args)?;

    let store = PostgresStockStore::connect(&config)
        .await
        .context("failed to connect to the stock database")?;
    store.ensure_schema().await?;
    let allocator = StockAllocator::with_config(store, &config);

    let mut reports = Vec::with_capacity(environments.len());
    for environment in environments {
        let units = allocator.unit_occupancy(environment).await?;
        tracing::info!(%environment, units = units.len(), "occupancy computed");
        reports.push(EnvironmentReport { environment, units });
    }

    println!("{}", serde_json::to_string_pretty(&reports)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_arguments_reports_every_environment() {
        assert_eq!(requested_environments(&[]).unwrap(), Environment::ALL.to_vec());
    }

    #[test]
    fn parses_named_environments() {
        let args = vec!["store".to_string(), "open_stock".to_string()];
        assert_eq!(
            requested_environments(&args).unwrap(),
            vec![Environment::Store, Environment::OpenStock]
        );
        assert!(requested_environments(&["attic".to_string()]).is_err());
    }
}
