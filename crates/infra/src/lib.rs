//! Infrastructure layer: stores, configuration and the allocation pipeline.

pub mod allocator;
pub mod config;
pub mod store;


pub use allocator::StockAllocator;
pub use config::{ConfigError, StockConfig};
pub use store::{InMemoryStockStore, PostgresStockStore, StockStore, StockTransaction, StoreError};
