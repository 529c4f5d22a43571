pub mod cli;
pub mod config;
pub mod model;
pub mod warehouse;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use model::{CandidateConfig, ColumnEncoding, CompressionType, RelationSize, TableRef};
pub use warehouse::{Warehouse, WarehouseError, WarehouseSession};
