//! Test utilities for cwizard.
//!
//! Only available when the `testing` feature is enabled or during tests:
//!
//! ```toml
//! [dev-dependencies]
//! common = { path = "../common", features = ["testing"] }
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use common::testing::InMemoryWarehouse;
//!
//! let warehouse = InMemoryWarehouse::new()
//!     .with_table("public", "events", &["id", "payload"])
//!     .with_size("payload", "ZLIB_9", 900);
//! ```

mod memory;

pub use memory::{InMemorySession, InMemoryWarehouse, WarehouseStats};
