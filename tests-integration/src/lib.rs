/// Common test utilities and helpers for integration tests
use advisor::AdvisorSettings;
use common::TableRef;
use common::config::Configuration;
use common::testing::InMemoryWarehouse;
use std::io::Write;
use tempfile::NamedTempFile;

/// Schema of the table every scripted warehouse exposes
pub const SCHEMA: &str = "public";
/// Name of the table every scripted warehouse exposes
pub const TABLE: &str = "sales";

/// Columns of the scripted `public.sales` table, in ordinal order
pub const SALES_COLUMNS: [&str; 5] = ["id", "sold_at", "region", "amount", "note"];

/// Initialize test logging
pub fn init_test_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn sales_table() -> TableRef {
    TableRef::new(SCHEMA, TABLE)
}

/// `public.sales` with sizes scripted so that every column has a clear
/// winner under the standard weights and a 90% threshold:
///
/// - `id`: ZLIB/9 is smallest by a wide margin and wins outright
/// - `region`: RLE_TYPE/1 is within the threshold of RLE_TYPE/4 and cheaper
/// - `amount`: RLE_TYPE/3 is within the threshold of ZLIB/9 and wins on weight
pub fn sales_warehouse() -> InMemoryWarehouse {
    InMemoryWarehouse::new()
        .with_table(SCHEMA, TABLE, &SALES_COLUMNS)
        .with_size("id", "ZLIB_9", 1_000)
        .with_size("region", "RLE_TYPE_4", 1_000)
        .with_size("region", "RLE_TYPE_1", 1_050)
        .with_size("amount", "ZLIB_9", 900)
        .with_size("amount", "RLE_TYPE_3", 1_000)
        .with_size("amount", "ZLIB_1", 1_020)
}

/// Settings for `public.sales` with the given worker count.
pub fn settings(workers: usize) -> AdvisorSettings {
    let mut settings = AdvisorSettings::new(sales_table());
    settings.scheduler.workers = workers;
    settings.sample_rows = 1_000;
    settings
}

/// Write `contents` to a temporary TOML file and load it as configuration.
pub fn config_from_toml(contents: &str) -> anyhow::Result<Configuration> {
    let mut file = NamedTempFile::new()?;
    file.write_all(contents.as_bytes())?;
    file.flush()?;
    Configuration::load_from_path(file.path()).map_err(|e| anyhow::anyhow!("{e}"))
}
