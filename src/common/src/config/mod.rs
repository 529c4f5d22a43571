use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};

use crate::model::{CandidateConfig, CompressionType};

/// Default configuration file looked up in the working directory.
pub const CONFIG_FILE: &str = "cwizard.toml";

/// Prefix for environment overrides, e.g. `CWIZARD__BENCH__WORKERS=8`.
pub const ENV_PREFIX: &str = "CWIZARD__";

/// Connection settings for the warehouse being analysed.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Full connection string; when set, the discrete fields are ignored
    pub dsn: Option<String>,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: Option<String>,
    pub database: String,
    /// Maximum time to wait for a connection or a pooled session
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            dsn: None,
            host: String::from("localhost"),
            port: 5432,
            user: String::from("gpadmin"),
            password: None,
            database: String::from("db"),
            connect_timeout: Duration::from_secs(30),
        }
    }
}

impl DatabaseConfig {
    /// Human-readable target with credentials removed.
    pub fn display_target(&self) -> String {
        match &self.dsn {
            Some(dsn) => mask_dsn_password(dsn),
            None => format!(
                "{}@{}:{}/{}",
                self.user, self.host, self.port, self.database
            ),
        }
    }
}

fn mask_dsn_password(dsn: &str) -> String {
    let Some((scheme, rest)) = dsn.split_once("://") else {
        return dsn.to_string();
    };
    let Some((credentials, host)) = rest.split_once('@') else {
        return dsn.to_string();
    };
    match credentials.split_once(':') {
        Some((user, _)) => format!("{scheme}://{user}:***@{host}"),
        None => dsn.to_string(),
    }
}

/// Benchmark protocol settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BenchConfig {
    /// Rows copied from the source table into each column sample
    pub sample_rows: u64,
    /// Columns benchmarked concurrently
    pub workers: usize,
    /// Minimum `100 * best / candidate` ratio for a candidate to compete (1-99)
    pub tradeoff_threshold: u8,
    /// Wall-clock bound for one column's benchmark
    #[serde(default, with = "humantime_serde")]
    pub column_timeout: Option<Duration>,
    /// Restrict the candidate set to these `TYPE_LEVEL` keys
    #[serde(default)]
    pub candidates: Option<Vec<String>>,
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            sample_rows: 10_000_000,
            workers: 5,
            tradeoff_threshold: 90,
            column_timeout: None,
            candidates: None,
        }
    }
}

/// What happens to the rebuild plan once it is emitted.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplyPolicy {
    /// Print the plan for manual review
    #[default]
    Print,
    /// Print the plan, then execute it against the warehouse
    Execute,
}

/// Rebuild plan settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PlanConfig {
    pub apply: ApplyPolicy,
    /// Suffix of the shadow table built with the new encodings
    pub shadow_suffix: String,
    /// Suffix the original table is renamed to during the swap
    pub backup_suffix: String,
    /// Table-level encoding for columns without an explicit clause
    pub table_compresstype: CompressionType,
    pub table_compresslevel: u8,
}

impl Default for PlanConfig {
    fn default() -> Self {
        Self {
            apply: ApplyPolicy::Print,
            shadow_suffix: "_new_type".to_string(),
            backup_suffix: "_old".to_string(),
            table_compresstype: CompressionType::RleType,
            table_compresslevel: 3,
        }
    }
}

impl PlanConfig {
    pub fn table_encoding(&self) -> Result<CandidateConfig, crate::model::ParseCandidateError> {
        CandidateConfig::new(self.table_compresstype, self.table_compresslevel)
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Configuration {
    /// Warehouse connection
    pub database: DatabaseConfig,
    /// Benchmark protocol
    pub bench: BenchConfig,
    /// Weight overrides keyed by `TYPE_LEVEL`
    #[serde(default)]
    pub weights: BTreeMap<String, u32>,
    /// Rebuild plan
    pub plan: PlanConfig,
}

impl Configuration {
    fn figment() -> Figment {
        Figment::from(Serialized::defaults(Configuration::default()))
    }

    /// Defaults, then `cwizard.toml`, then `CWIZARD__*` environment variables.
    pub fn load() -> Result<Self, Box<figment::Error>> {
        let config = Self::figment()
            .merge(Toml::file(CONFIG_FILE))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .map_err(Box::new)?;

        Ok(config)
    }

    /// Like [`Configuration::load`] with an explicit file instead of `cwizard.toml`.
    pub fn load_from_path(path: &Path) -> Result<Self, Box<figment::Error>> {
        let config = Self::figment()
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .map_err(Box::new)?;

        Ok(config)
    }
}
