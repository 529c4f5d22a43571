use clap::Parser;
use std::path::PathBuf;

/// Common CLI arguments shared by every cwizard command
#[derive(Parser, Debug, Clone, Default)]
pub struct CommonArgs {
    #[arg(long, global = true, help = "Configuration file path")]
    pub config: Option<PathBuf>,

    #[arg(short, long, global = true, help = "Enable verbose logging")]
    pub verbose: bool,

    #[arg(short, long, global = true, help = "Enable quiet mode (warnings only)")]
    pub quiet: bool,
}

/// Utility functions for CLI operations
pub mod utils {
    use super::*;
    use crate::config::{Configuration, PlanConfig};
    use crate::model::CandidateConfig;
    use anyhow::{Context, Result};
    use tracing_subscriber::EnvFilter;

    /// Log level implied by the verbosity flags.
    pub fn log_level(args: &CommonArgs) -> &'static str {
        if args.quiet {
            "warn"
        } else if args.verbose {
            "debug"
        } else {
            "info"
        }
    }

    /// Initialize logging on stderr; `RUST_LOG` wins over the flags.
    pub fn init_logging(args: &CommonArgs) {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(log_level(args)));

        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init();
    }

    /// Load configuration with optional override from CLI
    pub fn load_config(config_path: Option<&PathBuf>) -> Result<Configuration> {
        match config_path {
            Some(path) => {
                log::info!("Loading configuration from: {}", path.display());
                Configuration::load_from_path(path).context("Failed to load configuration")
            }
            None => Configuration::load().context("Failed to load configuration"),
        }
    }

    /// Display configuration in human-readable or JSON format
    pub fn display_config(config: &Configuration, json: bool) -> Result<()> {
        if json {
            let mut redacted = config.clone();
            if redacted.database.password.is_some() {
                redacted.database.password = Some("***".to_string());
            }
            redacted.database.dsn = redacted.database.dsn.as_ref().map(|_| {
                config.database.display_target()
            });
            let json = serde_json::to_string_pretty(&redacted)
                .context("Failed to serialize configuration to JSON")?;
            println!("{json}");
        } else {
            println!("cwizard Configuration:");
            println!("======================");
            println!("Warehouse: {}", config.database.display_target());
            println!("Connect timeout: {:?}", config.database.connect_timeout);
            println!("Sample rows: {}", config.bench.sample_rows);
            println!("Workers: {}", config.bench.workers);
            println!("Trade-off threshold: {}%", config.bench.tradeoff_threshold);
            match config.bench.column_timeout {
                Some(timeout) => println!("Column timeout: {timeout:?}"),
                None => println!("Column timeout: none"),
            }
            match &config.bench.candidates {
                Some(candidates) => println!("Candidates: {}", candidates.join(", ")),
                None => println!("Candidates: standard set"),
            }
            for (key, weight) in &config.weights {
                println!("Weight override: {key} = {weight}");
            }
            println!("Plan apply policy: {:?}", config.plan.apply);
            println!(
                "Plan suffixes: shadow '{}', backup '{}'",
                config.plan.shadow_suffix, config.plan.backup_suffix
            );
            println!(
                "Table default encoding: {}/{}",
                config.plan.table_compresstype, config.plan.table_compresslevel
            );
        }
        Ok(())
    }

    /// Validate configuration and report any issues
    pub fn validate_config(config: &Configuration) -> Result<()> {
        log::info!("Validating configuration...");

        if !(1..=99).contains(&config.bench.tradeoff_threshold) {
            anyhow::bail!(
                "Trade-off threshold must be between 1 and 99, got {}",
                config.bench.tradeoff_threshold
            );
        }

        if config.bench.workers == 0 {
            anyhow::bail!("Worker count must be at least 1");
        }

        if config.bench.sample_rows == 0 {
            anyhow::bail!("Sample row bound must be at least 1");
        }

        if let Some(candidates) = &config.bench.candidates {
            if candidates.is_empty() {
                anyhow::bail!("Candidate list cannot be empty when given");
            }
            for key in candidates {
                key.parse::<CandidateConfig>()
                    .with_context(|| format!("Invalid candidate '{key}'"))?;
            }
        }

        for key in config.weights.keys() {
            key.parse::<CandidateConfig>()
                .with_context(|| format!("Invalid weight key '{key}'"))?;
        }

        validate_plan(&config.plan)?;

        if config.database.dsn.as_deref().is_some_and(str::is_empty) {
            anyhow::bail!("Database DSN cannot be empty when given");
        }

        log::info!("Configuration validation passed");
        Ok(())
    }

    fn validate_plan(plan: &PlanConfig) -> Result<()> {
        if plan.shadow_suffix.is_empty() || plan.backup_suffix.is_empty() {
            anyhow::bail!("Plan table suffixes cannot be empty");
        }
        if plan.shadow_suffix == plan.backup_suffix {
            anyhow::bail!("Shadow and backup suffixes must differ");
        }
        plan.table_encoding()
            .context("Invalid table-level default encoding")?;
        Ok(())
    }

    /// Standard version information
    pub fn version_info() -> String {
        format!(
            "cwizard {} (rust {})",
            env!("CARGO_PKG_VERSION"),
            env!("CARGO_PKG_RUST_VERSION")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Configuration;

    #[test]
    fn test_log_level_from_flags() {
        let mut args = CommonArgs::default();
        assert_eq!(utils::log_level(&args), "info");
        args.verbose = true;
        assert_eq!(utils::log_level(&args), "debug");
        args.quiet = true;
        assert_eq!(utils::log_level(&args), "warn");
    }

    #[test]
    fn test_default_configuration_is_valid() {
        utils::validate_config(&Configuration::default()).unwrap();
    }

    #[test]
    fn test_validation_rejects_out_of_range_threshold() {
        let mut config = Configuration::default();
        config.bench.tradeoff_threshold = 100;
        assert!(utils::validate_config(&config).is_err());

        config.bench.tradeoff_threshold = 0;
        assert!(utils::validate_config(&config).is_err());

        config.bench.tradeoff_threshold = 99;
        assert!(utils::validate_config(&config).is_ok());
    }

    #[test]
    fn test_validation_rejects_bad_keys() {
        let mut config = Configuration::default();
        config.weights.insert("LZ4_1".to_string(), 1);
        assert!(utils::validate_config(&config).is_err());

        let mut config = Configuration::default();
        config.bench.candidates = Some(vec![]);
        assert!(utils::validate_config(&config).is_err());

        let mut config = Configuration::default();
        config.bench.candidates = Some(vec!["QUICKLZ_3".to_string()]);
        assert!(utils::validate_config(&config).is_err());
    }

    #[test]
    fn test_validation_rejects_zero_workers_and_bad_suffixes() {
        let mut config = Configuration::default();
        config.bench.workers = 0;
        assert!(utils::validate_config(&config).is_err());

        let mut config = Configuration::default();
        config.plan.backup_suffix = config.plan.shadow_suffix.clone();
        assert!(utils::validate_config(&config).is_err());
    }

    #[test]
    fn test_version_info() {
        let version = utils::version_info();
        assert!(version.contains(env!("CARGO_PKG_VERSION")));
    }
}
