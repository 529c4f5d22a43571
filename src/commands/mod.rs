pub mod advise;

use advisor::{CandidateSet, WeightTable};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use common::cli::{CommonArgs, utils};
use common::config::Configuration;

/// cwizard: compression advisor for append-optimized columnar tables
#[derive(Parser)]
#[command(name = "cwizard", version, about)]
pub struct Cli {
    #[command(flatten)]
    common: CommonArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Benchmark every column of a table and print a rebuild plan
    Advise(advise::AdviseArgs),
    /// Show the effective configuration
    Config {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Validate the effective configuration
    Validate,
    /// List candidate configurations and their weights
    Candidates,
    /// Print version information
    Version,
}

impl Cli {
    pub async fn run(self) -> Result<()> {
        utils::init_logging(&self.common);

        if let Commands::Version = self.command {
            println!("{}", utils::version_info());
            return Ok(());
        }

        let config = utils::load_config(self.common.config.as_ref())?;

        match self.command {
            Commands::Advise(args) => args.run(config).await,
            Commands::Config { json } => utils::display_config(&config, json),
            Commands::Validate => {
                utils::validate_config(&config)?;
                println!("Configuration is valid");
                Ok(())
            }
            Commands::Candidates => print_candidates(&config),
            Commands::Version => Ok(()),
        }
    }
}

fn print_candidates(config: &Configuration) -> Result<()> {
    let candidates = match &config.bench.candidates {
        Some(keys) => CandidateSet::from_keys(keys).context("Invalid candidate list")?,
        None => CandidateSet::standard(),
    };
    let weights = WeightTable::standard()
        .with_overrides(&config.weights)
        .context("Invalid weight override")?;

    println!("{:<12} {:>6}", "CANDIDATE", "WEIGHT");
    for candidate in candidates.iter() {
        println!("{:<12} {:>6}", candidate.key(), weights.weight(candidate));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_advise() {
        let cli = Cli::try_parse_from([
            "cwizard",
            "advise",
            "-s",
            "public",
            "-t",
            "sales",
            "-l",
            "5000",
            "--threads",
            "3",
            "--tradeoff-threshold",
            "80",
        ])
        .unwrap();
        let Commands::Advise(args) = cli.command else {
            panic!("expected advise");
        };
        assert_eq!(args.schema, "public");
        assert_eq!(args.table, "sales");
        assert_eq!(args.sample_rows, Some(5000));
        assert_eq!(args.workers, Some(3));
        assert_eq!(args.tradeoff_threshold, Some(80));
    }

    #[test]
    fn test_threshold_range_enforced() {
        for value in ["0", "100"] {
            let parsed = Cli::try_parse_from([
                "cwizard",
                "advise",
                "-s",
                "public",
                "-t",
                "sales",
                "--tradeoff-threshold",
                value,
            ]);
            assert!(parsed.is_err(), "{value} accepted");
        }
    }

    #[test]
    fn test_global_flags() {
        let cli = Cli::try_parse_from(["cwizard", "validate", "--verbose", "--config", "x.toml"])
            .unwrap();
        assert!(cli.common.verbose);
        assert_eq!(
            cli.common.config.as_deref(),
            Some(std::path::Path::new("x.toml"))
        );
    }
}
