use advisor::{Advice, Advisor, AdvisorSettings};
use anyhow::{Context, Result};
use clap::Args;
use common::config::{ApplyPolicy, Configuration};
use common::warehouse::GreenplumWarehouse;
use common::TableRef;
use serde::Serialize;
use std::sync::Arc;

#[derive(Args, Debug)]
pub struct AdviseArgs {
    /// Schema of the table
    #[arg(short, long)]
    pub schema: String,

    /// Table to benchmark
    #[arg(short, long)]
    pub table: String,

    /// Rows to sample per column
    #[arg(short = 'l', long = "lines")]
    pub sample_rows: Option<u64>,

    /// Columns benchmarked in parallel
    #[arg(long = "threads")]
    pub workers: Option<usize>,

    /// Trade-off threshold in percent
    #[arg(long, value_parser = clap::value_parser!(u8).range(1..=99))]
    pub tradeoff_threshold: Option<u8>,

    /// Execute the rebuild plan after printing it
    #[arg(long)]
    pub execute: bool,

    /// Print the advice as JSON
    #[arg(long)]
    pub json: bool,

    /// Connection string, overrides the discrete connection flags
    #[arg(long, env = "CWIZARD_DSN")]
    pub dsn: Option<String>,

    #[arg(long)]
    pub host: Option<String>,

    #[arg(long)]
    pub port: Option<u16>,

    #[arg(long)]
    pub user: Option<String>,

    #[arg(long, env = "CWIZARD_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    #[arg(long)]
    pub database: Option<String>,
}

#[derive(Serialize)]
struct JsonAdvice<'a> {
    #[serde(flatten)]
    advice: &'a Advice,
    script: String,
}

impl AdviseArgs {
    /// Command-line values win over file and environment configuration.
    fn apply_overrides(&self, config: &mut Configuration) {
        if let Some(rows) = self.sample_rows {
            config.bench.sample_rows = rows;
        }
        if let Some(workers) = self.workers {
            config.bench.workers = workers;
        }
        if let Some(threshold) = self.tradeoff_threshold {
            config.bench.tradeoff_threshold = threshold;
        }
        if self.execute {
            config.plan.apply = ApplyPolicy::Execute;
        }

        let database = &mut config.database;
        if let Some(dsn) = &self.dsn {
            database.dsn = Some(dsn.clone());
        }
        if let Some(host) = &self.host {
            database.host = host.clone();
        }
        if let Some(port) = self.port {
            database.port = port;
        }
        if let Some(user) = &self.user {
            database.user = user.clone();
        }
        if let Some(password) = &self.password {
            database.password = Some(password.clone());
        }
        if let Some(name) = &self.database {
            database.database = name.clone();
        }
    }

    pub async fn run(self, mut config: Configuration) -> Result<()> {
        self.apply_overrides(&mut config);

        let table = TableRef::new(&self.schema, &self.table);
        let settings = AdvisorSettings::from_config(&config, table.clone())?;

        // One session per worker plus one for the catalog and the plan
        let max_sessions = u32::try_from(settings.scheduler.workers)
            .unwrap_or(u32::MAX)
            .saturating_add(1);
        let warehouse = GreenplumWarehouse::connect(&config.database, max_sessions)
            .await
            .with_context(|| {
                format!(
                    "Failed to connect to {}",
                    config.database.display_target()
                )
            })?;

        let advisor = Advisor::new(Arc::new(warehouse), settings);
        let advice = advisor
            .run()
            .await
            .with_context(|| format!("Failed to advise on {table}"))?;

        if self.json {
            let output = JsonAdvice {
                advice: &advice,
                script: advice.plan.to_string(),
            };
            let json = serde_json::to_string_pretty(&output)
                .context("Failed to serialize advice to JSON")?;
            println!("{json}");
        } else {
            print!("{}", advice.report());
            println!();
            print!("{}", advice.plan);
            if advice.applied {
                println!("-- Plan executed");
            }
        }
        Ok(())
    }
}
