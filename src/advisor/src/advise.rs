//! End-to-end run: catalog, benchmark, select, plan and optionally apply.

use common::config::{ApplyPolicy, Configuration};
use common::{TableRef, Warehouse};
use serde::Serialize;
use std::sync::Arc;

use crate::bench::SampleSpec;
use crate::candidates::{CandidateSet, WeightTable};
use crate::catalog::describe_columns;
use crate::error::AdvisorError;
use crate::metrics::{BenchMetrics, MetricsSummary};
use crate::plan::{PlanEmitter, PlanOptions, RebuildPlan, apply_plan};
use crate::report::render_report;
use crate::scheduler::{BenchScheduler, ColumnAdvice, SchedulerConfig};
use crate::selector::TradeoffThreshold;

/// Validated settings of one run
#[derive(Debug, Clone)]
pub struct AdvisorSettings {
    pub table: TableRef,
    pub sample_rows: u64,
    pub threshold: TradeoffThreshold,
    pub scheduler: SchedulerConfig,
    pub candidates: CandidateSet,
    pub weights: WeightTable,
    pub plan: PlanOptions,
    pub apply: ApplyPolicy,
}

impl AdvisorSettings {
    /// Standard candidates and weights with default limits.
    pub fn new(table: TableRef) -> Self {
        Self {
            table,
            sample_rows: 10_000_000,
            threshold: TradeoffThreshold::default(),
            scheduler: SchedulerConfig::default(),
            candidates: CandidateSet::standard(),
            weights: WeightTable::standard(),
            plan: PlanOptions::default(),
            apply: ApplyPolicy::Print,
        }
    }

    pub fn from_config(config: &Configuration, table: TableRef) -> Result<Self, AdvisorError> {
        let invalid = |message: String| AdvisorError::InvalidSettings(message);

        let threshold = TradeoffThreshold::new(config.bench.tradeoff_threshold).ok_or_else(|| {
            invalid(format!(
                "tradeoff threshold must be between {} and {}, got {}",
                TradeoffThreshold::MIN,
                TradeoffThreshold::MAX,
                config.bench.tradeoff_threshold
            ))
        })?;

        if config.bench.workers == 0 {
            return Err(invalid("workers must be at least 1".to_string()));
        }
        if config.bench.sample_rows == 0 {
            return Err(invalid("sample_rows must be at least 1".to_string()));
        }

        let candidates = match &config.bench.candidates {
            Some(keys) => CandidateSet::from_keys(keys)
                .map_err(|e| invalid(format!("invalid candidate: {e}")))?,
            None => CandidateSet::standard(),
        };
        if candidates.is_empty() {
            return Err(invalid("candidate set is empty".to_string()));
        }

        let weights = WeightTable::standard()
            .with_overrides(&config.weights)
            .map_err(|e| invalid(format!("invalid weight key: {e}")))?;

        let plan = PlanOptions::try_from(&config.plan)
            .map_err(|e| invalid(format!("invalid table encoding: {e}")))?;
        if plan.shadow_suffix.is_empty() || plan.backup_suffix.is_empty() {
            return Err(invalid("plan suffixes must not be empty".to_string()));
        }
        plan.check_names(&table).map_err(invalid)?;

        Ok(Self {
            table,
            sample_rows: config.bench.sample_rows,
            threshold,
            scheduler: SchedulerConfig::from(&config.bench),
            candidates,
            weights,
            plan,
            apply: config.plan.apply,
        })
    }
}

/// Outcome of one run
#[derive(Debug, Clone, Serialize)]
pub struct Advice {
    pub table: TableRef,
    pub columns: Vec<ColumnAdvice>,
    pub plan: RebuildPlan,
    pub metrics: MetricsSummary,
    /// Whether the plan was executed
    pub applied: bool,
}

impl Advice {
    /// Per-column report in ordinal order.
    pub fn report(&self) -> String {
        render_report(&self.columns)
    }
}

/// Compression advisor for one table
pub struct Advisor<W: Warehouse> {
    warehouse: Arc<W>,
    settings: AdvisorSettings,
    metrics: BenchMetrics,
}

impl<W: Warehouse> Advisor<W> {
    pub fn new(warehouse: Arc<W>, settings: AdvisorSettings) -> Self {
        Self {
            warehouse,
            settings,
            metrics: BenchMetrics::new(),
        }
    }

    pub fn settings(&self) -> &AdvisorSettings {
        &self.settings
    }

    /// Benchmark every column and emit the rebuild plan.
    pub async fn advise(&self) -> Result<Advice, AdvisorError> {
        let table = &self.settings.table;
        self.settings
            .plan
            .check_names(table)
            .map_err(AdvisorError::InvalidSettings)?;

        let columns = {
            let mut session = self
                .warehouse
                .session()
                .await
                .map_err(AdvisorError::Connectivity)?;
            describe_columns(&mut session, table).await?
        };

        let scheduler = BenchScheduler::new(
            Arc::clone(&self.warehouse),
            Arc::new(self.settings.candidates.clone()),
            Arc::new(self.settings.weights.clone()),
            self.settings.threshold,
            self.settings.scheduler.clone(),
            self.metrics.clone(),
        );
        let sample = SampleSpec {
            table: table.clone(),
            row_limit: self.settings.sample_rows,
        };
        let advice = scheduler.bench_table(&sample, columns).await?;

        let plan = PlanEmitter::new(self.settings.plan.clone()).emit(table, &advice);
        if plan.is_noop() {
            log::info!("Every column of {table} already uses its recommended encoding");
        } else {
            log::info!(
                "{} of {} columns of {table} would change encoding",
                plan.changes(),
                advice.len()
            );
        }

        let metrics = self.metrics.summary();
        metrics.log();

        Ok(Advice {
            table: table.clone(),
            columns: advice,
            plan,
            metrics,
            applied: false,
        })
    }

    /// Execute a rebuild plan on a dedicated session.
    pub async fn apply(&self, plan: &RebuildPlan) -> Result<(), AdvisorError> {
        let mut session = self
            .warehouse
            .session()
            .await
            .map_err(AdvisorError::Connectivity)?;
        apply_plan(&mut session, plan).await
    }

    /// [`Advisor::advise`], then apply the plan when the policy says so.
    ///
    /// Plans that change nothing or leave columns for manual review are
    /// never executed.
    pub async fn run(&self) -> Result<Advice, AdvisorError> {
        let mut advice = self.advise().await?;

        if self.settings.apply == ApplyPolicy::Execute {
            if !advice.plan.manual_review.is_empty() {
                log::warn!(
                    "Not executing the plan for {}: {} columns need manual review",
                    advice.table,
                    advice.plan.manual_review.len()
                );
            } else if advice.plan.is_noop() {
                log::info!("Nothing to execute for {}", advice.table);
            } else {
                self.apply(&advice.plan).await?;
                advice.applied = true;
            }
        }

        Ok(advice)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::testing::InMemoryWarehouse;

    fn table() -> TableRef {
        TableRef::new("public", "sales")
    }

    #[test]
    fn test_settings_from_default_config() {
        let settings = AdvisorSettings::from_config(&Configuration::default(), table()).unwrap();
        assert_eq!(settings.threshold.percent(), 90);
        assert_eq!(settings.scheduler.workers, 5);
        assert_eq!(settings.sample_rows, 10_000_000);
        assert_eq!(settings.candidates, CandidateSet::standard());
        assert_eq!(settings.apply, ApplyPolicy::Print);
    }

    #[test]
    fn test_settings_reject_invalid_values() {
        let mut config = Configuration::default();
        config.bench.tradeoff_threshold = 100;
        assert!(matches!(
            AdvisorSettings::from_config(&config, table()),
            Err(AdvisorError::InvalidSettings(_))
        ));

        let mut config = Configuration::default();
        config.bench.workers = 0;
        assert!(AdvisorSettings::from_config(&config, table()).is_err());

        let mut config = Configuration::default();
        config.bench.candidates = Some(vec![]);
        assert!(AdvisorSettings::from_config(&config, table()).is_err());

        let mut config = Configuration::default();
        config.weights.insert("LZ4_1".to_string(), 1);
        assert!(AdvisorSettings::from_config(&config, table()).is_err());
    }

    #[test]
    fn test_settings_reject_truncated_rebuild_names() {
        let long = TableRef::new("public", "x".repeat(60));
        assert!(matches!(
            AdvisorSettings::from_config(&Configuration::default(), long),
            Err(AdvisorError::InvalidSettings(message)) if message.contains("limit is 63")
        ));
    }

    #[tokio::test]
    async fn test_advise_rejects_truncated_rebuild_names_before_benchmarking() {
        let name = "x".repeat(60);
        let warehouse = InMemoryWarehouse::new().with_table("public", &name, &["id"]);
        let advisor = Advisor::new(
            Arc::new(warehouse.clone()),
            AdvisorSettings::new(TableRef::new("public", name.as_str())),
        );

        let err = advisor.advise().await.unwrap_err();
        assert!(matches!(err, AdvisorError::InvalidSettings(_)));
        assert_eq!(warehouse.stats().sessions_opened, 0);
    }

    #[test]
    fn test_settings_apply_overrides() {
        let mut config = Configuration::default();
        config.bench.candidates = Some(vec!["ZLIB_1".to_string(), "ZLIB_9".to_string()]);
        config.weights.insert("ZLIB_9".to_string(), 1);

        let settings = AdvisorSettings::from_config(&config, table()).unwrap();
        assert_eq!(settings.candidates.len(), 2);
        assert_eq!(settings.weights.weight(&"ZLIB_9".parse().unwrap()), 1);
    }

    #[tokio::test]
    async fn test_run_prints_by_default() {
        let warehouse = InMemoryWarehouse::new().with_table("public", "sales", &["id", "amount"]);
        let advisor = Advisor::new(Arc::new(warehouse.clone()), AdvisorSettings::new(table()));

        let advice = advisor.run().await.unwrap();
        assert_eq!(advice.columns.len(), 2);
        assert!(!advice.applied);
        assert!(warehouse.stats().executed.is_empty());
        assert_eq!(advice.metrics.columns_benchmarked, 2);
    }

    #[tokio::test]
    async fn test_run_executes_when_requested() {
        let warehouse = InMemoryWarehouse::new().with_table("public", "sales", &["id", "amount"]);
        let mut settings = AdvisorSettings::new(table());
        settings.apply = ApplyPolicy::Execute;
        let advisor = Advisor::new(Arc::new(warehouse.clone()), settings);

        let advice = advisor.run().await.unwrap();
        assert!(advice.applied);
        assert_eq!(
            warehouse.stats().executed.last().map(String::as_str),
            Some("COMMIT")
        );
    }

    #[tokio::test]
    async fn test_run_does_not_execute_with_manual_review() {
        let warehouse = InMemoryWarehouse::new()
            .with_table("public", "sales", &["id", "blob"])
            .fail_column("blob");
        let mut settings = AdvisorSettings::new(table());
        settings.apply = ApplyPolicy::Execute;
        let advisor = Advisor::new(Arc::new(warehouse.clone()), settings);

        let advice = advisor.run().await.unwrap();
        assert!(!advice.applied);
        assert_eq!(advice.plan.manual_review.len(), 1);
        assert!(warehouse.stats().executed.is_empty());
    }
}
