//! Bounded, concurrent benchmarking of all columns of a table.

use common::config::BenchConfig;
use common::Warehouse;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::bench::{ColumnBench, ColumnBenchWorker, Measurement, ObjectNamer, SampleSpec};
use crate::candidates::{CandidateSet, WeightTable};
use crate::catalog::ColumnDescriptor;
use crate::error::{AdvisorError, CandidateMaterializationError, ColumnBenchError};
use crate::metrics::BenchMetrics;
use crate::selector::{SelectionResult, TradeoffThreshold, select_best};

/// Pool sizing and per-column limits
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Columns benchmarked at the same time, each on its own session
    pub workers: usize,
    /// Wall-clock limit for one column, unlimited when `None`
    pub column_timeout: Option<Duration>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            workers: 5,
            column_timeout: None,
        }
    }
}

impl From<&BenchConfig> for SchedulerConfig {
    fn from(config: &BenchConfig) -> Self {
        Self {
            workers: config.workers,
            column_timeout: config.column_timeout,
        }
    }
}

/// Benchmark and selection outcome of one column
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnAdvice {
    pub column: ColumnDescriptor,
    pub measurements: Vec<Measurement>,
    pub failures: Vec<CandidateMaterializationError>,
    pub selection: Option<SelectionResult>,
    pub error: Option<ColumnBenchError>,
}

impl ColumnAdvice {
    fn failed(column: ColumnDescriptor, error: ColumnBenchError) -> Self {
        Self {
            column,
            measurements: Vec::new(),
            failures: Vec::new(),
            selection: None,
            error: Some(error),
        }
    }

    /// Whether the column received a recommendation.
    pub fn is_benchmarked(&self) -> bool {
        self.selection.is_some()
    }
}

/// Runs one task per column with at most `workers` in flight
pub struct BenchScheduler<W: Warehouse> {
    warehouse: Arc<W>,
    candidates: Arc<CandidateSet>,
    weights: Arc<WeightTable>,
    threshold: TradeoffThreshold,
    config: SchedulerConfig,
    metrics: BenchMetrics,
}

impl<W: Warehouse> BenchScheduler<W> {
    pub fn new(
        warehouse: Arc<W>,
        candidates: Arc<CandidateSet>,
        weights: Arc<WeightTable>,
        threshold: TradeoffThreshold,
        config: SchedulerConfig,
        metrics: BenchMetrics,
    ) -> Self {
        Self {
            warehouse,
            candidates,
            weights,
            threshold,
            config,
            metrics,
        }
    }

    /// Benchmark every column and return the advice in ordinal order.
    ///
    /// Column-local failures end up in the column's advice. A lost
    /// connection aborts all remaining tasks and is returned.
    pub async fn bench_table(
        &self,
        sample: &SampleSpec,
        columns: Vec<ColumnDescriptor>,
    ) -> Result<Vec<ColumnAdvice>, AdvisorError> {
        let workers = self.config.workers.max(1);
        log::info!(
            "Benchmarking {} columns of {} with {workers} workers",
            columns.len(),
            sample.table
        );

        let permits = Arc::new(Semaphore::new(workers));
        let mut tasks = JoinSet::new();
        let mut in_flight = HashMap::with_capacity(columns.len());

        for column in columns {
            let task = ColumnTask {
                warehouse: Arc::clone(&self.warehouse),
                worker: ColumnBenchWorker::new(Arc::clone(&self.candidates), self.metrics.clone())
                    .with_column_timeout(self.config.column_timeout),
                weights: Arc::clone(&self.weights),
                threshold: self.threshold,
                metrics: self.metrics.clone(),
                sample: sample.clone(),
                column: column.clone(),
            };
            let permits = Arc::clone(&permits);
            let handle = tasks.spawn(async move {
                let Ok(_permit) = permits.acquire_owned().await else {
                    return Ok(ColumnAdvice::failed(
                        task.column,
                        ColumnBenchError::Aborted("worker pool closed".to_string()),
                    ));
                };
                task.run().await
            });
            in_flight.insert(handle.id(), column);
        }

        let mut advice = Vec::with_capacity(in_flight.len());
        while let Some(joined) = tasks.join_next_with_id().await {
            match joined {
                Ok((id, Ok(column_advice))) => {
                    in_flight.remove(&id);
                    advice.push(column_advice);
                }
                Ok((_, Err(fatal))) => {
                    log::error!("Aborting benchmark of {}: {fatal}", sample.table);
                    tasks.abort_all();
                    return Err(fatal);
                }
                Err(join_error) => {
                    let Some(column) = in_flight.remove(&join_error.id()) else {
                        log::error!("Benchmark task failed: {join_error}");
                        continue;
                    };
                    log::error!("Benchmark task for column {} failed: {join_error}", column.name);
                    self.metrics.record_column_failure();
                    advice.push(ColumnAdvice::failed(
                        column,
                        ColumnBenchError::Aborted(join_error.to_string()),
                    ));
                }
            }
        }

        advice.sort_by_key(|a| a.column.ordinal);
        Ok(advice)
    }
}

/// Everything one column task owns
struct ColumnTask<W: Warehouse> {
    warehouse: Arc<W>,
    worker: ColumnBenchWorker,
    weights: Arc<WeightTable>,
    threshold: TradeoffThreshold,
    metrics: BenchMetrics,
    sample: SampleSpec,
    column: ColumnDescriptor,
}

impl<W: Warehouse> ColumnTask<W> {
    async fn run(self) -> Result<ColumnAdvice, AdvisorError> {
        self.metrics.record_column_start();
        let started = Instant::now();
        let namer = ObjectNamer::new();
        log::info!("Benchmarking column {} ({})", self.column.name, namer.prefix());

        let bench = self.bench(&namer).await?;

        // A column that did not finish gets no recommendation
        let selection = match bench.error {
            Some(_) => None,
            None => select_best(
                &bench.measurements,
                self.threshold,
                &self.weights,
                self.column.current_encoding.as_ref(),
            ),
        };

        match &selection {
            Some(selection) => {
                self.metrics.record_column_success(started.elapsed());
                log::info!(
                    "Column {} done: {} ({}) recommended",
                    self.column.name,
                    selection.winner.config,
                    selection.winner.human_size
                );
            }
            None => {
                self.metrics.record_column_failure();
                log::warn!("Column {} could not be benchmarked", self.column.name);
            }
        }

        Ok(ColumnAdvice {
            column: self.column,
            measurements: bench.measurements,
            failures: bench.failures,
            selection,
            error: bench.error,
        })
    }

    async fn bench(&self, namer: &ObjectNamer) -> Result<ColumnBench, AdvisorError> {
        let mut session = self
            .warehouse
            .session()
            .await
            .map_err(AdvisorError::Connectivity)?;
        self.worker
            .bench_column(&mut session, &self.column, &self.sample, namer)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::TableRef;
    use common::testing::InMemoryWarehouse;

    fn columns(names: &[&str]) -> Vec<ColumnDescriptor> {
        names
            .iter()
            .enumerate()
            .map(|(i, name)| ColumnDescriptor {
                name: name.to_string(),
                ordinal: i as i32 + 1,
                current_encoding: None,
            })
            .collect()
    }

    fn sample() -> SampleSpec {
        SampleSpec {
            table: TableRef::new("public", "sales"),
            row_limit: 1000,
        }
    }

    fn scheduler(
        warehouse: &InMemoryWarehouse,
        config: SchedulerConfig,
    ) -> BenchScheduler<InMemoryWarehouse> {
        BenchScheduler::new(
            Arc::new(warehouse.clone()),
            Arc::new(CandidateSet::standard()),
            Arc::new(WeightTable::standard()),
            TradeoffThreshold::default(),
            config,
            BenchMetrics::new(),
        )
    }

    fn workers(workers: usize) -> SchedulerConfig {
        SchedulerConfig {
            workers,
            column_timeout: None,
        }
    }

    #[tokio::test]
    async fn test_results_follow_ordinal_order() {
        let names = ["id", "ts", "amount", "note"];
        let warehouse = InMemoryWarehouse::new()
            .with_table("public", "sales", &names)
            .with_delay("id", Duration::from_millis(40))
            .with_delay("ts", Duration::from_millis(20));

        let advice = scheduler(&warehouse, workers(4))
            .bench_table(&sample(), columns(&names))
            .await
            .unwrap();

        let ordinals: Vec<i32> = advice.iter().map(|a| a.column.ordinal).collect();
        assert_eq!(ordinals, [1, 2, 3, 4]);
        assert!(advice.iter().all(ColumnAdvice::is_benchmarked));
        assert!(warehouse.stats().live_objects.is_empty());
    }

    #[tokio::test]
    async fn test_failed_column_does_not_stop_others() {
        let names = ["id", "blob", "amount"];
        let warehouse = InMemoryWarehouse::new()
            .with_table("public", "sales", &names)
            .fail_column("blob");

        let advice = scheduler(&warehouse, workers(2))
            .bench_table(&sample(), columns(&names))
            .await
            .unwrap();

        assert_eq!(advice.len(), 3);
        assert!(advice[0].is_benchmarked());
        assert!(!advice[1].is_benchmarked());
        assert_eq!(
            advice[1].error,
            Some(ColumnBenchError::NoSuccessfulCandidates { attempted: 8 })
        );
        assert_eq!(advice[1].failures.len(), 8);
        assert!(advice[2].is_benchmarked());
    }

    #[tokio::test]
    async fn test_pool_size_does_not_change_results() {
        let names = ["id", "ts", "amount", "region", "note"];
        let warehouse = InMemoryWarehouse::new()
            .with_table("public", "sales", &names)
            .with_size("amount", "ZLIB_9", 900)
            .with_size("amount", "RLE_TYPE_3", 1000)
            .with_delay("ts", Duration::from_millis(15));

        let serial = scheduler(&warehouse, workers(1))
            .bench_table(&sample(), columns(&names))
            .await
            .unwrap();
        let parallel = scheduler(&warehouse, workers(4))
            .bench_table(&sample(), columns(&names))
            .await
            .unwrap();

        assert_eq!(serial, parallel);
    }

    #[tokio::test]
    async fn test_sessions_bounded_by_workers() {
        let names = ["a", "b", "c", "d", "e", "f"];
        let mut warehouse = InMemoryWarehouse::new().with_table("public", "sales", &names);
        for name in names {
            warehouse = warehouse.with_delay(name, Duration::from_millis(5));
        }

        scheduler(&warehouse, workers(2))
            .bench_table(&sample(), columns(&names))
            .await
            .unwrap();

        let stats = warehouse.stats();
        assert!(stats.peak_sessions <= 2, "peak was {}", stats.peak_sessions);
        assert_eq!(stats.sessions_opened, names.len() as u64);
    }

    #[tokio::test]
    async fn test_connectivity_loss_aborts_run() {
        let names = ["id", "amount"];
        let warehouse = InMemoryWarehouse::new()
            .with_table("public", "sales", &names)
            .disconnect_on("amount");

        let err = scheduler(&warehouse, workers(2))
            .bench_table(&sample(), columns(&names))
            .await
            .unwrap_err();
        assert!(matches!(err, AdvisorError::Connectivity(_)));
    }

    #[tokio::test]
    async fn test_unreachable_warehouse_is_fatal() {
        let warehouse = InMemoryWarehouse::new()
            .with_table("public", "sales", &["id"])
            .unreachable();

        let err = scheduler(&warehouse, workers(1))
            .bench_table(&sample(), columns(&["id"]))
            .await
            .unwrap_err();
        assert!(matches!(err, AdvisorError::Connectivity(_)));
    }

    #[tokio::test]
    async fn test_column_timeout_leaves_no_objects() {
        let names = ["id", "slow"];
        let warehouse = InMemoryWarehouse::new()
            .with_table("public", "sales", &names)
            .with_delay("slow", Duration::from_millis(200));
        let config = SchedulerConfig {
            workers: 2,
            column_timeout: Some(Duration::from_millis(50)),
        };

        let advice = scheduler(&warehouse, config)
            .bench_table(&sample(), columns(&names))
            .await
            .unwrap();

        assert!(advice[0].is_benchmarked());
        assert_eq!(
            advice[1].error,
            Some(ColumnBenchError::TimedOut(Duration::from_millis(50)))
        );
        assert!(advice[1].selection.is_none());

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(warehouse.stats().live_objects.is_empty());
    }

    #[tokio::test]
    async fn test_column_timeout_drops_table_committed_late() {
        let names = ["late"];
        // The server keeps running the CREATE past the client-side limit
        let warehouse = InMemoryWarehouse::new()
            .with_table("public", "sales", &names)
            .with_delay("late", Duration::from_millis(120))
            .ignore_statement_timeouts();
        let config = SchedulerConfig {
            workers: 1,
            column_timeout: Some(Duration::from_millis(50)),
        };

        let advice = scheduler(&warehouse, config)
            .bench_table(&sample(), columns(&names))
            .await
            .unwrap();
        assert!(matches!(advice[0].error, Some(ColumnBenchError::TimedOut(_))));

        tokio::time::sleep(Duration::from_millis(200)).await;
        let left = warehouse.stats().live_objects;
        assert!(left.is_empty(), "leaked after timeout: {left:?}");
    }
}
