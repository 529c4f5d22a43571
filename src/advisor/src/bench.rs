//! Per-column benchmark: build the column under every candidate, measure it,
//! drop it.

use common::warehouse::ObjectHandle;
use common::{CandidateConfig, TableRef, WarehouseSession};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::candidates::CandidateSet;
use crate::catalog::ColumnDescriptor;
use crate::error::{AdvisorError, CandidateMaterializationError, CandidateStage, ColumnBenchError};
use crate::metrics::BenchMetrics;

/// Where benchmark rows come from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleSpec {
    pub table: TableRef,
    pub row_limit: u64,
}

/// Physical size of one column under one candidate configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Measurement {
    pub column: String,
    pub config: CandidateConfig,
    pub physical_size_bytes: u64,
    pub human_size: String,
}

/// Everything one column's benchmark produced
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ColumnBench {
    /// Successful measurements in candidate order
    pub measurements: Vec<Measurement>,
    /// Candidates that were skipped
    pub failures: Vec<CandidateMaterializationError>,
    /// Set when the column as a whole produced nothing usable
    pub error: Option<ColumnBenchError>,
}

/// Names of the objects one column task creates.
///
/// Every task gets a random prefix so concurrent tasks, and reruns after an
/// aborted task, never reuse a name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectNamer {
    prefix: String,
}

impl ObjectNamer {
    pub fn new() -> Self {
        Self {
            prefix: format!("cw_{}", Uuid::new_v4().simple()),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn sample(&self) -> String {
        format!("{}_sample", self.prefix)
    }

    pub fn bench_table(&self, config: &CandidateConfig) -> String {
        format!(
            "{}_{}_{}",
            self.prefix,
            config.compression_type.as_str().to_ascii_lowercase(),
            config.level
        )
    }
}

impl Default for ObjectNamer {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs the candidate loop for one column on one session
#[derive(Debug, Clone)]
pub struct ColumnBenchWorker {
    candidates: Arc<CandidateSet>,
    metrics: BenchMetrics,
    column_timeout: Option<Duration>,
}

impl ColumnBenchWorker {
    pub fn new(candidates: Arc<CandidateSet>, metrics: BenchMetrics) -> Self {
        Self {
            candidates,
            metrics,
            column_timeout: None,
        }
    }

    /// Limit the wall-clock time spent on one column.
    ///
    /// Each statement is bounded by the server with the same limit, and no
    /// candidate is started once the limit has passed. A statement in flight
    /// is always awaited, so whatever it created is dropped again.
    pub fn with_column_timeout(mut self, limit: Option<Duration>) -> Self {
        self.column_timeout = limit;
        self
    }

    /// Benchmark `column` under every candidate, in candidate order.
    ///
    /// Candidate failures are recorded and skipped. Only connectivity
    /// failures abort, as [`AdvisorError::Connectivity`].
    pub async fn bench_column<S: WarehouseSession + ?Sized>(
        &self,
        session: &mut S,
        column: &ColumnDescriptor,
        sample: &SampleSpec,
        namer: &ObjectNamer,
    ) -> Result<ColumnBench, AdvisorError> {
        let started = Instant::now();
        if let Some(limit) = self.column_timeout {
            match session.set_statement_timeout(limit).await {
                Ok(()) => {}
                Err(e) if e.is_connectivity() => return Err(AdvisorError::Connectivity(e)),
                Err(e) => log::warn!(
                    "Could not bound statements for column {}: {e}",
                    column.name
                ),
            }
        }

        let sample_handle = match session
            .materialize_sample(&sample.table, sample.row_limit, &namer.sample())
            .await
        {
            Ok(handle) => handle,
            Err(e) if e.is_connectivity() => return Err(AdvisorError::Connectivity(e)),
            Err(e) => {
                log::warn!(
                    "Could not sample {} for column {}: {e}",
                    sample.table,
                    column.name
                );
                // A failed CREATE may still have left the name behind
                self.release(session, &ObjectHandle::sample(namer.sample()))
                    .await?;
                return Ok(ColumnBench {
                    error: Some(ColumnBenchError::Sample(e)),
                    ..ColumnBench::default()
                });
            }
        };

        let mut bench = ColumnBench::default();
        for config in self.candidates.iter() {
            if let Some(limit) = self
                .column_timeout
                .filter(|limit| started.elapsed() >= *limit)
            {
                log::warn!(
                    "Column {} exceeded {limit:?}, skipping remaining candidates",
                    column.name
                );
                bench.error = Some(ColumnBenchError::TimedOut(limit));
                break;
            }

            match self
                .bench_candidate(session, &sample_handle, column, *config, namer)
                .await?
            {
                Ok(measurement) => bench.measurements.push(measurement),
                Err(failure) => {
                    log::warn!("Skipping candidate for column {}: {failure}", column.name);
                    self.metrics.record_candidate_failure();
                    bench.failures.push(failure);
                }
            }
        }

        self.release(session, &sample_handle).await?;

        if bench.error.is_none() && bench.measurements.is_empty() {
            bench.error = Some(ColumnBenchError::NoSuccessfulCandidates {
                attempted: self.candidates.len(),
            });
        }
        Ok(bench)
    }

    /// Materialize, measure and drop one candidate. The outer error is fatal,
    /// the inner one skips the candidate.
    async fn bench_candidate<S: WarehouseSession + ?Sized>(
        &self,
        session: &mut S,
        sample: &ObjectHandle,
        column: &ColumnDescriptor,
        config: CandidateConfig,
        namer: &ObjectNamer,
    ) -> Result<Result<Measurement, CandidateMaterializationError>, AdvisorError> {
        let name = namer.bench_table(&config);
        log::debug!("Benchmarking column {} under {config} as {name}", column.name);

        let outcome = match session
            .materialize_column(sample, &column.name, config, &name)
            .await
        {
            Ok(handle) => session
                .measure_size(&handle)
                .await
                .map_err(|e| (CandidateStage::Measure, e)),
            Err(e) => Err((CandidateStage::Materialize, e)),
        };

        // Release regardless of the outcome; dropping is a no-op when the
        // object was never created.
        let release = self
            .release(session, &ObjectHandle::bench_table(&name))
            .await;

        match outcome {
            Err((_, source)) if source.is_connectivity() => {
                Err(AdvisorError::Connectivity(source))
            }
            Err((stage, source)) => {
                release?;
                Ok(Err(CandidateMaterializationError {
                    config,
                    stage,
                    source,
                }))
            }
            Ok(size) => {
                release?;
                self.metrics.record_measurement(size.bytes);
                Ok(Ok(Measurement {
                    column: column.name.clone(),
                    config,
                    physical_size_bytes: size.bytes,
                    human_size: size.human,
                }))
            }
        }
    }

    /// Drop an object; only a lost connection is an error.
    async fn release<S: WarehouseSession + ?Sized>(
        &self,
        session: &mut S,
        handle: &ObjectHandle,
    ) -> Result<(), AdvisorError> {
        match session.drop_object(handle).await {
            Ok(()) => {
                self.metrics.record_drop();
                Ok(())
            }
            Err(e) if e.is_connectivity() => Err(AdvisorError::Connectivity(e)),
            Err(e) => {
                log::warn!("Failed to drop {}: {e}", handle.name);
                Ok(())
            }
        }
    }
}
