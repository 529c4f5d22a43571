//! Error taxonomy of a benchmarking run.
//!
//! Only [`AdvisorError`] aborts a run. Candidate and column errors are local:
//! they are logged, attached to the affected column's report and the run
//! continues.

use common::{CandidateConfig, TableRef, WarehouseError};
use serde::Serialize;
use std::time::Duration;

/// Fatal errors for one invocation
#[derive(Debug, thiserror::Error)]
pub enum AdvisorError {
    #[error("Lost connectivity to the warehouse: {0}")]
    Connectivity(WarehouseError),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error("Invalid advisor settings: {0}")]
    InvalidSettings(String),

    #[error("Rebuild plan failed at step {step}: {source}")]
    PlanExecution {
        step: String,
        #[source]
        source: WarehouseError,
    },
}

/// Target table metadata could not be read
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("Table {0} does not exist or has no columns")]
    TableNotFound(TableRef),

    #[error("Insufficient privileges to read metadata of {table}: {message}")]
    PermissionDenied { table: TableRef, message: String },

    #[error("Catalog reports ordinal {ordinal} twice for {table}")]
    DuplicateOrdinal { table: TableRef, ordinal: i32 },

    #[error("Catalog lookup for {table} failed: {source}")]
    Lookup {
        table: TableRef,
        #[source]
        source: WarehouseError,
    },
}

/// Stage of a candidate benchmark that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateStage {
    Materialize,
    Measure,
}

impl std::fmt::Display for CandidateStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CandidateStage::Materialize => f.write_str("materialize"),
            CandidateStage::Measure => f.write_str("measure"),
        }
    }
}

/// One (column, candidate) pair could not be measured
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{config} failed to {stage}: {source}")]
pub struct CandidateMaterializationError {
    pub config: CandidateConfig,
    pub stage: CandidateStage,
    #[source]
    pub source: WarehouseError,
}

/// A column's benchmark degraded to nothing
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ColumnBenchError {
    #[error("Could not materialize the row sample: {0}")]
    Sample(WarehouseError),

    #[error("All {attempted} candidates failed")]
    NoSuccessfulCandidates { attempted: usize },

    #[error("Benchmark exceeded {0:?}")]
    TimedOut(Duration),

    #[error("Benchmark task aborted: {0}")]
    Aborted(String),
}

impl Serialize for CandidateMaterializationError {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl Serialize for ColumnBenchError {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}
