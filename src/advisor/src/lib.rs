//! cwizard advisor library
//!
//! Benchmarks every column of an append-optimized columnar table under a set
//! of candidate compression configurations and recommends the best one per
//! column as a rebuild plan:
//! - Catalog lookup of the target columns
//! - Per-column benchmarks on isolated sessions with a bounded worker pool
//! - Size versus cost trade-off selection
//! - Shadow table rebuild plan with an atomic rename swap

pub mod advise;
pub mod bench;
pub mod candidates;
pub mod catalog;
pub mod error;
pub mod metrics;
pub mod plan;
pub mod report;
pub mod scheduler;
pub mod selector;

// Re-export commonly used types
pub use advise::{Advice, Advisor, AdvisorSettings};
pub use bench::{ColumnBench, ColumnBenchWorker, Measurement, ObjectNamer, SampleSpec};
pub use candidates::{CandidateSet, DEFAULT_WEIGHT, WeightTable};
pub use catalog::{ColumnDescriptor, describe_columns};
pub use error::{
    AdvisorError, CandidateMaterializationError, CandidateStage, CatalogError, ColumnBenchError,
};
pub use metrics::{BenchMetrics, MetricsSummary};
pub use plan::{PlanEmitter, PlanOptions, PlanStep, RebuildPlan, apply_plan};
pub use report::{ColumnReport, render_report};
pub use scheduler::{BenchScheduler, ColumnAdvice, SchedulerConfig};
pub use selector::{SelectionResult, TradeoffThreshold, select_best};
