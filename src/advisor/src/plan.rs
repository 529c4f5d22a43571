//! Rebuild plan: shadow table with per-column encodings, copy, atomic swap.

use common::config::PlanConfig;
use common::model::ParseCandidateError;
use common::warehouse::{Statement, quote_ident};
use common::{CandidateConfig, TableRef, WarehouseSession};
use serde::Serialize;
use std::fmt;

use crate::error::AdvisorError;
use crate::scheduler::ColumnAdvice;

/// Naming and defaults of the rebuilt table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanOptions {
    pub shadow_suffix: String,
    pub backup_suffix: String,
    /// Table-level encoding, applied to columns without a clause
    pub table_encoding: CandidateConfig,
}

impl Default for PlanOptions {
    fn default() -> Self {
        Self {
            shadow_suffix: "_new_type".to_string(),
            backup_suffix: "_old".to_string(),
            table_encoding: CandidateConfig {
                compression_type: common::CompressionType::RleType,
                level: 3,
            },
        }
    }
}

impl PlanOptions {
    /// Longest identifier the server keeps; longer names are truncated.
    pub const MAX_IDENTIFIER_BYTES: usize = 63;

    /// Reject tables whose shadow or backup name would be truncated into
    /// another relation's name.
    pub fn check_names(&self, table: &TableRef) -> Result<(), String> {
        for suffix in [&self.shadow_suffix, &self.backup_suffix] {
            let name = format!("{}{suffix}", table.table);
            if name.len() > Self::MAX_IDENTIFIER_BYTES {
                return Err(format!(
                    "table name '{name}' is {} bytes, the limit is {}",
                    name.len(),
                    Self::MAX_IDENTIFIER_BYTES
                ));
            }
        }
        Ok(())
    }
}

impl TryFrom<&PlanConfig> for PlanOptions {
    type Error = ParseCandidateError;

    fn try_from(config: &PlanConfig) -> Result<Self, Self::Error> {
        Ok(Self {
            shadow_suffix: config.shadow_suffix.clone(),
            backup_suffix: config.backup_suffix.clone(),
            table_encoding: config.table_encoding()?,
        })
    }
}

/// Encoding clause of one column in the shadow table
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EncodingClause {
    pub column: String,
    pub config: CandidateConfig,
    /// The column already uses this configuration
    pub unchanged: bool,
}

/// Column left out of the encoding clauses
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ManualReview {
    pub column: String,
    pub reason: String,
}

/// One statement of the plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum PlanStep {
    SetSearchPath { schema: String },
    CreateShadow {
        table: String,
        shadow: String,
        clauses: Vec<EncodingClause>,
        table_encoding: CandidateConfig,
    },
    CopyRows { from: String, to: String },
    Analyze { table: String },
    Begin,
    Rename { from: String, to: String },
    Commit,
}

impl PlanStep {
    pub fn sql(&self) -> String {
        match self {
            PlanStep::SetSearchPath { schema } => {
                format!("SET search_path TO {}", quote_ident(schema))
            }
            PlanStep::CreateShadow {
                table,
                shadow,
                clauses,
                table_encoding,
            } => {
                let mut body = vec![format!("  LIKE {}", quote_ident(table))];
                body.extend(clauses.iter().map(|clause| {
                    format!(
                        "  COLUMN {} ENCODING (compresstype={}, COMPRESSLEVEL={})",
                        quote_ident(&clause.column),
                        clause.config.compression_type,
                        clause.config.level
                    )
                }));
                format!(
                    "CREATE TABLE {} (\n{}\n)\nWITH (\n  appendonly=true,\n  orientation=column,\n  compresstype={},\n  COMPRESSLEVEL={}\n)",
                    quote_ident(shadow),
                    body.join(",\n"),
                    table_encoding.compression_type,
                    table_encoding.level
                )
            }
            PlanStep::CopyRows { from, to } => format!(
                "INSERT INTO {} SELECT * FROM {}",
                quote_ident(to),
                quote_ident(from)
            ),
            PlanStep::Analyze { table } => format!("ANALYZE {}", quote_ident(table)),
            PlanStep::Begin => "BEGIN".to_string(),
            PlanStep::Rename { from, to } => format!(
                "ALTER TABLE {} RENAME TO {}",
                quote_ident(from),
                quote_ident(to)
            ),
            PlanStep::Commit => "COMMIT".to_string(),
        }
    }

    pub fn statement(&self) -> Statement {
        Statement::command(self.sql())
    }

    /// Short label for logs and errors.
    pub fn label(&self) -> String {
        match self {
            PlanStep::SetSearchPath { .. } => "set search_path".to_string(),
            PlanStep::CreateShadow { shadow, .. } => format!("create {shadow}"),
            PlanStep::CopyRows { to, .. } => format!("copy rows into {to}"),
            PlanStep::Analyze { table } => format!("analyze {table}"),
            PlanStep::Begin => "begin".to_string(),
            PlanStep::Rename { from, to } => format!("rename {from} to {to}"),
            PlanStep::Commit => "commit".to_string(),
        }
    }
}

/// Complete rebuild of one table
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RebuildPlan {
    pub table: TableRef,
    pub shadow_table: String,
    pub backup_table: String,
    pub steps: Vec<PlanStep>,
    pub manual_review: Vec<ManualReview>,
}

impl RebuildPlan {
    pub fn clauses(&self) -> &[EncodingClause] {
        self.steps
            .iter()
            .find_map(|step| match step {
                PlanStep::CreateShadow { clauses, .. } => Some(clauses.as_slice()),
                _ => None,
            })
            .unwrap_or(&[])
    }

    /// Columns whose recommended encoding differs from the current one.
    pub fn changes(&self) -> usize {
        self.clauses().iter().filter(|c| !c.unchanged).count()
    }

    /// Every column already uses its recommendation and none needs review.
    pub fn is_noop(&self) -> bool {
        self.changes() == 0 && self.manual_review.is_empty()
    }

    pub fn statements(&self) -> Vec<Statement> {
        self.steps.iter().map(PlanStep::statement).collect()
    }

    /// Drops a shadow table left behind by a failed execution.
    pub fn discard_shadow(&self) -> Statement {
        Statement::command(format!(
            "DROP TABLE IF EXISTS {}",
            quote_ident(&self.shadow_table)
        ))
    }
}

impl fmt::Display for RebuildPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.manual_review.is_empty() {
            writeln!(f, "-- Columns without a recommendation, review manually:")?;
            for review in &self.manual_review {
                writeln!(f, "--   {}: {}", review.column, review.reason)?;
            }
        }

        for step in &self.steps {
            match step {
                PlanStep::CreateShadow { .. } => writeln!(f)?,
                PlanStep::Begin => {
                    writeln!(f)?;
                    writeln!(f, "--CHECK INDEXES")?;
                }
                _ => {}
            }
            writeln!(f, "{};", step.sql())?;
        }
        Ok(())
    }
}

/// Turns per-column advice into a [`RebuildPlan`]
#[derive(Debug, Clone, Default)]
pub struct PlanEmitter {
    options: PlanOptions,
}

impl PlanEmitter {
    pub fn new(options: PlanOptions) -> Self {
        Self { options }
    }

    /// Emit the plan; clauses follow the order of `advice`, which the
    /// scheduler returns by ordinal.
    pub fn emit(&self, table: &TableRef, advice: &[ColumnAdvice]) -> RebuildPlan {
        let shadow_table = format!("{}{}", table.table, self.options.shadow_suffix);
        let backup_table = format!("{}{}", table.table, self.options.backup_suffix);

        let mut clauses = Vec::new();
        let mut manual_review = Vec::new();
        for column in advice {
            match &column.selection {
                Some(selection) => clauses.push(EncodingClause {
                    column: column.column.name.clone(),
                    config: selection.winner.config,
                    unchanged: selection.is_current(),
                }),
                None => manual_review.push(ManualReview {
                    column: column.column.name.clone(),
                    reason: column
                        .error
                        .as_ref()
                        .map(ToString::to_string)
                        .unwrap_or_else(|| "could not be benchmarked".to_string()),
                }),
            }
        }

        let steps = vec![
            PlanStep::SetSearchPath {
                schema: table.schema.clone(),
            },
            PlanStep::CreateShadow {
                table: table.table.clone(),
                shadow: shadow_table.clone(),
                clauses,
                table_encoding: self.options.table_encoding,
            },
            PlanStep::CopyRows {
                from: table.table.clone(),
                to: shadow_table.clone(),
            },
            PlanStep::Analyze {
                table: shadow_table.clone(),
            },
            PlanStep::Begin,
            PlanStep::Rename {
                from: table.table.clone(),
                to: backup_table.clone(),
            },
            PlanStep::Rename {
                from: shadow_table.clone(),
                to: table.table.clone(),
            },
            PlanStep::Commit,
        ];

        RebuildPlan {
            table: table.clone(),
            shadow_table,
            backup_table,
            steps,
            manual_review,
        }
    }
}

/// Execute a plan step by step on one session.
///
/// A failure between `BEGIN` and `COMMIT` is followed by a `ROLLBACK` so the
/// original table keeps its name. A shadow table created by this execution
/// is dropped again on any later failure.
pub async fn apply_plan<S: WarehouseSession + ?Sized>(
    session: &mut S,
    plan: &RebuildPlan,
) -> Result<(), AdvisorError> {
    let mut in_transaction = false;
    let mut shadow_created = false;

    for step in &plan.steps {
        log::info!("Applying: {}", step.label());
        if let Err(source) = session.run_query(&step.statement()).await {
            if in_transaction {
                log::warn!("Rolling back swap of {}", plan.table);
                if let Err(e) = session.run_query(&Statement::command("ROLLBACK")).await {
                    log::error!("Rollback failed: {e}");
                }
            }
            if shadow_created {
                log::warn!("Dropping shadow table {}", plan.shadow_table);
                if let Err(e) = session.run_query(&plan.discard_shadow()).await {
                    log::error!("Failed to drop {}: {e}", plan.shadow_table);
                }
            }
            if source.is_connectivity() {
                return Err(AdvisorError::Connectivity(source));
            }
            return Err(AdvisorError::PlanExecution {
                step: step.label(),
                source,
            });
        }

        match step {
            PlanStep::CreateShadow { .. } => shadow_created = true,
            PlanStep::Begin => in_transaction = true,
            PlanStep::Commit => {
                in_transaction = false;
                shadow_created = false;
            }
            _ => {}
        }
    }

    log::info!(
        "{} rebuilt, previous table kept as {}",
        plan.table,
        plan.backup_table
    );
    Ok(())
}
