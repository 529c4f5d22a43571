//! Capability interface to the storage engine being benchmarked.
//!
//! The advisor never speaks SQL dialect directly for benchmarking; it asks a
//! [`WarehouseSession`] to materialize, measure and drop objects, and to run
//! the statements of a rebuild plan. Each session is an isolated connection:
//! temporary objects created through one session are invisible to the others.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::model::{CandidateConfig, RelationSize, TableRef};

pub mod greenplum;
pub use greenplum::GreenplumWarehouse;

/// Error types that can occur while talking to the warehouse
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WarehouseError {
    #[error("Failed to connect to warehouse: {0}")]
    Connection(String),

    #[error("Relation not found: {0}")]
    NotFound(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Statement failed: {0}")]
    Execution(String),

    #[error("Unexpected result: {0}")]
    Decode(String),
}

impl WarehouseError {
    /// Connectivity failures are fatal for a run; everything else is local
    /// to the statement that produced it.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, WarehouseError::Connection(_))
    }
}

/// Result type for warehouse operations
pub type WarehouseResult<T> = Result<T, WarehouseError>;

/// A statement plus its bind parameters. Whether it produces rows is declared
/// up front so the adapter never has to guess from the result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Statement {
    sql: String,
    params: Vec<String>,
    returns_rows: bool,
}

impl Statement {
    /// A statement expected to return rows.
    pub fn query(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
            returns_rows: true,
        }
    }

    /// A statement that returns no rows (DDL, DML, transaction control).
    pub fn command(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
            returns_rows: false,
        }
    }

    /// Append a positional text parameter (`$1`, `$2`, ...).
    pub fn bind(mut self, value: impl Into<String>) -> Self {
        self.params.push(value.into());
        self
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn params(&self) -> &[String] {
        &self.params
    }

    pub fn returns_rows(&self) -> bool {
        self.returns_rows
    }
}

/// One result row with values rendered as text.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Row {
    columns: Vec<(String, Option<String>)>,
}

impl Row {
    pub fn new(columns: Vec<(String, Option<String>)>) -> Self {
        Self { columns }
    }

    /// Value of the named column; `None` for SQL NULL or an unknown column.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.columns
            .iter()
            .find(|(column, _)| column == name)
            .and_then(|(_, value)| value.as_deref())
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

/// Outcome of [`WarehouseSession::run_query`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryResult {
    Rows(Vec<Row>),
    NoRows,
}

/// Kind of object a handle refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectKind {
    /// Session-scoped snapshot of the source table.
    Sample,
    /// Single-column relation built under one candidate configuration.
    BenchTable,
}

/// Handle to a physical object created through a session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectHandle {
    pub name: String,
    pub kind: ObjectKind,
}

impl ObjectHandle {
    pub fn sample(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ObjectKind::Sample,
        }
    }

    pub fn bench_table(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ObjectKind::BenchTable,
        }
    }
}

/// Raw column metadata as the catalog reports it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogRow {
    pub name: String,
    pub ordinal: i32,
    /// Per-column storage options such as `compresstype=zlib`.
    pub options: Option<Vec<String>>,
}

/// Source of isolated sessions.
#[async_trait]
pub trait Warehouse: Send + Sync + 'static {
    type Session: WarehouseSession;

    /// Open (or check out) a session dedicated to the caller.
    async fn session(&self) -> WarehouseResult<Self::Session>;
}

/// Operations the advisor needs from one isolated session.
#[async_trait]
pub trait WarehouseSession: Send + 'static {
    /// Bound every later statement of this session on the server side. A
    /// statement over the limit is cancelled by the server and creates
    /// nothing.
    async fn set_statement_timeout(&mut self, limit: Duration) -> WarehouseResult<()>;

    /// Execute a statement, returning rows only if the statement declares it.
    async fn run_query(&mut self, statement: &Statement) -> WarehouseResult<QueryResult>;

    /// Column metadata for a table, ordered by ordinal. Empty when the table
    /// does not exist.
    async fn column_catalog(&mut self, table: &TableRef) -> WarehouseResult<Vec<CatalogRow>>;

    /// Snapshot at most `row_limit` rows of `table` into a session-scoped
    /// object called `name`.
    async fn materialize_sample(
        &mut self,
        table: &TableRef,
        row_limit: u64,
        name: &str,
    ) -> WarehouseResult<ObjectHandle>;

    /// Build a relation called `name` holding only `column` of `source`,
    /// stored under `config`.
    async fn materialize_column(
        &mut self,
        source: &ObjectHandle,
        column: &str,
        config: CandidateConfig,
        name: &str,
    ) -> WarehouseResult<ObjectHandle>;

    /// Physical size of an object.
    async fn measure_size(&mut self, handle: &ObjectHandle) -> WarehouseResult<RelationSize>;

    /// Drop an object. Dropping an object that does not exist succeeds.
    async fn drop_object(&mut self, handle: &ObjectHandle) -> WarehouseResult<()>;
}

/// Quote an identifier unless it is a plain lower-case name.
pub fn quote_ident(ident: &str) -> String {
    let mut chars = ident.chars();
    let plain = match chars.next() {
        Some(first) => {
            (first.is_ascii_lowercase() || first == '_')
                && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '$')
        }
        None => false,
    };

    if plain {
        ident.to_string()
    } else {
        format!("\"{}\"", ident.replace('"', "\"\""))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("amount"), "amount");
        assert_eq!(quote_ident("_col_1"), "_col_1");
        assert_eq!(quote_ident("Amount"), "\"Amount\"");
        assert_eq!(quote_ident("1st"), "\"1st\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
        assert_eq!(quote_ident(""), "\"\"");
    }

    #[test]
    fn test_statement_builders() {
        let query = Statement::query("SELECT $1").bind("x");
        assert!(query.returns_rows());
        assert_eq!(query.params(), ["x".to_string()]);

        let command = Statement::command("ANALYZE t");
        assert!(!command.returns_rows());
        assert!(command.params().is_empty());
    }

    #[test]
    fn test_row_lookup() {
        let row = Row::new(vec![
            ("size".to_string(), Some("42".to_string())),
            ("note".to_string(), None),
        ]);
        assert_eq!(row.get("size"), Some("42"));
        assert_eq!(row.get("note"), None);
        assert_eq!(row.get("missing"), None);
        assert_eq!(row.len(), 2);
    }

    #[test]
    fn test_connectivity_classification() {
        assert!(WarehouseError::Connection("reset".into()).is_connectivity());
        assert!(!WarehouseError::Execution("syntax".into()).is_connectivity());
    }
}
