use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use crate::model::{CandidateConfig, CompressionType, RelationSize, TableRef};
use crate::warehouse::{
    CatalogRow, ObjectHandle, ObjectKind, QueryResult, Statement, Warehouse, WarehouseError,
    WarehouseResult, WarehouseSession,
};

#[derive(Debug, Clone)]
struct ObjectRecord {
    kind: ObjectKind,
    column: Option<String>,
    config: Option<CandidateConfig>,
}

#[derive(Debug, Default)]
struct State {
    tables: HashMap<TableRef, Vec<CatalogRow>>,
    sizes: HashMap<(String, CandidateConfig), u64>,
    failing_candidates: HashSet<(String, CandidateConfig)>,
    failing_measurements: HashSet<(String, CandidateConfig)>,
    failing_columns: HashSet<String>,
    disconnecting_columns: HashSet<String>,
    delays: HashMap<String, Duration>,
    failing_statements: Vec<String>,
    fail_samples: bool,
    deny_catalog: bool,
    ignore_statement_timeouts: bool,
    unreachable: bool,
    /// Keyed by (owning session for samples, 0 for shared relations, name)
    objects: HashMap<(u64, String), ObjectRecord>,
    objects_created: usize,
    objects_dropped: usize,
    executed: Vec<String>,
}

/// Snapshot of what the in-memory warehouse observed.
#[derive(Debug, Clone, Default)]
pub struct WarehouseStats {
    pub sessions_opened: u64,
    pub peak_sessions: usize,
    pub objects_created: usize,
    pub objects_dropped: usize,
    /// Names of objects still alive
    pub live_objects: Vec<String>,
    /// Statements passed to `run_query`, in order
    pub executed: Vec<String>,
}

/// Scripted warehouse for tests.
///
/// Sizes are deterministic per (column, candidate); unscripted pairs get a
/// size derived from the column name and configuration. Samples are scoped
/// to the session that created them, bench tables are shared and collide on
/// name like real relations do.
#[derive(Debug, Clone, Default)]
pub struct InMemoryWarehouse {
    state: Arc<Mutex<State>>,
    active_sessions: Arc<AtomicUsize>,
    peak_sessions: Arc<AtomicUsize>,
    next_session: Arc<AtomicU64>,
}

impl InMemoryWarehouse {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a table whose columns get ordinals 1..=n without encodings.
    pub fn with_table(self, schema: &str, table: &str, columns: &[&str]) -> Self {
        let rows = columns
            .iter()
            .enumerate()
            .map(|(i, name)| CatalogRow {
                name: name.to_string(),
                ordinal: i as i32 + 1,
                options: None,
            })
            .collect();
        self.with_catalog_rows(schema, table, rows)
    }

    /// Register a table with raw catalog rows, returned exactly as given.
    pub fn with_catalog_rows(self, schema: &str, table: &str, rows: Vec<CatalogRow>) -> Self {
        self.state().tables.insert(TableRef::new(schema, table), rows);
        self
    }

    /// Script the physical size of `column` under `candidate` (`TYPE_LEVEL`).
    pub fn with_size(self, column: &str, candidate: &str, bytes: u64) -> Self {
        let config = parse_candidate(candidate);
        self.state().sizes.insert((column.to_string(), config), bytes);
        self
    }

    /// Materializing `column` under `candidate` fails.
    pub fn fail_candidate(self, column: &str, candidate: &str) -> Self {
        let config = parse_candidate(candidate);
        self.state()
            .failing_candidates
            .insert((column.to_string(), config));
        self
    }

    /// Measuring `column` under `candidate` fails after materialization.
    pub fn fail_measurement(self, column: &str, candidate: &str) -> Self {
        let config = parse_candidate(candidate);
        self.state()
            .failing_measurements
            .insert((column.to_string(), config));
        self
    }

    /// Every candidate of `column` fails to materialize.
    pub fn fail_column(self, column: &str) -> Self {
        self.state().failing_columns.insert(column.to_string());
        self
    }

    /// Materializing any candidate of `column` loses the connection.
    pub fn disconnect_on(self, column: &str) -> Self {
        self.state().disconnecting_columns.insert(column.to_string());
        self
    }

    /// Delay every materialization of `column`.
    pub fn with_delay(self, column: &str, delay: Duration) -> Self {
        self.state().delays.insert(column.to_string(), delay);
        self
    }

    /// `run_query` fails for statements containing `fragment`.
    pub fn fail_statement(self, fragment: &str) -> Self {
        self.state().failing_statements.push(fragment.to_string());
        self
    }

    /// Sample materialization fails.
    pub fn fail_samples(self) -> Self {
        self.state().fail_samples = true;
        self
    }

    /// Sessions accept a statement timeout but never enforce it.
    pub fn ignore_statement_timeouts(self) -> Self {
        self.state().ignore_statement_timeouts = true;
        self
    }

    /// Catalog lookups fail with a privilege error.
    pub fn deny_catalog(self) -> Self {
        self.state().deny_catalog = true;
        self
    }

    /// No session can be opened.
    pub fn unreachable(self) -> Self {
        self.state().unreachable = true;
        self
    }

    pub fn stats(&self) -> WarehouseStats {
        let state = self.state();
        let mut live_objects: Vec<String> =
            state.objects.keys().map(|(_, name)| name.clone()).collect();
        live_objects.sort();
        WarehouseStats {
            sessions_opened: self.next_session.load(Ordering::SeqCst),
            peak_sessions: self.peak_sessions.load(Ordering::SeqCst),
            objects_created: state.objects_created,
            objects_dropped: state.objects_dropped,
            live_objects,
            executed: state.executed.clone(),
        }
    }
}

fn parse_candidate(candidate: &str) -> CandidateConfig {
    candidate
        .parse()
        .unwrap_or_else(|e| panic!("invalid candidate key '{candidate}': {e}"))
}

fn default_size(column: &str, config: CandidateConfig) -> u64 {
    let base = 8192 * (column.len() as u64 + 1);
    let percent = match config.compression_type {
        CompressionType::RleType => 70,
        CompressionType::Zlib => 60,
        CompressionType::Quicklz => 90,
    };
    base * percent / 100 - u64::from(config.level) * 128
}

/// Rough `pg_size_pretty` rendering.
fn pretty_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["kB", "MB", "GB", "TB"];
    if bytes < 10 * 1024 {
        return format!("{bytes} bytes");
    }
    let mut value = bytes / 1024;
    let mut unit = 0;
    while value >= 10 * 1024 && unit < UNITS.len() - 1 {
        value /= 1024;
        unit += 1;
    }
    format!("{value} {}", UNITS[unit])
}

#[async_trait]
impl Warehouse for InMemoryWarehouse {
    type Session = InMemorySession;

    async fn session(&self) -> WarehouseResult<InMemorySession> {
        if self.state().unreachable {
            return Err(WarehouseError::Connection(
                "connection refused".to_string(),
            ));
        }

        let id = self.next_session.fetch_add(1, Ordering::SeqCst) + 1;
        let active = self.active_sessions.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_sessions.fetch_max(active, Ordering::SeqCst);

        Ok(InMemorySession {
            id,
            warehouse: self.clone(),
            statement_timeout: None,
        })
    }
}

/// Session handed out by [`InMemoryWarehouse`].
#[derive(Debug)]
pub struct InMemorySession {
    id: u64,
    warehouse: InMemoryWarehouse,
    statement_timeout: Option<Duration>,
}

impl InMemorySession {
    /// Drop all session-scoped samples, like a backend ending a session.
    fn release_samples(&self) {
        let mut state = self.warehouse.state();
        state
            .objects
            .retain(|(session, _), record| !(record.kind == ObjectKind::Sample && *session == self.id));
    }
}

impl Drop for InMemorySession {
    fn drop(&mut self) {
        self.release_samples();
        self.warehouse.active_sessions.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl WarehouseSession for InMemorySession {
    async fn set_statement_timeout(&mut self, limit: Duration) -> WarehouseResult<()> {
        self.statement_timeout = Some(limit);
        Ok(())
    }

    async fn run_query(&mut self, statement: &Statement) -> WarehouseResult<QueryResult> {
        let mut state = self.warehouse.state();
        state.executed.push(statement.sql().to_string());

        if let Some(fragment) = state
            .failing_statements
            .iter()
            .find(|fragment| statement.sql().contains(fragment.as_str()))
        {
            return Err(WarehouseError::Execution(format!(
                "scripted failure on '{fragment}'"
            )));
        }

        if statement.returns_rows() {
            Ok(QueryResult::Rows(Vec::new()))
        } else {
            Ok(QueryResult::NoRows)
        }
    }

    async fn column_catalog(&mut self, table: &TableRef) -> WarehouseResult<Vec<CatalogRow>> {
        let state = self.warehouse.state();
        if state.deny_catalog {
            return Err(WarehouseError::PermissionDenied(
                "permission denied for relation pg_attribute_encoding".to_string(),
            ));
        }
        Ok(state.tables.get(table).cloned().unwrap_or_default())
    }

    async fn materialize_sample(
        &mut self,
        table: &TableRef,
        _row_limit: u64,
        name: &str,
    ) -> WarehouseResult<ObjectHandle> {
        let mut state = self.warehouse.state();
        if state.fail_samples {
            return Err(WarehouseError::Execution(
                "could not create temporary table".to_string(),
            ));
        }
        if !state.tables.contains_key(table) {
            return Err(WarehouseError::NotFound(format!(
                "relation \"{table}\" does not exist"
            )));
        }

        let key = (self.id, name.to_string());
        if state.objects.contains_key(&key) {
            return Err(WarehouseError::Execution(format!(
                "relation \"{name}\" already exists"
            )));
        }
        state.objects.insert(
            key,
            ObjectRecord {
                kind: ObjectKind::Sample,
                column: None,
                config: None,
            },
        );
        state.objects_created += 1;
        Ok(ObjectHandle::sample(name))
    }

    async fn materialize_column(
        &mut self,
        source: &ObjectHandle,
        column: &str,
        config: CandidateConfig,
        name: &str,
    ) -> WarehouseResult<ObjectHandle> {
        // Like a server backend, the statement runs to completion even when
        // the caller stops waiting for it.
        let statement = ColumnStatement {
            warehouse: self.warehouse.clone(),
            session: self.id,
            source: source.name.clone(),
            column: column.to_string(),
            config,
            name: name.to_string(),
            timeout: self.statement_timeout,
        };
        tokio::spawn(statement.run())
            .await
            .map_err(|e| WarehouseError::Connection(format!("backend terminated: {e}")))?
    }

    async fn measure_size(&mut self, handle: &ObjectHandle) -> WarehouseResult<RelationSize> {
        let state = self.warehouse.state();
        let record = state
            .objects
            .get(&(0, handle.name.clone()))
            .or_else(|| state.objects.get(&(self.id, handle.name.clone())))
            .ok_or_else(|| {
                WarehouseError::NotFound(format!("relation \"{}\" does not exist", handle.name))
            })?;

        let (Some(column), Some(config)) = (&record.column, record.config) else {
            return Ok(RelationSize {
                bytes: 0,
                human: pretty_size(0),
            });
        };

        let pair = (column.clone(), config);
        if state.failing_measurements.contains(&pair) {
            return Err(WarehouseError::Execution(
                "could not open relation file".to_string(),
            ));
        }

        let bytes = state
            .sizes
            .get(&pair)
            .copied()
            .unwrap_or_else(|| default_size(column, config));
        Ok(RelationSize {
            bytes,
            human: pretty_size(bytes),
        })
    }

    async fn drop_object(&mut self, handle: &ObjectHandle) -> WarehouseResult<()> {
        let mut state = self.warehouse.state();
        let key = match handle.kind {
            ObjectKind::Sample => (self.id, handle.name.clone()),
            ObjectKind::BenchTable => (0, handle.name.clone()),
        };
        if state.objects.remove(&key).is_some() {
            state.objects_dropped += 1;
        }
        Ok(())
    }
}

/// `CREATE TABLE .. AS` of one candidate, executed detached from the session.
struct ColumnStatement {
    warehouse: InMemoryWarehouse,
    session: u64,
    source: String,
    column: String,
    config: CandidateConfig,
    name: String,
    timeout: Option<Duration>,
}

impl ColumnStatement {
    async fn run(self) -> WarehouseResult<ObjectHandle> {
        let (delay, enforce_timeout) = {
            let state = self.warehouse.state();
            if state.disconnecting_columns.contains(&self.column) {
                return Err(WarehouseError::Connection(
                    "server closed the connection unexpectedly".to_string(),
                ));
            }
            if !state.objects.contains_key(&(self.session, self.source.clone())) {
                return Err(WarehouseError::NotFound(format!(
                    "relation \"{}\" does not exist",
                    self.source
                )));
            }
            let pair = (self.column.clone(), self.config);
            if state.failing_columns.contains(&self.column)
                || state.failing_candidates.contains(&pair)
            {
                return Err(WarehouseError::Execution(format!(
                    "compresstype {} level {} is not supported here",
                    self.config.compression_type, self.config.level
                )));
            }
            (
                state.delays.get(&self.column).copied(),
                !state.ignore_statement_timeouts,
            )
        };

        if let Some(delay) = delay {
            match self.timeout.filter(|limit| enforce_timeout && delay > *limit) {
                Some(limit) => {
                    tokio::time::sleep(limit).await;
                    return Err(WarehouseError::Execution(
                        "canceling statement due to statement timeout".to_string(),
                    ));
                }
                None => tokio::time::sleep(delay).await,
            }
        }

        let mut state = self.warehouse.state();
        let key = (0, self.name.clone());
        if state.objects.contains_key(&key) {
            return Err(WarehouseError::Execution(format!(
                "relation \"{}\" already exists",
                self.name
            )));
        }
        state.objects.insert(
            key,
            ObjectRecord {
                kind: ObjectKind::BenchTable,
                column: Some(self.column),
                config: Some(self.config),
            },
        );
        state.objects_created += 1;
        Ok(ObjectHandle::bench_table(self.name))
    }
}
