use async_trait::async_trait;
use std::time::Duration;
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions, PgRow};
use sqlx::{Column, Postgres, Row as _};

use super::{
    CatalogRow, ObjectHandle, QueryResult, Row, Statement, Warehouse, WarehouseError,
    WarehouseResult, WarehouseSession, quote_ident,
};
use crate::config::DatabaseConfig;
use crate::model::{CandidateConfig, RelationSize, TableRef};

const COLUMN_CATALOG_SQL: &str = r#"
    SELECT a.attname::text AS column_name,
           a.attnum::int4 AS attnum,
           e.attoptions::text[] AS col_opts
    FROM pg_catalog.pg_attribute a
    LEFT JOIN pg_catalog.pg_attribute_encoding e
           ON e.attrelid = a.attrelid AND e.attnum = a.attnum
    LEFT JOIN pg_catalog.pg_class c ON c.oid = a.attrelid
    LEFT JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
    WHERE a.attnum > 0
      AND NOT a.attisdropped
      AND c.relname = $1
      AND n.nspname = $2
    ORDER BY a.attnum
"#;

const MEASURE_SQL: &str = r#"
    SELECT pg_relation_size($1::regclass)::int8 AS size,
           pg_size_pretty(pg_relation_size($1::regclass)) AS size_h
"#;

/// Greenplum (PostgreSQL wire protocol) warehouse backed by a `sqlx` pool.
///
/// Every session checks out one pooled connection, so temporary objects are
/// scoped to the worker holding it. The connection is closed rather than
/// recycled when the session ends.
#[derive(Clone)]
pub struct GreenplumWarehouse {
    pool: PgPool,
}

impl GreenplumWarehouse {
    /// Connect a pool sized for `max_sessions` concurrent sessions.
    pub async fn connect(config: &DatabaseConfig, max_sessions: u32) -> WarehouseResult<Self> {
        let options = connect_options(config)?;
        log::info!(
            "Connecting to warehouse at {}:{} (database {})",
            options.get_host(),
            options.get_port(),
            options.get_database().unwrap_or("<default>")
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_sessions.max(1))
            .acquire_timeout(config.connect_timeout)
            .connect_with(options)
            .await
            .map_err(|e| {
                log::error!("Failed to connect to warehouse: {e}");
                WarehouseError::Connection(e.to_string())
            })?;

        log::info!("Warehouse connection established successfully");
        Ok(Self { pool })
    }

    /// Wrap an existing pool.
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn connect_options(config: &DatabaseConfig) -> WarehouseResult<PgConnectOptions> {
    let options = match &config.dsn {
        Some(dsn) => dsn
            .parse::<PgConnectOptions>()
            .map_err(|e| WarehouseError::Connection(format!("Invalid DSN: {e}")))?,
        None => {
            let options = PgConnectOptions::new()
                .host(&config.host)
                .port(config.port)
                .username(&config.user)
                .database(&config.database);
            match &config.password {
                Some(password) => options.password(password),
                None => options,
            }
        }
    };
    Ok(options.application_name("cwizard"))
}

#[async_trait]
impl Warehouse for GreenplumWarehouse {
    type Session = GreenplumSession;

    async fn session(&self) -> WarehouseResult<GreenplumSession> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| WarehouseError::Connection(e.to_string()))?;
        // Temporary samples must not outlive the session that created them
        conn.close_on_drop();
        Ok(GreenplumSession { conn })
    }
}

/// One pooled connection.
pub struct GreenplumSession {
    conn: PoolConnection<Postgres>,
}

impl GreenplumSession {
    async fn execute(&mut self, sql: &str) -> WarehouseResult<()> {
        log::debug!("{}", sql.trim());
        sqlx::Executor::execute(&mut *self.conn, sqlx::raw_sql(sql)).await?;
        Ok(())
    }
}

#[async_trait]
impl WarehouseSession for GreenplumSession {
    async fn set_statement_timeout(&mut self, limit: Duration) -> WarehouseResult<()> {
        // Zero disables the server-side limit
        let millis = limit.as_millis().max(1);
        self.execute(&format!("SET statement_timeout = {millis}")).await
    }

    async fn run_query(&mut self, statement: &Statement) -> WarehouseResult<QueryResult> {
        if !statement.returns_rows() && statement.params().is_empty() {
            self.execute(statement.sql()).await?;
            return Ok(QueryResult::NoRows);
        }

        log::debug!("{}", statement.sql().trim());
        let mut query = sqlx::query(statement.sql());
        for param in statement.params() {
            query = query.bind(param.as_str());
        }

        if statement.returns_rows() {
            let rows = query.fetch_all(&mut *self.conn).await?;
            Ok(QueryResult::Rows(rows.iter().map(text_row).collect()))
        } else {
            query.execute(&mut *self.conn).await?;
            Ok(QueryResult::NoRows)
        }
    }

    async fn column_catalog(&mut self, table: &TableRef) -> WarehouseResult<Vec<CatalogRow>> {
        let rows = sqlx::query(COLUMN_CATALOG_SQL)
            .bind(table.table.as_str())
            .bind(table.schema.as_str())
            .fetch_all(&mut *self.conn)
            .await?;

        let mut columns = Vec::with_capacity(rows.len());
        for row in rows {
            columns.push(CatalogRow {
                name: row.try_get("column_name")?,
                ordinal: row.try_get("attnum")?,
                options: row.try_get("col_opts")?,
            });
        }
        Ok(columns)
    }

    async fn materialize_sample(
        &mut self,
        table: &TableRef,
        row_limit: u64,
        name: &str,
    ) -> WarehouseResult<ObjectHandle> {
        let sql = format!(
            "CREATE TEMPORARY TABLE {} AS SELECT * FROM {} LIMIT {row_limit}",
            quote_ident(name),
            table.qualified()
        );
        self.execute(&sql).await?;
        Ok(ObjectHandle::sample(name))
    }

    async fn materialize_column(
        &mut self,
        source: &ObjectHandle,
        column: &str,
        config: CandidateConfig,
        name: &str,
    ) -> WarehouseResult<ObjectHandle> {
        let sql = format!(
            r#"
            CREATE TABLE {name}
            WITH (
              appendonly=true,
              orientation=column,
              compresstype={compresstype},
              compresslevel={compresslevel}
            )
            AS (SELECT {column} FROM {source})
            "#,
            name = quote_ident(name),
            compresstype = config.compression_type,
            compresslevel = config.level,
            column = quote_ident(column),
            source = quote_ident(&source.name),
        );
        self.execute(&sql).await?;
        Ok(ObjectHandle::bench_table(name))
    }

    async fn measure_size(&mut self, handle: &ObjectHandle) -> WarehouseResult<RelationSize> {
        let row = sqlx::query(MEASURE_SQL)
            .bind(quote_ident(&handle.name))
            .fetch_one(&mut *self.conn)
            .await?;

        let size: i64 = row.try_get("size")?;
        let bytes = u64::try_from(size).map_err(|_| {
            WarehouseError::Decode(format!("negative size {size} reported for {}", handle.name))
        })?;
        Ok(RelationSize {
            bytes,
            human: row.try_get("size_h")?,
        })
    }

    async fn drop_object(&mut self, handle: &ObjectHandle) -> WarehouseResult<()> {
        self.execute(&format!("DROP TABLE IF EXISTS {}", quote_ident(&handle.name)))
            .await
    }
}

/// Render a row as text, trying the scalar types rebuild statements and
/// catalog queries produce.
fn text_row(row: &PgRow) -> Row {
    let columns = row
        .columns()
        .iter()
        .map(|column| {
            let index = column.ordinal();
            let value = row
                .try_get::<Option<String>, _>(index)
                .ok()
                .flatten()
                .or_else(|| scalar_text::<i64>(row, index))
                .or_else(|| scalar_text::<i32>(row, index))
                .or_else(|| scalar_text::<i16>(row, index))
                .or_else(|| scalar_text::<f64>(row, index))
                .or_else(|| scalar_text::<bool>(row, index));
            (column.name().to_string(), value)
        })
        .collect();
    Row::new(columns)
}

fn scalar_text<T>(row: &PgRow, index: usize) -> Option<String>
where
    T: ToString + for<'r> sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
{
    row.try_get::<Option<T>, _>(index)
        .ok()
        .flatten()
        .map(|value| value.to_string())
}

impl From<sqlx::Error> for WarehouseError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            let code = db_err.code().map(|c| c.into_owned()).unwrap_or_default();
            let message = db_err.message().to_string();
            return match code.as_str() {
                "42501" => WarehouseError::PermissionDenied(message),
                "42P01" | "3F000" => WarehouseError::NotFound(message),
                c if c.starts_with("08") || c.starts_with("28") || c.starts_with("57P") => {
                    WarehouseError::Connection(message)
                }
                _ => WarehouseError::Execution(message),
            };
        }

        match err {
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => WarehouseError::Connection(err.to_string()),
            sqlx::Error::ColumnDecode { .. }
            | sqlx::Error::Decode(_)
            | sqlx::Error::ColumnNotFound(_)
            | sqlx::Error::ColumnIndexOutOfBounds { .. }
            | sqlx::Error::TypeNotFound { .. }
            | sqlx::Error::RowNotFound => WarehouseError::Decode(err.to_string()),
            _ => WarehouseError::Execution(err.to_string()),
        }
    }
}
