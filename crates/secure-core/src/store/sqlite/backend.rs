//! SQLite row store.

use std::fmt::Debug;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::types::{Null, ValueRef};
use serde::{Deserialize, Serialize};

use crate::error::{is_sqlite_unique_violation, store_error, CoreError, CoreResult, DependencyError};
use crate::statement::{Dialect, Row, SqlValue, Statement};
use crate::store::{ensure_dialect, RowStore};

use super::schema;

const BACKEND_NAME: &str = "sqlite";

/// SQLite store backed by an r2d2 connection pool.
pub struct SqliteStore {
    pool: Pool<SqliteConnectionManager>,
    config: SqliteStoreConfig,
    is_memory: bool,
}

impl Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore")
            .field("config", &self.config)
            .field("is_memory", &self.is_memory)
            .finish_non_exhaustive()
    }
}

/// Configuration for the SQLite store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SqliteStoreConfig {
    /// Maximum number of connections in the pool (forced to 1 in memory).
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Connection timeout in milliseconds.
    #[serde(default = "default_connection_timeout_ms")]
    pub connection_timeout_ms: u64,

    /// SQLite busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u32,

    /// Enable WAL mode for file databases.
    #[serde(default = "default_true")]
    pub enable_wal: bool,

    /// Statement dialect this store accepts.
    #[serde(default)]
    pub dialect: Dialect,
}

fn default_max_connections() -> u32 {
    10
}

fn default_connection_timeout_ms() -> u64 {
    30000
}

fn default_busy_timeout_ms() -> u32 {
    5000
}

fn default_true() -> bool {
    true
}

impl Default for SqliteStoreConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            connection_timeout_ms: default_connection_timeout_ms(),
            busy_timeout_ms: default_busy_timeout_ms(),
            enable_wal: true,
            dialect: Dialect::Sqlite,
        }
    }
}

impl SqliteStore {
    /// Creates a new in-memory store with named placeholders.
    pub fn in_memory() -> CoreResult<Self> {
        Self::with_config(":memory:", SqliteStoreConfig::default())
    }

    /// Creates a new in-memory store that accepts the given dialect.
    pub fn in_memory_with_dialect(dialect: Dialect) -> CoreResult<Self> {
        Self::with_config(
            ":memory:",
            SqliteStoreConfig {
                dialect,
                ..Default::default()
            },
        )
    }

    /// Opens or creates a file-based database.
    pub fn open<P: AsRef<Path>>(path: P) -> CoreResult<Self> {
        Self::with_config(path, SqliteStoreConfig::default())
    }

    /// Creates a store with custom configuration.
    pub fn with_config<P: AsRef<Path>>(path: P, config: SqliteStoreConfig) -> CoreResult<Self> {
        let is_memory = path.as_ref().to_string_lossy() == ":memory:";

        let busy_timeout = Duration::from_millis(u64::from(config.busy_timeout_ms));
        let enable_wal = config.enable_wal && !is_memory;
        let manager = SqliteConnectionManager::file(path.as_ref()).with_init(move |conn| {
            conn.busy_timeout(busy_timeout)?;
            if enable_wal {
                conn.pragma_update_and_check(None, "journal_mode", "WAL", |_| Ok(()))?;
            }
            Ok(())
        });

        // Every pooled connection to ":memory:" would be a separate database,
        // so memory stores keep exactly one connection alive for their lifetime.
        let builder = if is_memory {
            Pool::builder()
                .max_size(1)
                .min_idle(Some(1))
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            Pool::builder().max_size(config.max_connections.max(1))
        };

        let pool = builder
            .connection_timeout(Duration::from_millis(config.connection_timeout_ms))
            .build(manager)
            .map_err(|e| {
                CoreError::Dependency(DependencyError::Unavailable {
                    service: BACKEND_NAME.to_string(),
                    message: e.to_string(),
                })
            })?;

        tracing::debug!(
            is_memory,
            dialect = %config.dialect,
            "Opened SQLite store"
        );

        Ok(Self {
            pool,
            config,
            is_memory,
        })
    }

    /// Returns whether this is an in-memory database.
    pub fn is_memory(&self) -> bool {
        self.is_memory
    }

    /// Returns the store configuration.
    pub fn config(&self) -> &SqliteStoreConfig {
        &self.config
    }

    fn get_connection(&self) -> CoreResult<PooledConnection<SqliteConnectionManager>> {
        Ok(self.pool.get()?)
    }

    fn prepare<'c>(
        &self,
        conn: &'c rusqlite::Connection,
        statement: &Statement,
    ) -> CoreResult<rusqlite::Statement<'c>> {
        ensure_dialect(self.config.dialect, statement)?;
        tracing::debug!(sql = statement.sql(), params = statement.params().len(), "SQLite statement");

        let mut stmt = conn
            .prepare(statement.sql())
            .map_err(|e| store_error(BACKEND_NAME, format!("Failed to prepare statement: {}", e)))?;

        for (key, value) in statement.params() {
            // Unreferenced names have no index and are skipped.
            let Some(index) = stmt.parameter_index(&key.placeholder())? else {
                continue;
            };
            match value {
                SqlValue::Null => stmt.raw_bind_parameter(index, Null)?,
                SqlValue::Integer(i) => stmt.raw_bind_parameter(index, i)?,
                SqlValue::Text(s) => stmt.raw_bind_parameter(index, s.as_str())?,
            }
        }

        Ok(stmt)
    }

    fn query_rows(&self, statement: &Statement, limit: Option<usize>) -> CoreResult<Vec<Row>> {
        let conn = self.get_connection()?;
        let mut stmt = self.prepare(&conn, statement)?;
        let names: Vec<String> = stmt.column_names().iter().map(|n| n.to_string()).collect();

        let mut rows = stmt.raw_query();
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let mut decoded = Row::new();
            for (index, name) in names.iter().enumerate() {
                decoded.insert(name.clone(), convert_value(name, row.get_ref(index)?)?);
            }
            out.push(decoded);
            if limit.is_some_and(|l| out.len() >= l) {
                break;
            }
        }
        Ok(out)
    }
}

fn convert_value(column: &str, value: ValueRef<'_>) -> CoreResult<SqlValue> {
    match value {
        ValueRef::Null => Ok(SqlValue::Null),
        ValueRef::Integer(i) => Ok(SqlValue::Integer(i)),
        ValueRef::Real(f) => Ok(SqlValue::Text(f.to_string())),
        ValueRef::Text(bytes) => std::str::from_utf8(bytes)
            .map(|s| SqlValue::Text(s.to_string()))
            .map_err(|e| {
                CoreError::Dependency(DependencyError::Decode {
                    column: column.to_string(),
                    message: e.to_string(),
                })
            }),
        ValueRef::Blob(_) => Err(CoreError::Dependency(DependencyError::Decode {
            column: column.to_string(),
            message: "blob columns are not supported".to_string(),
        })),
    }
}

#[async_trait]
impl RowStore for SqliteStore {
    fn backend_name(&self) -> &'static str {
        BACKEND_NAME
    }

    fn dialect(&self) -> Dialect {
        self.config.dialect
    }

    fn schema_version(&self) -> i32 {
        schema::SCHEMA_VERSION
    }

    async fn init_schema(&self) -> CoreResult<()> {
        let conn = self.get_connection()?;
        schema::initialize_schema(&conn)
    }

    async fn fetch_optional(&self, statement: &Statement) -> CoreResult<Option<Row>> {
        Ok(self.query_rows(statement, Some(1))?.into_iter().next())
    }

    async fn fetch_all(&self, statement: &Statement) -> CoreResult<Vec<Row>> {
        self.query_rows(statement, None)
    }

    async fn execute(&self, statement: &Statement) -> CoreResult<u64> {
        let conn = self.get_connection()?;
        let mut stmt = self.prepare(&conn, statement)?;
        let affected = stmt
            .raw_execute()
            .map_err(|e| {
                if is_sqlite_unique_violation(&e) {
                    CoreError::from(e)
                } else {
                    store_error(BACKEND_NAME, format!("Failed to execute statement: {}", e))
                }
            })?;
        Ok(affected as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::named_params;

    async fn create_store(dialect: Dialect) -> SqliteStore {
        let store = SqliteStore::in_memory_with_dialect(dialect).unwrap();
        store.init_schema().await.unwrap();
        store
    }

    #[tokio::test]
    async fn test_memory_store_shares_one_database() {
        let store = create_store(Dialect::Sqlite).await;
        let builder = store.statement_builder();
        let insert = builder.build(
            "INSERT INTO audit_logs (id, logged_at, actor_id, action, resource_type, resource_id, success)
             VALUES (@id, @at, @actor, 'view', 'patient_identifier', 'r1', 1)",
            named_params! { "id" => "a1", "at" => "2026-01-01T00:00:00.000000Z", "actor" => "u1" },
        );
        assert_eq!(store.execute(&insert).await.unwrap(), 1);

        let select = builder.build(
            "SELECT id, actor_id FROM audit_logs WHERE id = @id",
            named_params! { "id" => "a1" },
        );
        let row = store.fetch_optional(&select).await.unwrap().unwrap();
        assert_eq!(row.decode::<String>("actor_id").unwrap(), "u1");
    }

    #[tokio::test]
    async fn test_missing_row_is_none() {
        let store = create_store(Dialect::Sqlite).await;
        let stmt = store.statement_builder().build(
            "SELECT id FROM patient_identifiers WHERE id = @id",
            named_params! { "id" => "nope" },
        );
        assert!(store.fetch_optional(&stmt).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_positional_emulation_binds_by_position() {
        let store = create_store(Dialect::Postgres).await;
        let builder = store.statement_builder();
        let select = builder.build(
            "SELECT @b AS b, @a AS a, @a AS a_again",
            named_params! { "a" => "first", "b" => 2i64 },
        );
        assert_eq!(select.sql(), "SELECT $2 AS b, $1 AS a, $1 AS a_again");
        let row = store.fetch_optional(&select).await.unwrap().unwrap();
        assert_eq!(row.decode::<String>("a").unwrap(), "first");
        assert_eq!(row.decode::<String>("a_again").unwrap(), "first");
        assert_eq!(row.decode::<i64>("b").unwrap(), 2);
    }

    #[tokio::test]
    async fn test_rejects_foreign_dialect() {
        let store = create_store(Dialect::Sqlite).await;
        let stmt = crate::statement::StatementBuilder::new(Dialect::Postgres)
            .build("SELECT 1", named_params! {});
        let err = store.fetch_all(&stmt).await.unwrap_err();
        assert!(matches!(
            err,
            CoreError::Validation(crate::error::ValidationError::DialectMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn test_audit_rows_cannot_be_changed() {
        let store = create_store(Dialect::Sqlite).await;
        let builder = store.statement_builder();
        let insert = builder.build(
            "INSERT INTO audit_logs (id, logged_at, actor_id, action, resource_type, resource_id, success)
             VALUES ('a1', '2026-01-01T00:00:00.000000Z', 'u1', 'view', 'patient_identifier', 'r1', 1)",
            named_params! {},
        );
        store.execute(&insert).await.unwrap();

        let update = builder.build("UPDATE audit_logs SET success = 0", named_params! {});
        assert!(store.execute(&update).await.is_err());
        let delete = builder.build("DELETE FROM audit_logs", named_params! {});
        assert!(store.execute(&delete).await.is_err());
    }

    #[tokio::test]
    async fn test_duplicate_key_is_a_unique_violation() {
        let store = create_store(Dialect::Sqlite).await;
        let insert = store.statement_builder().build(
            "INSERT INTO audit_logs (id, logged_at, actor_id, action, resource_type, resource_id, success)
             VALUES (@id, '2026-01-01T00:00:00.000000Z', 'u1', 'view', 'patient_identifier', 'r1', 1)",
            named_params! { "id" => "a1" },
        );
        store.execute(&insert).await.unwrap();
        let err = store.execute(&insert).await.unwrap_err();
        assert!(matches!(
            err,
            CoreError::Dependency(DependencyError::UniqueViolation { .. })
        ));

        // Trigger aborts stay generic store errors.
        let update = store
            .statement_builder()
            .build("UPDATE audit_logs SET success = 0", named_params! {});
        let err = store.execute(&update).await.unwrap_err();
        assert!(matches!(err, CoreError::Dependency(DependencyError::Store { .. })));
    }

    #[tokio::test]
    async fn test_reports_applied_schema_version() {
        let store = create_store(Dialect::Postgres).await;
        let stmt = store.statement_builder().build(
            "SELECT version FROM schema_version LIMIT 1",
            named_params! {},
        );
        let row = store.fetch_optional(&stmt).await.unwrap().unwrap();
        assert_eq!(row.decode::<i64>("version").unwrap(), i64::from(store.schema_version()));
        assert_eq!(store.schema_version(), schema::SCHEMA_VERSION);
    }

    #[tokio::test]
    async fn test_file_store_reopens_schema() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("core.db");
        {
            let store = SqliteStore::open(&path).unwrap();
            store.init_schema().await.unwrap();
        }
        let store = SqliteStore::open(&path).unwrap();
        store.init_schema().await.unwrap();
        assert!(!store.is_memory());
    }
}
