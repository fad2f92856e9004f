//! PostgreSQL row store.

use std::error::Error;
use std::fmt::Debug;
use std::time::Duration;

use async_trait::async_trait;
use bytes::BytesMut;
use deadpool_postgres::{Config, Pool, Runtime};
use serde::{Deserialize, Serialize};
use tokio_postgres::types::{to_sql_checked, IsNull, ToSql, Type};
use tokio_postgres::NoTls;

use crate::error::{store_error, CoreError, CoreResult, DependencyError};
use crate::statement::{Dialect, Row, SqlValue, Statement};
use crate::store::{ensure_dialect, RowStore};

use super::schema;

const BACKEND_NAME: &str = "postgres";

/// PostgreSQL store backed by a deadpool connection pool.
pub struct PostgresStore {
    pool: Pool,
    config: PostgresStoreConfig,
}

impl Debug for PostgresStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresStore")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Configuration for the PostgreSQL store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostgresStoreConfig {
    /// Maximum number of connections in the pool.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Time to wait for a pooled connection, in seconds.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Statement timeout in milliseconds.
    #[serde(default = "default_statement_timeout_ms")]
    pub statement_timeout_ms: u64,
}

fn default_max_connections() -> usize {
    10
}

fn default_connect_timeout_secs() -> u64 {
    5
}

fn default_statement_timeout_ms() -> u64 {
    30000
}

impl Default for PostgresStoreConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            connect_timeout_secs: default_connect_timeout_secs(),
            statement_timeout_ms: default_statement_timeout_ms(),
        }
    }
}

impl PostgresStore {
    /// Connects to the database named by a `postgres://` URL.
    pub async fn connect(url: &str, config: PostgresStoreConfig) -> CoreResult<Self> {
        let pool = Self::create_pool(url, &config)?;

        // Verify connectivity
        let client = pool.get().await.map_err(unavailable)?;
        drop(client);

        tracing::debug!(max_connections = config.max_connections, "Connected PostgreSQL store");

        Ok(Self { pool, config })
    }

    /// Returns the store configuration.
    pub fn config(&self) -> &PostgresStoreConfig {
        &self.config
    }

    fn create_pool(url: &str, config: &PostgresStoreConfig) -> CoreResult<Pool> {
        let mut cfg = Config::new();
        cfg.url = Some(url.to_string());
        // Applied by the server to every session the pool opens.
        cfg.options = Some(format!("-c statement_timeout={}", config.statement_timeout_ms));

        let pool = cfg
            .builder(NoTls)
            .map_err(|e| pg_error(format!("Failed to create pool builder: {}", e)))?
            .max_size(config.max_connections)
            .wait_timeout(Some(Duration::from_secs(config.connect_timeout_secs)))
            .runtime(Runtime::Tokio1)
            .build()
            .map_err(|e| {
                CoreError::Dependency(DependencyError::Unavailable {
                    service: BACKEND_NAME.to_string(),
                    message: e.to_string(),
                })
            })?;

        Ok(pool)
    }

    async fn client(&self) -> CoreResult<deadpool_postgres::Client> {
        self.pool.get().await.map_err(unavailable)
    }

    async fn query(&self, statement: &Statement) -> CoreResult<Vec<tokio_postgres::Row>> {
        ensure_dialect(Dialect::Postgres, statement)?;
        tracing::debug!(sql = statement.sql(), params = statement.params().len(), "PostgreSQL statement");

        let client = self.client().await?;
        let values = statement.positional_values();
        let params: Vec<&(dyn ToSql + Sync)> =
            values.iter().map(|v| *v as &(dyn ToSql + Sync)).collect();
        Ok(client.query(statement.sql(), &params).await?)
    }
}

fn unavailable(err: deadpool_postgres::PoolError) -> CoreError {
    CoreError::Dependency(DependencyError::Unavailable {
        service: BACKEND_NAME.to_string(),
        message: err.to_string(),
    })
}

fn pg_error(message: String) -> CoreError {
    store_error(BACKEND_NAME, message)
}

impl ToSql for SqlValue {
    fn to_sql(
        &self,
        ty: &Type,
        out: &mut BytesMut,
    ) -> Result<IsNull, Box<dyn Error + Sync + Send>> {
        match self {
            SqlValue::Null => Ok(IsNull::Yes),
            SqlValue::Integer(i) => match *ty {
                Type::INT8 => i.to_sql(ty, out),
                Type::INT4 => i32::try_from(*i)?.to_sql(ty, out),
                Type::INT2 => i16::try_from(*i)?.to_sql(ty, out),
                Type::BOOL => (*i != 0).to_sql(ty, out),
                _ => i.to_string().to_sql(ty, out),
            },
            SqlValue::Text(s) => s.as_str().to_sql(ty, out),
        }
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    to_sql_checked!();
}

fn convert_row(row: &tokio_postgres::Row) -> CoreResult<Row> {
    let mut out = Row::new();
    for (index, column) in row.columns().iter().enumerate() {
        let name = column.name();
        let value = match *column.type_() {
            Type::INT8 => row
                .try_get::<_, Option<i64>>(index)
                .map(|v| v.map_or(SqlValue::Null, SqlValue::Integer)),
            Type::INT4 => row
                .try_get::<_, Option<i32>>(index)
                .map(|v| v.map_or(SqlValue::Null, |i| SqlValue::Integer(i64::from(i)))),
            Type::INT2 => row
                .try_get::<_, Option<i16>>(index)
                .map(|v| v.map_or(SqlValue::Null, |i| SqlValue::Integer(i64::from(i)))),
            Type::BOOL => row
                .try_get::<_, Option<bool>>(index)
                .map(|v| v.map_or(SqlValue::Null, |b| SqlValue::Integer(i64::from(b)))),
            Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME => row
                .try_get::<_, Option<String>>(index)
                .map(|v| v.map_or(SqlValue::Null, SqlValue::Text)),
            ref other => {
                return Err(CoreError::Dependency(DependencyError::Decode {
                    column: name.to_string(),
                    message: format!("unsupported column type {}", other),
                }));
            }
        }
        .map_err(|e| {
            CoreError::Dependency(DependencyError::Decode {
                column: name.to_string(),
                message: e.to_string(),
            })
        })?;
        out.insert(name, value);
    }
    Ok(out)
}

#[async_trait]
impl RowStore for PostgresStore {
    fn backend_name(&self) -> &'static str {
        BACKEND_NAME
    }

    fn dialect(&self) -> Dialect {
        Dialect::Postgres
    }

    fn schema_version(&self) -> i32 {
        schema::SCHEMA_VERSION
    }

    async fn init_schema(&self) -> CoreResult<()> {
        let client = self.client().await?;
        schema::initialize_schema(&client).await
    }

    async fn fetch_optional(&self, statement: &Statement) -> CoreResult<Option<Row>> {
        let rows = self.query(statement).await?;
        rows.first().map(convert_row).transpose()
    }

    async fn fetch_all(&self, statement: &Statement) -> CoreResult<Vec<Row>> {
        let rows = self.query(statement).await?;
        rows.iter().map(convert_row).collect()
    }

    async fn execute(&self, statement: &Statement) -> CoreResult<u64> {
        ensure_dialect(Dialect::Postgres, statement)?;
        tracing::debug!(sql = statement.sql(), params = statement.params().len(), "PostgreSQL statement");

        let client = self.client().await?;
        let values = statement.positional_values();
        let params: Vec<&(dyn ToSql + Sync)> =
            values.iter().map(|v| *v as &(dyn ToSql + Sync)).collect();
        Ok(client.execute(statement.sql(), &params).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_binds_as_bool() {
        let mut out = BytesMut::new();
        let is_null = SqlValue::Integer(1).to_sql(&Type::BOOL, &mut out).unwrap();
        assert!(matches!(is_null, IsNull::No));
        assert_eq!(&out[..], &[1u8]);
    }

    #[test]
    fn test_int4_overflow_is_rejected() {
        let mut out = BytesMut::new();
        assert!(SqlValue::Integer(i64::MAX).to_sql(&Type::INT4, &mut out).is_err());
    }

    #[test]
    fn test_null_binds_as_null() {
        let mut out = BytesMut::new();
        let is_null = SqlValue::Null.to_sql(&Type::TEXT, &mut out).unwrap();
        assert!(matches!(is_null, IsNull::Yes));
    }
}
