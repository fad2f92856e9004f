//! Row store abstraction and backend implementations.
//!
//! The store is the only shared mutable resource of the core. It executes
//! statements produced by the [`StatementBuilder`] and offers three
//! primitives: read an optional row (with a well-defined "not found"),
//! read many rows, and execute one atomic statement reporting affected rows.
//!
//! | Backend | Feature | Dialect |
//! |---------|---------|---------|
//! | SQLite | `sqlite` (default) | named (`@name`), or positional emulation |
//! | PostgreSQL | `postgres` | positional (`$n`) |

use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::CoreConfig;
use crate::error::{CoreResult, ValidationError};
use crate::statement::{Dialect, Row, Statement, StatementBuilder};

#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "postgres")]
pub mod postgres;

/// A parameterized-statement row store.
#[async_trait]
pub trait RowStore: Send + Sync + Debug {
    /// Returns a short backend name used in errors and logs.
    fn backend_name(&self) -> &'static str;

    /// Returns the dialect this store executes.
    fn dialect(&self) -> Dialect;

    /// Returns the schema version [`init_schema`](Self::init_schema) brings
    /// the database to.
    fn schema_version(&self) -> i32;

    /// Returns a statement builder for this store's dialect.
    fn statement_builder(&self) -> StatementBuilder {
        StatementBuilder::new(self.dialect())
    }

    /// Creates or migrates the schema.
    async fn init_schema(&self) -> CoreResult<()>;

    /// Returns the first row, or `None` if nothing matched.
    async fn fetch_optional(&self, statement: &Statement) -> CoreResult<Option<Row>>;

    /// Returns every matching row.
    async fn fetch_all(&self, statement: &Statement) -> CoreResult<Vec<Row>>;

    /// Executes one atomic statement and returns the number of affected rows.
    async fn execute(&self, statement: &Statement) -> CoreResult<u64>;
}

/// Shared handle to a row store.
pub type DynStore = Arc<dyn RowStore>;

/// Rejects statements built for a different dialect than the store's.
pub(crate) fn ensure_dialect(store: Dialect, statement: &Statement) -> CoreResult<()> {
    if statement.dialect() == store {
        Ok(())
    } else {
        Err(ValidationError::DialectMismatch {
            statement: statement.dialect().to_string(),
            store: store.to_string(),
        }
        .into())
    }
}

/// Opens the store named by the configuration and applies the schema.
pub async fn open_store(config: &CoreConfig) -> CoreResult<DynStore> {
    let url = config.database_url.as_str();

    if url.starts_with("postgres://") || url.starts_with("postgresql://") {
        #[cfg(feature = "postgres")]
        {
            let store = postgres::PostgresStore::connect(
                url,
                postgres::PostgresStoreConfig {
                    max_connections: config.max_connections as usize,
                    ..Default::default()
                },
            )
            .await?;
            store.init_schema().await?;
            return Ok(Arc::new(store));
        }
        #[cfg(not(feature = "postgres"))]
        {
            return Err(crate::error::CoreError::Dependency(
                crate::error::DependencyError::Unavailable {
                    service: "postgres".to_string(),
                    message: "built without the 'postgres' feature".to_string(),
                },
            ));
        }
    }

    #[cfg(feature = "sqlite")]
    {
        let store = sqlite::SqliteStore::with_config(
            url,
            sqlite::SqliteStoreConfig {
                max_connections: config.max_connections,
                dialect: config.dialect,
                ..Default::default()
            },
        )?;
        store.init_schema().await?;
        Ok(Arc::new(store))
    }

    #[cfg(not(feature = "sqlite"))]
    {
        Err(crate::error::CoreError::Dependency(
            crate::error::DependencyError::Unavailable {
                service: "sqlite".to_string(),
                message: "built without the 'sqlite' feature".to_string(),
            },
        ))
    }
}
