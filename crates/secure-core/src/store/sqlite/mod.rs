//! SQLite row store.
//!
//! Supports in-memory databases for tests and file databases for small
//! deployments. The store natively executes [`Dialect::Sqlite`] statements
//! (named `@name` placeholders). Configured with [`Dialect::Postgres`] it
//! accepts positional statements instead, binding each `$n` token by
//! position, so positional code paths can be exercised without a server.
//!
//! ```no_run
//! use helios_secure_core::store::RowStore;
//! use helios_secure_core::store::sqlite::SqliteStore;
//!
//! # async fn demo() -> helios_secure_core::CoreResult<()> {
//! let store = SqliteStore::in_memory()?;
//! store.init_schema().await?;
//! # Ok(())
//! # }
//! ```
//!
//! [`Dialect::Sqlite`]: crate::statement::Dialect::Sqlite
//! [`Dialect::Postgres`]: crate::statement::Dialect::Postgres

mod backend;
pub(crate) mod schema;

pub use backend::{SqliteStore, SqliteStoreConfig};
pub use schema::SCHEMA_VERSION;
