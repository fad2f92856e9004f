//! Helios Secure Data Access Core
//!
//! This crate is the data access layer under the Helios clinical record
//! services. It stores sensitive patient identifiers encrypted and bound to
//! their owner, writes an append-only audit trail of every access, and keeps
//! clinical entities consistent under concurrent edits with version-checked
//! updates.
//!
//! # Features
//!
//! - **Dialect-aware statements**: queries are written once with `@name`
//!   placeholders and rendered for named or positional stores
//! - **Envelope encryption**: identifiers are encrypted with a per-value data
//!   key, authenticated against the owning subject
//! - **Audit trail**: decrypts and mutations are recorded, never rewritten
//! - **Optimistic concurrency**: a stale writer gets a conflict, never a lost
//!   update
//!
//! # Backend Features
//!
//! - `sqlite` (default) - SQLite with in-memory and file modes
//! - `postgres` - PostgreSQL via deadpool
//!
//! # Architecture
//!
//! - [`statement`] - statement builder, column values and row mapping
//! - [`store`] - the [`RowStore`](store::RowStore) trait and its backends
//! - [`crypto`] - key management service seam and envelope encryption
//! - [`audit`] - audit entries and the [`AuditTrail`]
//! - [`vault`] - the [`IdentifierVault`]
//! - [`versioned`] - version-stamped clinical entities
//! - [`config`] - [`CoreConfig`] from arguments and environment
//!
//! # Quick Start
//!
//! ```no_run
//! use helios_secure_core::config::CoreConfig;
//! use helios_secure_core::vault::{IdentifierKind, NewIdentifier};
//! use helios_secure_core::SecureCore;
//!
//! # async fn demo() -> helios_secure_core::CoreResult<()> {
//! let config = CoreConfig::from_env();
//! let core = SecureCore::open(&config).await?;
//!
//! let ctx = config.context("registrar");
//! let identifier = core
//!     .vault()
//!     .create(&ctx, NewIdentifier::new("P1", IdentifierKind::NationalId, "123456789012"))
//!     .await?;
//! let revealed = core.vault().reveal(&ctx, &identifier).await?;
//! # let _ = revealed;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod audit;
pub mod config;
pub mod context;
pub mod crypto;
pub mod error;
pub mod services;
pub mod source;
pub mod statement;
pub mod store;
pub mod types;
pub mod vault;
pub mod versioned;

// Re-export commonly used types at crate root
pub use audit::{AuditAction, AuditLogEntry, AuditTrail};
pub use config::CoreConfig;
pub use context::AccessContext;
pub use error::{CoreError, CoreResult};
pub use services::SecureCore;
pub use statement::{Dialect, Statement, StatementBuilder};
pub use types::{Page, PageRequest};
pub use vault::IdentifierVault;
pub use versioned::{VersionedEntity, VersionedRepository};

/// Initializes the tracing subscriber for logging.
///
/// `RUST_LOG` takes precedence; otherwise this crate logs at `level`.
/// Call once at application startup.
pub fn init_logging(level: &str) {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("helios_secure_core={}", level)));

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();
}

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name.
pub const NAME: &str = env!("CARGO_PKG_NAME");
