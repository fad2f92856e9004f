//! Configuration for the secure data access core.
//!
//! [`CoreConfig`] is read once, at startup, from command line arguments or
//! environment variables and handed to the stores and services at
//! construction. Nothing in the crate reads the environment afterwards.
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `SECURE_CORE_DATABASE_URL` | secure-core.db | SQLite path (`:memory:` allowed) or `postgres://` URL |
//! | `SECURE_CORE_DIALECT` | sqlite | Statement dialect (`sqlite` named, `postgres` positional) |
//! | `SECURE_CORE_LOG_LEVEL` | info | Log level |
//! | `SECURE_CORE_MAX_CONNECTIONS` | 10 | Pool size |
//! | `SECURE_CORE_OPERATION_TIMEOUT` | 30s | Default per-operation deadline |
//! | `SECURE_CORE_KMS_KEY` | unset | Base64 256-bit master key for the local key service |
//! | `SECURE_CORE_KMS_KEY_ID` | local-1 | Key id of that master key |
//! | `SECURE_CORE_DEFAULT_PAGE_SIZE` | 50 | Page size when a caller passes none |
//! | `SECURE_CORE_MAX_PAGE_SIZE` | 500 | Upper clamp for page sizes |
//!
//! # Example
//!
//! ```rust
//! use helios_secure_core::config::CoreConfig;
//! use helios_secure_core::statement::Dialect;
//!
//! let config = CoreConfig {
//!     database_url: ":memory:".to_string(),
//!     dialect: Dialect::Postgres,
//!     ..Default::default()
//! };
//! assert!(config.validate().is_ok());
//! ```

use std::time::Duration;

use clap::Parser;

use crate::context::AccessContext;
use crate::crypto::LocalKeyService;
use crate::error::CoreResult;
use crate::statement::Dialect;
use crate::types::PageRequest;

/// Configuration of stores, key service, deadlines and paging.
#[derive(Debug, Clone, Parser)]
#[command(name = "secure-core-migrate")]
#[command(about = "Applies the Helios secure core schema to a database")]
pub struct CoreConfig {
    /// SQLite path, `:memory:`, or a `postgres://` URL.
    #[arg(long, env = "SECURE_CORE_DATABASE_URL", default_value = "secure-core.db")]
    pub database_url: String,

    /// Statement dialect: `sqlite` (named) or `postgres` (positional).
    #[arg(long, env = "SECURE_CORE_DIALECT", default_value = "sqlite")]
    pub dialect: Dialect,

    /// Log level (error, warn, info, debug, trace).
    #[arg(long, env = "SECURE_CORE_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Maximum pooled connections.
    #[arg(long, env = "SECURE_CORE_MAX_CONNECTIONS", default_value = "10")]
    pub max_connections: u32,

    /// Default deadline applied to contexts built by [`CoreConfig::context`].
    #[arg(
        long,
        env = "SECURE_CORE_OPERATION_TIMEOUT",
        default_value = "30s",
        value_parser = humantime::parse_duration
    )]
    pub operation_timeout: Duration,

    /// Base64 encoded 256-bit master key for the local key service.
    #[arg(long, env = "SECURE_CORE_KMS_KEY", hide_env_values = true)]
    pub kms_key: Option<String>,

    /// Key id of the master key.
    #[arg(long, env = "SECURE_CORE_KMS_KEY_ID", default_value = "local-1")]
    pub kms_key_id: String,

    /// Page size when a caller passes none.
    #[arg(long, env = "SECURE_CORE_DEFAULT_PAGE_SIZE", default_value = "50")]
    pub default_page_size: u32,

    /// Upper clamp for page sizes.
    #[arg(long, env = "SECURE_CORE_MAX_PAGE_SIZE", default_value = "500")]
    pub max_page_size: u32,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            database_url: "secure-core.db".to_string(),
            dialect: Dialect::Sqlite,
            log_level: "info".to_string(),
            max_connections: 10,
            operation_timeout: Duration::from_secs(30),
            kms_key: None,
            kms_key_id: "local-1".to_string(),
            default_page_size: 50,
            max_page_size: 500,
        }
    }
}

impl CoreConfig {
    /// Reads the configuration from environment variables only.
    pub fn from_env() -> Self {
        Self::try_parse_from([env!("CARGO_PKG_NAME")]).unwrap_or_default()
    }

    /// Validates the configuration and returns every problem found.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.database_url.trim().is_empty() {
            errors.push("Database URL cannot be empty".to_string());
        }

        let is_postgres_url = self.database_url.starts_with("postgres://")
            || self.database_url.starts_with("postgresql://");
        if is_postgres_url && self.dialect != Dialect::Postgres {
            errors.push("A postgres database URL requires the postgres dialect".to_string());
        }

        if self.max_connections == 0 {
            errors.push("Max connections cannot be 0".to_string());
        }

        if self.operation_timeout.is_zero() {
            errors.push("Operation timeout cannot be 0".to_string());
        }

        if self.kms_key_id.trim().is_empty() {
            errors.push("KMS key id cannot be empty".to_string());
        } else if self.kms_key_id.len() > usize::from(u8::MAX) {
            errors.push(format!("KMS key id cannot exceed {} bytes", u8::MAX));
        }

        if self.default_page_size == 0 {
            errors.push("Default page size cannot be 0".to_string());
        }

        if self.default_page_size > self.max_page_size {
            errors.push("Default page size cannot exceed max page size".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// In-memory SQLite with a short deadline and small pages.
    pub fn for_testing() -> Self {
        Self {
            database_url: ":memory:".to_string(),
            dialect: Dialect::Sqlite,
            log_level: "debug".to_string(),
            max_connections: 1,
            operation_timeout: Duration::from_secs(5),
            kms_key: None,
            kms_key_id: "test-key".to_string(),
            default_page_size: 10,
            max_page_size: 100,
        }
    }

    /// Builds the local key service from the configured master key.
    ///
    /// Without a configured key an ephemeral one is generated; values
    /// encrypted under it cannot be read after the process exits.
    pub fn key_service(&self) -> CoreResult<LocalKeyService> {
        match &self.kms_key {
            Some(encoded) => LocalKeyService::from_base64_key(self.kms_key_id.clone(), encoded),
            None => {
                tracing::warn!(
                    key_id = %self.kms_key_id,
                    "No master key configured, generating an ephemeral key"
                );
                LocalKeyService::generate(&self.kms_key_id)
            }
        }
    }

    /// Returns a first-page request, using the default size when `limit` is
    /// unset.
    pub fn page_request(&self, limit: Option<u32>, offset: u32) -> PageRequest {
        PageRequest::new(limit.unwrap_or(self.default_page_size), offset)
            .clamped(self.max_page_size)
    }

    /// Returns a context for `actor_id` carrying the default deadline.
    pub fn context(&self, actor_id: impl Into<String>) -> AccessContext {
        AccessContext::new(actor_id).with_timeout(self.operation_timeout)
    }
}
