//! Shared fixtures for the secure core integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};

use helios_secure_core::crypto::{KeyManagementService, KmsError, LocalKeyService};
use helios_secure_core::error::{CoreError, CoreResult, DependencyError};
use helios_secure_core::source::IdentitySource;
use helios_secure_core::statement::{Dialect, Row, Statement};
use helios_secure_core::store::sqlite::{SqliteStore, SqliteStoreConfig};
use helios_secure_core::store::{DynStore, RowStore};
use helios_secure_core::{AccessContext, CoreConfig, SecureCore};

/// Base instant of the stepping clock.
pub fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap()
}

/// A clock that advances one second per reading and sequential ids.
#[derive(Debug, Default)]
pub struct SteppingSource {
    ticks: AtomicI64,
    ids: AtomicI64,
}

impl IdentitySource for SteppingSource {
    fn new_id(&self) -> String {
        format!("id-{:04}", self.ids.fetch_add(1, Ordering::SeqCst) + 1)
    }

    fn now(&self) -> DateTime<Utc> {
        let tick = self.ticks.fetch_add(1, Ordering::SeqCst);
        epoch() + chrono::Duration::seconds(tick)
    }
}

/// A key service that cannot be reached.
#[derive(Debug)]
pub struct DownKms;

#[async_trait]
impl KeyManagementService for DownKms {
    fn name(&self) -> &str {
        "down-kms"
    }

    async fn encrypt(&self, _plaintext: &[u8], _aad: &[u8]) -> Result<Vec<u8>, KmsError> {
        Err(KmsError::Unavailable("connection refused".to_string()))
    }

    async fn decrypt(&self, _ciphertext: &[u8], _aad: &[u8]) -> Result<Vec<u8>, KmsError> {
        Err(KmsError::Unavailable("connection refused".to_string()))
    }
}

/// A key service that answers only after `delay`.
#[derive(Debug)]
pub struct SlowKms {
    pub inner: LocalKeyService,
    pub delay: Duration,
}

#[async_trait]
impl KeyManagementService for SlowKms {
    fn name(&self) -> &str {
        "slow-kms"
    }

    async fn encrypt(&self, plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>, KmsError> {
        tokio::time::sleep(self.delay).await;
        self.inner.encrypt(plaintext, aad).await
    }

    async fn decrypt(&self, ciphertext: &[u8], aad: &[u8]) -> Result<Vec<u8>, KmsError> {
        tokio::time::sleep(self.delay).await;
        self.inner.decrypt(ciphertext, aad).await
    }
}

/// A store whose audit inserts fail while every other statement succeeds.
#[derive(Debug)]
pub struct AuditFailingStore {
    pub inner: SqliteStore,
}

#[async_trait]
impl RowStore for AuditFailingStore {
    fn backend_name(&self) -> &'static str {
        "audit-failing"
    }

    fn dialect(&self) -> Dialect {
        self.inner.dialect()
    }

    fn schema_version(&self) -> i32 {
        self.inner.schema_version()
    }

    async fn init_schema(&self) -> CoreResult<()> {
        self.inner.init_schema().await
    }

    async fn fetch_optional(&self, statement: &Statement) -> CoreResult<Option<Row>> {
        self.inner.fetch_optional(statement).await
    }

    async fn fetch_all(&self, statement: &Statement) -> CoreResult<Vec<Row>> {
        self.inner.fetch_all(statement).await
    }

    async fn execute(&self, statement: &Statement) -> CoreResult<u64> {
        if statement.sql().starts_with("INSERT INTO audit_logs") {
            return Err(CoreError::Dependency(DependencyError::Unavailable {
                service: "audit-store".to_string(),
                message: "disk full".to_string(),
            }));
        }
        self.inner.execute(statement).await
    }
}

/// A store that, once armed, runs a statement of its own just before the
/// next statement starting with `trigger` executes.
#[derive(Debug)]
pub struct InterleavingStore {
    pub inner: SqliteStore,
    pub trigger: &'static str,
    interleaved: parking_lot::Mutex<Option<Statement>>,
}

impl InterleavingStore {
    pub fn new(inner: SqliteStore, trigger: &'static str) -> Self {
        Self {
            inner,
            trigger,
            interleaved: parking_lot::Mutex::new(None),
        }
    }

    /// Queues `statement` to run ahead of the next triggering statement.
    pub fn arm(&self, statement: Statement) {
        *self.interleaved.lock() = Some(statement);
    }
}

#[async_trait]
impl RowStore for InterleavingStore {
    fn backend_name(&self) -> &'static str {
        "interleaving"
    }

    fn dialect(&self) -> Dialect {
        self.inner.dialect()
    }

    fn schema_version(&self) -> i32 {
        self.inner.schema_version()
    }

    async fn init_schema(&self) -> CoreResult<()> {
        self.inner.init_schema().await
    }

    async fn fetch_optional(&self, statement: &Statement) -> CoreResult<Option<Row>> {
        self.inner.fetch_optional(statement).await
    }

    async fn fetch_all(&self, statement: &Statement) -> CoreResult<Vec<Row>> {
        self.inner.fetch_all(statement).await
    }

    async fn execute(&self, statement: &Statement) -> CoreResult<u64> {
        if statement.sql().starts_with(self.trigger) {
            let pending = self.interleaved.lock().take();
            if let Some(interleaved) = pending {
                self.inner.execute(&interleaved).await?;
            }
        }
        self.inner.execute(statement).await
    }
}

/// Creates an initialized in-memory store speaking `dialect`.
pub async fn create_store(dialect: Dialect) -> DynStore {
    let store = SqliteStore::with_config(
        ":memory:",
        SqliteStoreConfig {
            dialect,
            ..Default::default()
        },
    )
    .expect("Failed to create SQLite store");
    store.init_schema().await.expect("Failed to initialize schema");
    Arc::new(store)
}

/// Wires the core over `store` with a local key service and a stepping clock.
pub fn create_core_with(store: DynStore, kms: Arc<dyn KeyManagementService>) -> SecureCore {
    SecureCore::from_parts(
        store,
        kms,
        Arc::new(SteppingSource::default()),
        &CoreConfig::for_testing(),
    )
}

/// An in-memory core using the named dialect.
pub async fn create_core() -> SecureCore {
    create_core_in(Dialect::Sqlite).await
}

/// An in-memory core using `dialect`.
pub async fn create_core_in(dialect: Dialect) -> SecureCore {
    let store = create_store(dialect).await;
    create_core_with(store, Arc::new(LocalKeyService::generate("test-key").unwrap()))
}

/// A context for a clinical user.
pub fn clinician() -> AccessContext {
    AccessContext::new("dr-okafor")
        .with_ip_address("10.1.2.3")
        .with_user_agent("ward-tablet/4.1")
}

/// A context for another principal.
pub fn registrar() -> AccessContext {
    AccessContext::new("registrar-2")
}
