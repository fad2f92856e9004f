//! PostgreSQL backend integration tests.
//!
//! These tests start a real PostgreSQL instance in Docker with
//! testcontainers and run the vault, audit and optimistic locking paths
//! against it.
//!
//! Run with: `cargo test -p helios-secure-core --features postgres -- postgres_integration`
//!
//! Skip if no Docker:
//!   `cargo test -p helios-secure-core --features postgres -- --skip postgres_integration`

#![cfg(feature = "postgres")]

mod common;

use helios_secure_core::store::postgres::PostgresStoreConfig;

// ============================================================================
// Configuration Tests (no PostgreSQL instance required)
// ============================================================================

#[test]
fn test_postgres_store_config_defaults() {
    let config = PostgresStoreConfig::default();
    assert_eq!(config.max_connections, 10);
    assert_eq!(config.connect_timeout_secs, 5);
    assert_eq!(config.statement_timeout_ms, 30000);
}

#[test]
fn test_postgres_store_config_serialization() {
    let config: PostgresStoreConfig =
        serde_json::from_str(r#"{"max_connections": 3}"#).unwrap();
    assert_eq!(config.max_connections, 3);
    assert_eq!(config.statement_timeout_ms, 30000);
}

// ============================================================================
// Integration Tests (requires Docker for testcontainers)
// ============================================================================

mod postgres_integration {
    use std::sync::Arc;

    use serde_json::json;

    use helios_secure_core::crypto::{CIPHERTEXT_TAG, LocalKeyService};
    use helios_secure_core::error::{CoreError, ResourceError, ValidationError};
    use helios_secure_core::named_params;
    use helios_secure_core::source::SystemSource;
    use helios_secure_core::statement::{Dialect, Filter};
    use helios_secure_core::store::postgres::{PostgresStore, PostgresStoreConfig, SCHEMA_VERSION};
    use helios_secure_core::store::{DynStore, RowStore};
    use helios_secure_core::vault::{IdentifierKind, NewIdentifier, VerificationStatus};
    use helios_secure_core::versioned::{ClinicalRecord, ClinicalRecordPatch};
    use helios_secure_core::{AuditAction, CoreConfig, PageRequest, SecureCore};

    use testcontainers::ImageExt;
    use testcontainers::runners::AsyncRunner;
    use testcontainers_modules::postgres::Postgres;
    use tokio::sync::OnceCell;

    use super::common::{clinician, registrar};

    /// Shared PostgreSQL container reused across all tests in this module.
    struct SharedPg {
        url: String,
        /// Kept alive for the duration of the test binary; dropped at process exit.
        _container: testcontainers::ContainerAsync<Postgres>,
    }

    static SHARED_PG: OnceCell<SharedPg> = OnceCell::const_new();

    async fn shared_pg() -> &'static SharedPg {
        SHARED_PG
            .get_or_init(|| async {
                let run_id = std::env::var("GITHUB_RUN_ID").unwrap_or_default();
                let container = Postgres::default()
                    .with_label("github.run_id", &run_id)
                    .start()
                    .await
                    .expect("Failed to start PostgreSQL container");

                let port = container
                    .get_host_port_ipv4(5432)
                    .await
                    .expect("Failed to get host port");
                let host = container.get_host().await.expect("Failed to get host");
                let url = format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

                // Initialize schema once on the shared container.
                let store = PostgresStore::connect(&url, PostgresStoreConfig::default())
                    .await
                    .expect("Failed to connect PostgresStore");
                store.init_schema().await.expect("Failed to initialize schema");

                SharedPg {
                    url,
                    _container: container,
                }
            })
            .await
    }

    async fn create_store() -> PostgresStore {
        let pg = shared_pg().await;
        PostgresStore::connect(
            &pg.url,
            PostgresStoreConfig {
                max_connections: 5,
                ..Default::default()
            },
        )
        .await
        .expect("Failed to connect PostgresStore")
    }

    /// Tests share one database, so ids come from UUIDs rather than a counter.
    async fn create_core() -> SecureCore {
        let store: DynStore = Arc::new(create_store().await);
        SecureCore::from_parts(
            store,
            Arc::new(LocalKeyService::generate("pg-key").unwrap()),
            Arc::new(SystemSource),
            &CoreConfig::for_testing(),
        )
    }

    /// A subject id no other test uses.
    fn unique_subject(prefix: &str) -> String {
        format!("{}-{}", prefix, uuid::Uuid::new_v4().simple())
    }

    #[tokio::test]
    async fn postgres_integration_schema_is_current_and_idempotent() {
        let store = create_store().await;
        assert_eq!(store.dialect(), Dialect::Postgres);
        assert_eq!(store.schema_version(), SCHEMA_VERSION);
        store.init_schema().await.unwrap();

        let stmt = store.statement_builder().build(
            "SELECT version FROM schema_version LIMIT @one",
            named_params! { "one" => 1i64 },
        );
        let row = store.fetch_optional(&stmt).await.unwrap().unwrap();
        assert_eq!(row.decode::<i64>("version").unwrap(), i64::from(SCHEMA_VERSION));
    }

    #[tokio::test]
    async fn postgres_integration_vault_round_trip_is_audited() {
        let core = create_core().await;
        let subject = unique_subject("P");

        let created = core
            .vault()
            .create(
                &registrar(),
                NewIdentifier::new(subject.as_str(), IdentifierKind::NationalId, "123456789012")
                    .primary(),
            )
            .await
            .unwrap();
        assert!(created.value.starts_with(CIPHERTEXT_TAG));

        let opaque = core.vault().get(&clinician(), &created.id, false).await.unwrap();
        assert_eq!(opaque, created);

        let primary = core
            .vault()
            .primary(&clinician(), &subject, IdentifierKind::NationalId, true)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(primary.value, "123456789012");

        let verified = core.vault().verify(&clinician(), &created.id).await.unwrap();
        assert_eq!(verified.verification_status, VerificationStatus::Verified);

        let audit = core
            .audit()
            .by_subject(&registrar(), &subject, PageRequest::first(10))
            .await
            .unwrap();
        let actions: Vec<AuditAction> = audit.items.iter().map(|e| e.action).collect();
        assert_eq!(audit.total, 3);
        assert!(actions.contains(&AuditAction::Create));
        assert!(actions.contains(&AuditAction::Decrypt));
        assert!(actions.contains(&AuditAction::Update));
    }

    #[tokio::test]
    async fn postgres_integration_list_pages_with_count() {
        let core = create_core().await;
        let subject = unique_subject("P");
        for n in 0..3 {
            core.vault()
                .create(
                    &registrar(),
                    NewIdentifier::new(
                        subject.as_str(),
                        IdentifierKind::InsuranceId,
                        format!("INS-{n}"),
                    ),
                )
                .await
                .unwrap();
        }

        let page = core
            .vault()
            .list(
                &clinician(),
                Filter::new().eq("subject_id", subject.as_str()),
                PageRequest::new(2, 0),
                false,
            )
            .await
            .unwrap();
        assert_eq!(page.total, 3);
        assert_eq!(page.items.len(), 2);
        assert!(page.has_more());
    }

    #[tokio::test]
    async fn postgres_integration_stale_version_conflicts() {
        let core = create_core().await;
        let patient = unique_subject("P");
        let record = core
            .clinical_records()
            .create(
                &clinician(),
                ClinicalRecord::new(patient.as_str(), "progress_note", "Day 1", json!({"ok": true})),
            )
            .await
            .unwrap();

        let patch = ClinicalRecordPatch {
            title: Some("Day 1 (amended)".to_string()),
            ..Default::default()
        };
        let updated = core
            .clinical_records()
            .update_with_version(&clinician(), &record.meta.id, 1, &patch)
            .await
            .unwrap();
        assert_eq!(updated.meta.version, 2);
        assert_eq!(
            core.clinical_records()
                .get(&registrar(), &record.meta.id)
                .await
                .unwrap(),
            updated
        );

        let err = core
            .clinical_records()
            .update_with_version(&registrar(), &record.meta.id, 1, &patch)
            .await
            .unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn postgres_integration_duplicate_id_already_exists() {
        let core = create_core().await;
        let mut record = ClinicalRecord::new(
            unique_subject("P").as_str(),
            "discharge_summary",
            "Discharge",
            json!({}),
        );
        record.meta.id = unique_subject("rec");

        core.clinical_records()
            .create(&clinician(), record.clone())
            .await
            .unwrap();
        let err = core
            .clinical_records()
            .create(&clinician(), record)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CoreError::Resource(ResourceError::AlreadyExists { .. })
        ));
    }

    #[tokio::test]
    async fn postgres_integration_audit_rows_are_append_only() {
        let core = create_core().await;
        let subject = unique_subject("P");
        core.vault()
            .create(
                &registrar(),
                NewIdentifier::new(subject.as_str(), IdentifierKind::InsuranceId, "INS-1"),
            )
            .await
            .unwrap();
        let entry = core
            .audit()
            .by_subject(&registrar(), &subject, PageRequest::first(1))
            .await
            .unwrap()
            .items
            .remove(0);

        let builder = core.store().statement_builder();
        let update = builder.build(
            "UPDATE audit_logs SET success = 0 WHERE id = @id",
            named_params! { "id" => entry.id.as_str() },
        );
        assert!(core.store().execute(&update).await.is_err());
        let delete = builder.build(
            "DELETE FROM audit_logs WHERE id = @id",
            named_params! { "id" => entry.id.as_str() },
        );
        assert!(core.store().execute(&delete).await.is_err());
        assert_eq!(core.audit().get(&registrar(), &entry.id).await.unwrap(), entry);
    }

    #[tokio::test]
    async fn postgres_integration_rejects_named_statements() {
        let store = create_store().await;
        let stmt = helios_secure_core::StatementBuilder::new(Dialect::Sqlite)
            .build("SELECT 1", named_params! {});
        let err = store.fetch_all(&stmt).await.unwrap_err();
        assert!(matches!(
            err,
            CoreError::Validation(ValidationError::DialectMismatch { .. })
        ));
    }
}
