//! Identifier vault integration tests.
//!
//! Exercises encryption binding, decrypt auditing, soft deletion and the
//! failure paths of the vault against an in-memory SQLite store.

mod common;

use std::sync::Arc;
use std::time::Duration;

use helios_secure_core::audit::IDENTIFIER_RESOURCE_TYPE;
use helios_secure_core::crypto::{CIPHERTEXT_TAG, LocalKeyService};
use helios_secure_core::error::{
    AuditError, ConcurrencyError, CoreError, DependencyError, ValidationError,
};
use helios_secure_core::named_params;
use helios_secure_core::statement::{Dialect, Filter, insert_sql};
use helios_secure_core::store::sqlite::SqliteStore;
use helios_secure_core::store::RowStore;
use helios_secure_core::vault::{
    IdentifierKind, IdentifierPatch, NewIdentifier, SensitiveIdentifier, VerificationStatus,
};
use helios_secure_core::{AccessContext, AuditAction, AuditLogEntry, PageRequest, SecureCore};

use common::{
    AuditFailingStore, DownKms, InterleavingStore, SlowKms, clinician, create_core,
    create_core_with, create_store, epoch, registrar,
};

const NATIONAL_ID: &str = "123456789012";

async fn audit_for(core: &SecureCore, subject_id: &str) -> Vec<AuditLogEntry> {
    core.audit()
        .by_subject(&clinician(), subject_id, PageRequest::first(100))
        .await
        .unwrap()
        .items
}

fn decrypt_entries(entries: &[AuditLogEntry]) -> Vec<&AuditLogEntry> {
    entries
        .iter()
        .filter(|e| e.action == AuditAction::Decrypt)
        .collect()
}

async fn create_national_id(core: &SecureCore, subject_id: &str) -> SensitiveIdentifier {
    core.vault()
        .create(
            &registrar(),
            NewIdentifier::new(subject_id, IdentifierKind::NationalId, NATIONAL_ID).primary(),
        )
        .await
        .unwrap()
}

// ============================================================================
// Create and read
// ============================================================================

#[tokio::test]
async fn test_national_id_is_stored_encrypted() {
    let core = create_core().await;
    let created = create_national_id(&core, "P1").await;

    assert!(created.value.starts_with(CIPHERTEXT_TAG));
    assert!(!created.value.contains(NATIONAL_ID));
    assert_eq!(created.verification_status, VerificationStatus::Unverified);
    assert_eq!(created.created_by, "registrar-2");

    let opaque = core.vault().get(&clinician(), &created.id, false).await.unwrap();
    assert_eq!(opaque.value, created.value);

    let revealed = core.vault().get(&clinician(), &created.id, true).await.unwrap();
    assert_eq!(revealed.value, NATIONAL_ID);
}

#[tokio::test]
async fn test_non_sensitive_kind_is_stored_as_given() {
    let core = create_core().await;
    let created = core
        .vault()
        .create(
            &registrar(),
            NewIdentifier::new("P1", IdentifierKind::InsuranceId, "INS-0042")
                .issued_by("National Health Insurance", Some("NHI".to_string())),
        )
        .await
        .unwrap();
    assert_eq!(created.value, "INS-0042");

    let fetched = core.vault().get(&clinician(), &created.id, true).await.unwrap();
    assert_eq!(fetched.value, "INS-0042");
    assert_eq!(fetched.issuer_code.as_deref(), Some("NHI"));

    let entries = audit_for(&core, "P1").await;
    assert!(decrypt_entries(&entries).is_empty());
}

#[tokio::test]
async fn test_blank_value_is_rejected() {
    let core = create_core().await;
    let err = core
        .vault()
        .create(
            &registrar(),
            NewIdentifier::new("P1", IdentifierKind::NationalId, "  "),
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        CoreError::Validation(ValidationError::InvalidValue { .. })
    ));
    assert!(core.vault().list_by_subject(&registrar(), "P1", false).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_returned_identifier_matches_a_later_read() {
    let core = create_core().await;
    let from = epoch() + chrono::Duration::nanoseconds(123_456_789);
    let to = from + chrono::Duration::days(3650) + chrono::Duration::nanoseconds(999);
    let created = core
        .vault()
        .create(
            &registrar(),
            NewIdentifier::new("P1", IdentifierKind::InsuranceId, "INS-77")
                .valid_between(Some(from), Some(to)),
        )
        .await
        .unwrap();
    assert_eq!(
        created.valid_from,
        Some(epoch() + chrono::Duration::microseconds(123_456))
    );

    let fetched = core.vault().get(&clinician(), &created.id, false).await.unwrap();
    assert_eq!(fetched, created);

    let patch = IdentifierPatch {
        valid_to: Some(Some(to + chrono::Duration::nanoseconds(1))),
        ..Default::default()
    };
    let updated = core
        .vault()
        .update(&clinician(), &created.id, patch)
        .await
        .unwrap();
    let fetched = core.vault().get(&clinician(), &created.id, false).await.unwrap();
    assert_eq!(fetched, updated);
}

#[tokio::test]
async fn test_missing_identifier_is_not_found() {
    let core = create_core().await;
    let err = core.vault().get(&clinician(), "nope", true).await.unwrap_err();
    assert!(err.is_not_found());
}

// ============================================================================
// Decrypt auditing
// ============================================================================

#[tokio::test]
async fn test_each_decrypt_writes_one_audit_entry() {
    let core = create_core().await;
    let created = create_national_id(&core, "P1").await;

    core.vault().get(&clinician(), &created.id, true).await.unwrap();
    core.vault().get(&clinician(), &created.id, true).await.unwrap();
    core.vault().get(&clinician(), &created.id, false).await.unwrap();

    let entries = audit_for(&core, "P1").await;
    let decrypts = decrypt_entries(&entries);
    assert_eq!(decrypts.len(), 2);

    let entry = decrypts[0];
    assert!(entry.success);
    assert_eq!(entry.actor_id, "dr-okafor");
    assert_eq!(entry.resource_type, IDENTIFIER_RESOURCE_TYPE);
    assert_eq!(entry.resource_id, created.id);
    assert_eq!(entry.ip_address.as_deref(), Some("10.1.2.3"));
    assert_eq!(entry.user_agent.as_deref(), Some("ward-tablet/4.1"));
    let fields = entry.fields_accessed.as_ref().unwrap();
    assert_eq!(fields["identifier_type"], "national_id");
    assert_eq!(fields["operation"], "decrypt");

    let serialized = serde_json::to_string(&entries).unwrap();
    assert!(!serialized.contains(NATIONAL_ID));
}

#[tokio::test]
async fn test_list_by_subject_decrypts_and_audits_each_value() {
    let core = create_core().await;
    create_national_id(&core, "P1").await;
    core.vault()
        .create(
            &registrar(),
            NewIdentifier::new("P1", IdentifierKind::NationalId, "999988887777"),
        )
        .await
        .unwrap();
    core.vault()
        .create(
            &registrar(),
            NewIdentifier::new("P1", IdentifierKind::MedicalRecordNumber, "MRN-7"),
        )
        .await
        .unwrap();

    let identifiers = core.vault().list_by_subject(&clinician(), "P1", true).await.unwrap();
    let values: Vec<_> = identifiers.iter().map(|i| i.value.as_str()).collect();
    assert_eq!(values, vec![NATIONAL_ID, "999988887777", "MRN-7"]);

    let entries = audit_for(&core, "P1").await;
    assert_eq!(decrypt_entries(&entries).len(), 2);
}

#[tokio::test]
async fn test_ciphertext_copied_to_another_subject_fails_authentication() {
    let core = create_core().await;
    let original = create_national_id(&core, "P1").await;

    // Move P1's ciphertext onto a row owned by P2.
    let forged = SensitiveIdentifier {
        id: "forged-1".to_string(),
        subject_id: "P2".to_string(),
        ..original.clone()
    };
    let (sql, params) = insert_sql(&forged);
    let statement = core.store().statement_builder().build(&sql, params);
    core.store().execute(&statement).await.unwrap();

    let err = core.vault().get(&clinician(), "forged-1", true).await.unwrap_err();
    assert!(err.is_authentication());
    assert!(!err.to_string().contains(NATIONAL_ID));

    let entries = audit_for(&core, "P2").await;
    let decrypts = decrypt_entries(&entries);
    assert_eq!(decrypts.len(), 1);
    assert!(!decrypts[0].success);
    assert_eq!(decrypts[0].resource_id, "forged-1");
    assert_eq!(
        decrypts[0].error_message.as_deref(),
        Some("ciphertext failed authentication")
    );

    // The genuine row still decrypts for its owner.
    let revealed = core.vault().reveal(&clinician(), &original).await.unwrap();
    assert_eq!(revealed, NATIONAL_ID);
}

// ============================================================================
// Update, verify and delete
// ============================================================================

#[tokio::test]
async fn test_update_re_encrypts_new_value() {
    let core = create_core().await;
    let created = create_national_id(&core, "P1").await;

    let updated = core
        .vault()
        .update(
            &registrar(),
            &created.id,
            IdentifierPatch::new().value("555566667777"),
        )
        .await
        .unwrap();
    assert!(updated.value.starts_with(CIPHERTEXT_TAG));
    assert_ne!(updated.value, created.value);
    assert!(updated.updated_at > created.updated_at);

    let revealed = core.vault().get(&clinician(), &created.id, true).await.unwrap();
    assert_eq!(revealed.value, "555566667777");

    let entries = audit_for(&core, "P1").await;
    let update = entries
        .iter()
        .find(|e| e.action == AuditAction::Update)
        .unwrap();
    let fields = update.fields_accessed.as_ref().unwrap();
    assert_eq!(fields["fields"], serde_json::json!(["identifier_value"]));
}

#[tokio::test]
async fn test_empty_update_is_rejected() {
    let core = create_core().await;
    let created = create_national_id(&core, "P1").await;
    let err = core
        .vault()
        .update(&registrar(), &created.id, IdentifierPatch::new())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        CoreError::Validation(ValidationError::EmptyPatch { .. })
    ));
}

#[tokio::test]
async fn test_verify_stamps_verifier_and_cannot_be_undone() {
    let core = create_core().await;
    let created = create_national_id(&core, "P1").await;

    let verified = core.vault().verify(&clinician(), &created.id).await.unwrap();
    assert_eq!(verified.verification_status, VerificationStatus::Verified);
    assert_eq!(verified.verified_by.as_deref(), Some("dr-okafor"));
    assert!(verified.verified_at.is_some());

    let stored = core.vault().get(&clinician(), &created.id, false).await.unwrap();
    assert_eq!(stored.verification_status, VerificationStatus::Verified);
    assert_eq!(stored.verified_at, verified.verified_at);

    let err = core
        .vault()
        .update(
            &clinician(),
            &created.id,
            IdentifierPatch::new().status(VerificationStatus::Unverified),
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        CoreError::Validation(ValidationError::IllegalTransition { .. })
    ));
}

#[tokio::test]
async fn test_status_write_loses_to_a_verify_committed_after_the_read() {
    let inner = SqliteStore::in_memory().unwrap();
    inner.init_schema().await.unwrap();
    let store = Arc::new(InterleavingStore::new(inner, "UPDATE patient_identifiers SET"));
    let core = create_core_with(
        store.clone(),
        Arc::new(LocalKeyService::generate("test-key").unwrap()),
    );
    let created = create_national_id(&core, "P1").await;

    // Another writer verifies the identifier between the vault's read and its write.
    store.arm(store.statement_builder().build(
        "UPDATE patient_identifiers SET verification_status = @status, verified_by = @actor \
         WHERE id = @id",
        named_params! { "status" => "verified", "actor" => "registrar-2", "id" => created.id.as_str() },
    ));

    let err = core
        .vault()
        .update(
            &clinician(),
            &created.id,
            IdentifierPatch::new().status(VerificationStatus::Unverified),
        )
        .await
        .unwrap_err();
    match err {
        CoreError::Concurrency(ConcurrencyError::StatusChanged {
            expected, actual, ..
        }) => {
            assert_eq!(expected, "unverified");
            assert_eq!(actual, "verified");
        }
        other => panic!("expected status conflict, got {other:?}"),
    }

    let stored = core.vault().get(&clinician(), &created.id, false).await.unwrap();
    assert_eq!(stored.verification_status, VerificationStatus::Verified);
    assert_eq!(stored.verified_by.as_deref(), Some("registrar-2"));

    // The rejected write is not audited.
    let updates = audit_for(&core, "P1")
        .await
        .into_iter()
        .filter(|e| e.action == AuditAction::Update)
        .count();
    assert_eq!(updates, 0);
}

#[tokio::test]
async fn test_soft_deleted_identifier_is_hidden_from_reads() {
    let core = create_core().await;
    let created = create_national_id(&core, "P1").await;

    core.vault().delete(&registrar(), &created.id).await.unwrap();

    let err = core.vault().get(&clinician(), &created.id, true).await.unwrap_err();
    assert!(err.is_not_found());
    assert!(core.vault().list_by_subject(&clinician(), "P1", false).await.unwrap().is_empty());
    assert!(
        core.vault()
            .primary(&clinician(), "P1", IdentifierKind::NationalId, false)
            .await
            .unwrap()
            .is_none()
    );

    let replay = core
        .vault()
        .get_including_deleted(&registrar(), &created.id)
        .await
        .unwrap();
    assert!(replay.is_deleted);
    assert!(replay.deleted_at.is_some());
    assert_eq!(replay.value, created.value);

    let second = core.vault().delete(&registrar(), &created.id).await.unwrap_err();
    assert!(second.is_not_found());

    let entries = audit_for(&core, "P1").await;
    assert_eq!(
        entries.iter().filter(|e| e.action == AuditAction::Delete).count(),
        1
    );
}

// ============================================================================
// Primary and listing
// ============================================================================

#[tokio::test]
async fn test_primary_returns_most_recently_updated() {
    let core = create_core().await;
    let first = create_national_id(&core, "P1").await;
    let second = core
        .vault()
        .create(
            &registrar(),
            NewIdentifier::new("P1", IdentifierKind::NationalId, "222233334444").primary(),
        )
        .await
        .unwrap();

    let primary = core
        .vault()
        .primary(&clinician(), "P1", IdentifierKind::NationalId, true)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(primary.id, second.id);
    assert_eq!(primary.value, "222233334444");

    core.vault()
        .update(&registrar(), &first.id, IdentifierPatch::new().primary(true))
        .await
        .unwrap();
    let primary = core
        .vault()
        .primary(&clinician(), "P1", IdentifierKind::NationalId, false)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(primary.id, first.id);

    let none = core
        .vault()
        .primary(&clinician(), "P1", IdentifierKind::InsuranceId, false)
        .await
        .unwrap();
    assert!(none.is_none());
}

#[tokio::test]
async fn test_list_pages_with_filter() {
    let core = create_core().await;
    for value in ["MRN-1", "MRN-2", "MRN-3"] {
        core.vault()
            .create(
                &registrar(),
                NewIdentifier::new("P1", IdentifierKind::MedicalRecordNumber, value),
            )
            .await
            .unwrap();
    }
    core.vault()
        .create(
            &registrar(),
            NewIdentifier::new("P2", IdentifierKind::MedicalRecordNumber, "MRN-9"),
        )
        .await
        .unwrap();

    let filter = Filter::new().eq("subject_id", "P1");
    let page = core
        .vault()
        .list(&clinician(), filter.clone(), PageRequest::first(2), false)
        .await
        .unwrap();
    assert_eq!(page.total, 3);
    assert_eq!(page.items.len(), 2);
    assert!(page.has_more());

    let rest = core
        .vault()
        .list(&clinician(), filter, page.request.next(), false)
        .await
        .unwrap();
    assert_eq!(rest.items.len(), 1);
    assert_eq!(rest.items[0].value, "MRN-3");
    assert!(!rest.has_more());
}

// ============================================================================
// Dependency failures
// ============================================================================

#[tokio::test]
async fn test_unavailable_key_service_fails_create() {
    let store = create_store(Dialect::Sqlite).await;
    let core = create_core_with(store, Arc::new(DownKms));

    let err = core
        .vault()
        .create(
            &registrar(),
            NewIdentifier::new("P1", IdentifierKind::NationalId, NATIONAL_ID),
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        CoreError::Dependency(DependencyError::Unavailable { .. })
    ));
    assert!(err.is_retryable());
    assert!(core.vault().list_by_subject(&registrar(), "P1", false).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_deadline_bounds_key_service_call() {
    let store = create_store(Dialect::Sqlite).await;
    let kms = SlowKms {
        inner: LocalKeyService::generate("slow-1").unwrap(),
        delay: Duration::from_secs(5),
    };
    let core = create_core_with(store, Arc::new(kms));

    let ctx = AccessContext::new("registrar-2").with_timeout(Duration::from_millis(50));
    let err = core
        .vault()
        .create(
            &ctx,
            NewIdentifier::new("P1", IdentifierKind::NationalId, NATIONAL_ID),
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        CoreError::Dependency(DependencyError::DeadlineExceeded { .. })
    ));
}

#[tokio::test]
async fn test_expired_deadline_fails_before_any_call() {
    let core = create_core().await;
    let ctx = AccessContext::new("registrar-2").with_timeout(Duration::ZERO);
    let err = core.vault().get(&ctx, "anything", false).await.unwrap_err();
    assert!(matches!(
        err,
        CoreError::Dependency(DependencyError::DeadlineExceeded { .. })
    ));
}

#[tokio::test]
async fn test_audit_write_failure_fails_the_operation() {
    let inner = SqliteStore::in_memory().unwrap();
    inner.init_schema().await.unwrap();
    let store = Arc::new(AuditFailingStore { inner });
    let core = create_core_with(store, Arc::new(LocalKeyService::generate("test-key").unwrap()));

    let err = core
        .vault()
        .create(
            &registrar(),
            NewIdentifier::new("P1", IdentifierKind::NationalId, NATIONAL_ID),
        )
        .await
        .unwrap_err();
    match err {
        CoreError::Audit(AuditError::WriteFailed { action, .. }) => assert_eq!(action, "create"),
        other => panic!("expected audit failure, got {other:?}"),
    }

    // The identifier write itself is already durable.
    let stored = core.vault().list_by_subject(&registrar(), "P1", false).await.unwrap();
    assert_eq!(stored.len(), 1);

    // No plaintext is released when the decrypt cannot be audited.
    let err = core.vault().reveal(&clinician(), &stored[0]).await.unwrap_err();
    assert!(matches!(err, CoreError::Audit(_)));
}
