//! Identifier vault service.

use std::sync::Arc;

use crate::audit::{AuditAction, AuditTrail, DEFAULT_MAX_PAGE_SIZE};
use crate::context::AccessContext;
use crate::crypto::EncryptionService;
use crate::error::{ConcurrencyError, CoreError, CoreResult, CryptoError, ValidationError};
use crate::named_params;
use crate::source::IdentitySource;
use crate::statement::{
    decode, insert_sql, select_columns, stored_form, Filter, Mapped, NamedParams, Patch,
    Statement,
};
use crate::store::DynStore;
use crate::types::{Page, PageRequest};

use super::types::{
    IdentifierKind, IdentifierPatch, NewIdentifier, SensitiveIdentifier, VerificationStatus,
};

const RESOURCE_TYPE: &str = SensitiveIdentifier::RESOURCE_TYPE;

/// Owns the lifecycle of subject identifiers.
///
/// Sensitive values are encrypted bound to their owning subject before they
/// are stored and stay opaque on every read unless decryption is requested.
/// Each decrypt appends an audit entry before the plaintext is returned, and
/// each create, update and delete appends one as well. Deleted identifiers are
/// flagged, never removed, and are invisible to every read except
/// [`get_including_deleted`](Self::get_including_deleted).
#[derive(Debug, Clone)]
pub struct IdentifierVault {
    store: DynStore,
    encryption: EncryptionService,
    audit: AuditTrail,
    source: Arc<dyn IdentitySource>,
    max_page_size: u32,
}

impl IdentifierVault {
    /// Creates a vault.
    pub fn new(
        store: DynStore,
        encryption: EncryptionService,
        audit: AuditTrail,
        source: Arc<dyn IdentitySource>,
    ) -> Self {
        Self {
            store,
            encryption,
            audit,
            source,
            max_page_size: DEFAULT_MAX_PAGE_SIZE,
        }
    }

    /// Sets the page size clamp for [`list`](Self::list).
    pub fn with_max_page_size(mut self, max_page_size: u32) -> Self {
        self.max_page_size = max_page_size.max(1);
        self
    }

    /// Returns the audit trail this vault writes to.
    pub fn audit_trail(&self) -> &AuditTrail {
        &self.audit
    }

    /// Creates an identifier in the `unverified` state.
    pub async fn create(
        &self,
        ctx: &AccessContext,
        input: NewIdentifier,
    ) -> CoreResult<SensitiveIdentifier> {
        require_non_blank("subject_id", &input.subject_id)?;
        require_non_blank("identifier_value", &input.value)?;

        let value = if input.kind.is_sensitive() {
            ctx.run(
                "vault.create",
                self.encryption.encrypt(&input.value, &input.subject_id),
            )
            .await?
        } else {
            input.value
        };

        let now = self.source.now();
        let identifier = stored_form(&SensitiveIdentifier {
            id: self.source.new_id(),
            subject_id: input.subject_id,
            kind: input.kind,
            value,
            is_primary: input.is_primary,
            valid_from: input.valid_from,
            valid_to: input.valid_to,
            issuer_name: input.issuer_name,
            issuer_code: input.issuer_code,
            verification_status: VerificationStatus::Unverified,
            verified_at: None,
            verified_by: None,
            created_at: now,
            created_by: ctx.actor_id().to_string(),
            updated_at: now,
            updated_by: ctx.actor_id().to_string(),
            is_deleted: false,
            deleted_at: None,
        })?;

        let (sql, params) = insert_sql(&identifier);
        self.execute(ctx, "vault.create", &sql, params)
            .await
            .map_err(|e| e.on_insert(RESOURCE_TYPE, &identifier.id))?;

        tracing::info!(
            identifier_id = %identifier.id,
            subject_id = %identifier.subject_id,
            kind = %identifier.kind,
            "Created identifier"
        );

        self.audit
            .log_identifier_mutation(
                ctx,
                AuditAction::Create,
                &identifier.id,
                &identifier.subject_id,
                identifier.kind.as_str(),
                &["identifier_type", "identifier_value"],
            )
            .await?;

        Ok(identifier)
    }

    /// Returns a live identifier, decrypting its value if requested.
    pub async fn get(
        &self,
        ctx: &AccessContext,
        id: &str,
        decrypt: bool,
    ) -> CoreResult<SensitiveIdentifier> {
        let mut identifier = self.fetch_live(ctx, "vault.get", id).await?;
        if decrypt {
            identifier.value = self.reveal(ctx, &identifier).await?;
        }
        Ok(identifier)
    }

    /// Returns the live identifiers of a subject, oldest first.
    pub async fn list_by_subject(
        &self,
        ctx: &AccessContext,
        subject_id: &str,
        decrypt: bool,
    ) -> CoreResult<Vec<SensitiveIdentifier>> {
        let mut params = NamedParams::new();
        let where_clause = Filter::new()
            .eq("subject_id", subject_id)
            .exclude_deleted()
            .render(&mut params);
        let sql = format!(
            "SELECT {} FROM {} {} ORDER BY created_at ASC, id ASC",
            select_columns::<SensitiveIdentifier>(),
            SensitiveIdentifier::TABLE,
            where_clause
        );
        let mut identifiers = self
            .fetch_all(ctx, "vault.list_by_subject", &sql, params)
            .await?;
        if decrypt {
            self.reveal_all(ctx, &mut identifiers).await?;
        }
        Ok(identifiers)
    }

    /// Returns one page of live identifiers matching `filter`.
    pub async fn list(
        &self,
        ctx: &AccessContext,
        filter: Filter,
        page: PageRequest,
        decrypt: bool,
    ) -> CoreResult<Page<SensitiveIdentifier>> {
        let page = page.clamped(self.max_page_size);
        let mut params = NamedParams::new();
        let where_clause = filter.exclude_deleted().render(&mut params);

        let count_sql = format!(
            "SELECT COUNT(*) AS total FROM {} {}",
            SensitiveIdentifier::TABLE,
            where_clause
        );
        let count = self.build(&count_sql, params.clone());
        let total = ctx
            .run("vault.list", self.store.fetch_optional(&count))
            .await
            .map_err(|e| e.in_operation("vault.list"))?
            .map(|row| row.decode::<i64>("total"))
            .transpose()?
            .unwrap_or(0);

        params.extend(named_params! { "limit" => page.limit, "offset" => page.offset });
        let sql = format!(
            "SELECT {} FROM {} {} ORDER BY created_at ASC, id ASC LIMIT @limit OFFSET @offset",
            select_columns::<SensitiveIdentifier>(),
            SensitiveIdentifier::TABLE,
            where_clause
        );
        let mut items = self.fetch_all(ctx, "vault.list", &sql, params).await?;
        if decrypt {
            self.reveal_all(ctx, &mut items).await?;
        }

        Ok(Page {
            items,
            total: total.max(0) as u64,
            request: page,
        })
    }

    /// Applies the present fields of `patch` to a live identifier.
    ///
    /// A new value for a sensitive kind is re-encrypted bound to the
    /// unchanged owning subject. Moving to `verified` stamps the verifier.
    /// A status change is written only while the stored status is still the
    /// one the transition was checked against; otherwise the update fails
    /// with [`ConcurrencyError::StatusChanged`].
    pub async fn update(
        &self,
        ctx: &AccessContext,
        id: &str,
        patch: IdentifierPatch,
    ) -> CoreResult<SensitiveIdentifier> {
        if patch.is_empty() {
            return Err(ValidationError::EmptyPatch {
                resource_type: RESOURCE_TYPE.to_string(),
                id: id.to_string(),
            }
            .into());
        }

        let mut identifier = self.fetch_live(ctx, "vault.update", id).await?;

        if let Some(next) = patch.verification_status {
            if !identifier.verification_status.can_transition_to(next) {
                return Err(ValidationError::IllegalTransition {
                    from: identifier.verification_status.to_string(),
                    to: next.to_string(),
                }
                .into());
            }
        }

        let mut stored = patch;
        if let Some(value) = stored.value.take() {
            require_non_blank("identifier_value", &value)?;
            stored.value = Some(if identifier.kind.is_sensitive() {
                ctx.run(
                    "vault.update",
                    self.encryption.encrypt(&value, &identifier.subject_id),
                )
                .await?
            } else {
                value
            });
        }

        let changed = stored.assignments().columns();
        let now = self.source.now();
        let mut assignments = stored.assignments();
        assignments.set("updated_at", now);
        assignments.set("updated_by", ctx.actor_id());
        let verifying = stored.verification_status == Some(VerificationStatus::Verified);
        if verifying {
            assignments.set("verified_at", now);
            assignments.set("verified_by", ctx.actor_id());
        }

        let mut params = named_params! { "id" => id };
        let set_clause = assignments.render(&mut params);
        let mut sql = format!(
            "UPDATE {} SET {} WHERE id = @id AND is_deleted = 0",
            SensitiveIdentifier::TABLE,
            set_clause
        );
        let guarded = stored.verification_status.is_some();
        if guarded {
            sql.push_str(" AND verification_status = @current_status");
            params.extend(named_params! { "current_status" => identifier.verification_status });
        }
        let affected = self.execute(ctx, "vault.update", &sql, params).await?;
        if affected == 0 {
            if guarded {
                let current = self.fetch_live(ctx, "vault.update", id).await?;
                tracing::warn!(
                    identifier_id = %id,
                    expected = %identifier.verification_status,
                    actual = %current.verification_status,
                    "Verification status changed concurrently"
                );
                return Err(ConcurrencyError::StatusChanged {
                    resource_type: RESOURCE_TYPE.to_string(),
                    id: id.to_string(),
                    expected: identifier.verification_status.to_string(),
                    actual: current.verification_status.to_string(),
                }
                .into());
            }
            return Err(CoreError::not_found(RESOURCE_TYPE, id));
        }

        stored.apply_to(&mut identifier);
        identifier.updated_at = now;
        identifier.updated_by = ctx.actor_id().to_string();
        if verifying {
            identifier.verified_at = Some(now);
            identifier.verified_by = Some(ctx.actor_id().to_string());
        }
        let identifier = stored_form(&identifier)?;

        tracing::debug!(identifier_id = %id, fields = ?changed, "Updated identifier");

        self.audit
            .log_identifier_mutation(
                ctx,
                AuditAction::Update,
                &identifier.id,
                &identifier.subject_id,
                identifier.kind.as_str(),
                &changed,
            )
            .await?;

        Ok(identifier)
    }

    /// Marks a live identifier as verified by the acting principal.
    pub async fn verify(&self, ctx: &AccessContext, id: &str) -> CoreResult<SensitiveIdentifier> {
        self.update(
            ctx,
            id,
            IdentifierPatch::new().status(VerificationStatus::Verified),
        )
        .await
    }

    /// Soft-deletes a live identifier.
    pub async fn delete(&self, ctx: &AccessContext, id: &str) -> CoreResult<()> {
        let identifier = self.fetch_live(ctx, "vault.delete", id).await?;
        let now = self.source.now();
        let sql = format!(
            "UPDATE {} SET is_deleted = 1, deleted_at = @now, updated_at = @now, updated_by = @actor \
             WHERE id = @id AND is_deleted = 0",
            SensitiveIdentifier::TABLE
        );
        let params = named_params! { "id" => id, "now" => now, "actor" => ctx.actor_id() };
        let affected = self.execute(ctx, "vault.delete", &sql, params).await?;
        if affected == 0 {
            return Err(CoreError::not_found(RESOURCE_TYPE, id));
        }

        tracing::info!(identifier_id = %id, subject_id = %identifier.subject_id, "Deleted identifier");

        self.audit
            .log_identifier_mutation(
                ctx,
                AuditAction::Delete,
                &identifier.id,
                &identifier.subject_id,
                identifier.kind.as_str(),
                &["is_deleted"],
            )
            .await?;
        Ok(())
    }

    /// Returns the live primary identifier of a kind for a subject.
    ///
    /// Exclusivity is not enforced by the store. When several primaries exist
    /// the most recently updated one is returned and a warning is logged.
    pub async fn primary(
        &self,
        ctx: &AccessContext,
        subject_id: &str,
        kind: IdentifierKind,
        decrypt: bool,
    ) -> CoreResult<Option<SensitiveIdentifier>> {
        let mut params = NamedParams::new();
        let where_clause = Filter::new()
            .eq("subject_id", subject_id)
            .eq("identifier_type", kind)
            .eq("is_primary", true)
            .exclude_deleted()
            .render(&mut params);
        let sql = format!(
            "SELECT {} FROM {} {} ORDER BY updated_at DESC, id DESC",
            select_columns::<SensitiveIdentifier>(),
            SensitiveIdentifier::TABLE,
            where_clause
        );
        let candidates = self.fetch_all(ctx, "vault.primary", &sql, params).await?;
        if candidates.len() > 1 {
            tracing::warn!(
                subject_id,
                kind = %kind,
                count = candidates.len(),
                "Multiple primary identifiers"
            );
        }

        let Some(mut identifier) = candidates.into_iter().next() else {
            return Ok(None);
        };
        if decrypt {
            identifier.value = self.reveal(ctx, &identifier).await?;
        }
        Ok(Some(identifier))
    }

    /// Returns an identifier whether or not it is deleted, value left opaque.
    ///
    /// Intended for compliance replay only.
    pub async fn get_including_deleted(
        &self,
        ctx: &AccessContext,
        id: &str,
    ) -> CoreResult<SensitiveIdentifier> {
        let sql = format!(
            "SELECT {} FROM {} WHERE id = @id",
            select_columns::<SensitiveIdentifier>(),
            SensitiveIdentifier::TABLE
        );
        self.fetch_one(ctx, "vault.get_including_deleted", &sql, named_params! { "id" => id })
            .await?
            .ok_or_else(|| CoreError::not_found(RESOURCE_TYPE, id))
    }

    /// Returns the plaintext value of an identifier.
    ///
    /// Non-sensitive values are returned as stored without an audit entry.
    /// Sensitive values are decrypted bound to the identifier's subject; the
    /// decrypt audit entry is written before the plaintext is returned. A
    /// failed decrypt is audited with `success = false` and then returned.
    pub async fn reveal(
        &self,
        ctx: &AccessContext,
        identifier: &SensitiveIdentifier,
    ) -> CoreResult<String> {
        if !identifier.kind.is_sensitive() {
            return Ok(identifier.value.clone());
        }

        let decrypted = ctx
            .run(
                "vault.decrypt",
                self.encryption
                    .decrypt(&identifier.value, &identifier.subject_id),
            )
            .await;

        match decrypted {
            Ok(plaintext) => {
                self.audit
                    .log_identifier_decrypt(
                        ctx,
                        &identifier.id,
                        &identifier.subject_id,
                        identifier.kind.as_str(),
                        None,
                    )
                    .await?;
                Ok(plaintext)
            }
            Err(err) => {
                tracing::warn!(
                    identifier_id = %identifier.id,
                    subject_id = %identifier.subject_id,
                    error = %err,
                    "Identifier decrypt failed"
                );
                self.audit
                    .log_identifier_decrypt(
                        ctx,
                        &identifier.id,
                        &identifier.subject_id,
                        identifier.kind.as_str(),
                        Some(decrypt_failure_text(&err)),
                    )
                    .await?;
                Err(err)
            }
        }
    }

    async fn reveal_all(
        &self,
        ctx: &AccessContext,
        identifiers: &mut [SensitiveIdentifier],
    ) -> CoreResult<()> {
        for identifier in identifiers.iter_mut() {
            identifier.value = self.reveal(ctx, identifier).await?;
        }
        Ok(())
    }

    async fn fetch_live(
        &self,
        ctx: &AccessContext,
        operation: &str,
        id: &str,
    ) -> CoreResult<SensitiveIdentifier> {
        let sql = format!(
            "SELECT {} FROM {} WHERE id = @id AND is_deleted = 0",
            select_columns::<SensitiveIdentifier>(),
            SensitiveIdentifier::TABLE
        );
        self.fetch_one(ctx, operation, &sql, named_params! { "id" => id })
            .await?
            .ok_or_else(|| CoreError::not_found(RESOURCE_TYPE, id))
    }

    fn build(&self, sql: &str, params: NamedParams) -> Statement {
        self.store.statement_builder().build(sql, params)
    }

    async fn fetch_one(
        &self,
        ctx: &AccessContext,
        operation: &str,
        sql: &str,
        params: NamedParams,
    ) -> CoreResult<Option<SensitiveIdentifier>> {
        let statement = self.build(sql, params);
        ctx.run(operation, self.store.fetch_optional(&statement))
            .await
            .map_err(|e| e.in_operation(operation))?
            .map(|row| decode(&row))
            .transpose()
    }

    async fn fetch_all(
        &self,
        ctx: &AccessContext,
        operation: &str,
        sql: &str,
        params: NamedParams,
    ) -> CoreResult<Vec<SensitiveIdentifier>> {
        let statement = self.build(sql, params);
        let rows = ctx
            .run(operation, self.store.fetch_all(&statement))
            .await
            .map_err(|e| e.in_operation(operation))?;
        rows.iter().map(decode::<SensitiveIdentifier>).collect()
    }

    async fn execute(
        &self,
        ctx: &AccessContext,
        operation: &str,
        sql: &str,
        params: NamedParams,
    ) -> CoreResult<u64> {
        let statement = self.build(sql, params);
        ctx.run(operation, self.store.execute(&statement))
            .await
            .map_err(|e| e.in_operation(operation))
    }
}

fn require_non_blank(field: &str, value: &str) -> CoreResult<()> {
    if value.trim().is_empty() {
        return Err(ValidationError::InvalidValue {
            field: field.to_string(),
            message: "must not be blank".to_string(),
        }
        .into());
    }
    Ok(())
}

fn decrypt_failure_text(err: &CoreError) -> &'static str {
    match err {
        CoreError::Crypto(CryptoError::AuthenticationFailed { .. }) => {
            "ciphertext failed authentication"
        }
        CoreError::Crypto(CryptoError::MalformedCiphertext { .. }) => "malformed ciphertext",
        e if e.is_unavailable() => "key service unavailable",
        _ => "decrypt failed",
    }
}
