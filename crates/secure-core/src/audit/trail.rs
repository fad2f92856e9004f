//! Append-only audit trail.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::json;

use crate::context::AccessContext;
use crate::error::{AuditError, CoreError, CoreResult};
use crate::named_params;
use crate::source::IdentitySource;
use crate::statement::{decode, insert_sql, select_columns, stored_form, Filter, Mapped, NamedParams};
use crate::store::DynStore;
use crate::types::{Page, PageRequest};

use super::entry::{AuditAction, AuditLogEntry};

/// Resource type recorded for identifier events.
pub const IDENTIFIER_RESOURCE_TYPE: &str = "patient_identifier";

/// Upper bound applied to requested page sizes by default.
pub const DEFAULT_MAX_PAGE_SIZE: u32 = 500;

/// Append-only log of every access to protected data.
///
/// Entries are only ever inserted. Queries return pages ordered newest first
/// together with the total number of matching entries.
#[derive(Debug, Clone)]
pub struct AuditTrail {
    store: DynStore,
    source: Arc<dyn IdentitySource>,
    max_page_size: u32,
}

impl AuditTrail {
    /// Creates a trail over a store.
    pub fn new(store: DynStore, source: Arc<dyn IdentitySource>) -> Self {
        Self {
            store,
            source,
            max_page_size: DEFAULT_MAX_PAGE_SIZE,
        }
    }

    /// Sets the page size clamp.
    pub fn with_max_page_size(mut self, max_page_size: u32) -> Self {
        self.max_page_size = max_page_size.max(1);
        self
    }

    /// Appends an entry, stamping its id and timestamp if unset.
    ///
    /// Principal and provenance missing from the entry are taken from `ctx`.
    /// A failed write is returned as [`AuditError::WriteFailed`].
    pub async fn log_access(
        &self,
        ctx: &AccessContext,
        entry: AuditLogEntry,
    ) -> CoreResult<AuditLogEntry> {
        let mut entry = entry.with_context(ctx);
        if entry.id.is_empty() {
            entry.id = self.source.new_id();
        }
        if entry.timestamp.is_none() {
            entry.timestamp = Some(self.source.now());
        }
        let entry = stored_form(&entry)?;

        let (sql, params) = insert_sql(&entry);
        let statement = self.store.statement_builder().build(&sql, params);
        let written = ctx
            .run("audit.log_access", self.store.execute(&statement))
            .await;

        if let Err(err) = written {
            tracing::error!(
                action = %entry.action,
                resource_id = %entry.resource_id,
                error = %err,
                "Audit write failed"
            );
            return Err(CoreError::Audit(AuditError::WriteFailed {
                action: entry.action.to_string(),
                resource_id: entry.resource_id.clone(),
                source: Box::new(
                    err.in_operation("audit.log_access")
                        .on_insert(AuditLogEntry::RESOURCE_TYPE, &entry.id),
                ),
            }));
        }

        tracing::debug!(
            audit_id = %entry.id,
            action = %entry.action,
            resource_id = %entry.resource_id,
            success = entry.success,
            "Audit entry appended"
        );
        Ok(entry)
    }

    /// Records a decrypt of a sensitive identifier.
    ///
    /// `error` marks the attempt as failed; it must not contain plaintext.
    pub async fn log_identifier_decrypt(
        &self,
        ctx: &AccessContext,
        identifier_id: &str,
        subject_id: &str,
        identifier_kind: &str,
        error: Option<&str>,
    ) -> CoreResult<AuditLogEntry> {
        let mut entry =
            AuditLogEntry::new(AuditAction::Decrypt, IDENTIFIER_RESOURCE_TYPE, identifier_id)
                .with_subject(subject_id)
                .with_fields(json!({
                    "resource_type": IDENTIFIER_RESOURCE_TYPE,
                    "identifier_type": identifier_kind,
                    "operation": "decrypt",
                }));
        if let Some(message) = error {
            entry = entry.failed(message);
        }
        self.log_access(ctx, entry).await
    }

    /// Records a create, update or delete of an identifier.
    pub async fn log_identifier_mutation(
        &self,
        ctx: &AccessContext,
        action: AuditAction,
        identifier_id: &str,
        subject_id: &str,
        identifier_kind: &str,
        fields: &[&str],
    ) -> CoreResult<AuditLogEntry> {
        let entry = AuditLogEntry::new(action, IDENTIFIER_RESOURCE_TYPE, identifier_id)
            .with_subject(subject_id)
            .with_fields(json!({
                "resource_type": IDENTIFIER_RESOURCE_TYPE,
                "identifier_type": identifier_kind,
                "operation": action.as_str(),
                "fields": fields,
            }));
        self.log_access(ctx, entry).await
    }

    /// Returns one entry by id.
    pub async fn get(&self, ctx: &AccessContext, id: &str) -> CoreResult<AuditLogEntry> {
        let sql = format!(
            "SELECT {} FROM {} WHERE id = @id",
            select_columns::<AuditLogEntry>(),
            AuditLogEntry::TABLE
        );
        let statement = self
            .store
            .statement_builder()
            .build(&sql, named_params! { "id" => id });
        let row = ctx
            .run("audit.get", self.store.fetch_optional(&statement))
            .await
            .map_err(|e| e.in_operation("audit.get"))?
            .ok_or_else(|| CoreError::not_found(AuditLogEntry::RESOURCE_TYPE, id))?;
        decode(&row)
    }

    /// Entries about one subject.
    pub async fn by_subject(
        &self,
        ctx: &AccessContext,
        subject_id: &str,
        page: PageRequest,
    ) -> CoreResult<Page<AuditLogEntry>> {
        let filter = Filter::new().eq("subject_id", subject_id);
        self.query(ctx, "audit.by_subject", &filter, page).await
    }

    /// Entries written on behalf of one principal.
    pub async fn by_actor(
        &self,
        ctx: &AccessContext,
        actor_id: &str,
        page: PageRequest,
    ) -> CoreResult<Page<AuditLogEntry>> {
        let filter = Filter::new().eq("actor_id", actor_id);
        self.query(ctx, "audit.by_actor", &filter, page).await
    }

    /// Entries with `start <= timestamp < end`.
    pub async fn by_time_range(
        &self,
        ctx: &AccessContext,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        page: PageRequest,
    ) -> CoreResult<Page<AuditLogEntry>> {
        let filter = Filter::new().between("logged_at", start, end);
        self.query(ctx, "audit.by_time_range", &filter, page).await
    }

    /// Entries whose access failed.
    pub async fn failed(
        &self,
        ctx: &AccessContext,
        page: PageRequest,
    ) -> CoreResult<Page<AuditLogEntry>> {
        let filter = Filter::new().eq("success", false);
        self.query(ctx, "audit.failed", &filter, page).await
    }

    async fn query(
        &self,
        ctx: &AccessContext,
        operation: &str,
        filter: &Filter,
        page: PageRequest,
    ) -> CoreResult<Page<AuditLogEntry>> {
        let page = page.clamped(self.max_page_size);
        let builder = self.store.statement_builder();

        let mut params = NamedParams::new();
        let where_clause = filter.render(&mut params);

        let count_sql = format!(
            "SELECT COUNT(*) AS total FROM {} {}",
            AuditLogEntry::TABLE,
            where_clause
        );
        let count = builder.build(&count_sql, params.clone());
        let total = ctx
            .run(operation, self.store.fetch_optional(&count))
            .await
            .map_err(|e| e.in_operation(operation))?
            .map(|row| row.decode::<i64>("total"))
            .transpose()?
            .unwrap_or(0);

        params.extend(named_params! { "limit" => page.limit, "offset" => page.offset });
        let list_sql = format!(
            "SELECT {} FROM {} {} ORDER BY logged_at DESC, id DESC LIMIT @limit OFFSET @offset",
            select_columns::<AuditLogEntry>(),
            AuditLogEntry::TABLE,
            where_clause
        );
        let list = builder.build(&list_sql, params);
        let rows = ctx
            .run(operation, self.store.fetch_all(&list))
            .await
            .map_err(|e| e.in_operation(operation))?;

        let items = rows.iter().map(decode::<AuditLogEntry>).collect::<CoreResult<Vec<_>>>()?;
        Ok(Page {
            items,
            total: total.max(0) as u64,
            request: page,
        })
    }
}
