use std::marker::PhantomData;
use std::sync::Arc;

use crate::audit::DEFAULT_MAX_PAGE_SIZE;
use crate::context::AccessContext;
use crate::error::{ConcurrencyError, CoreError, CoreResult, ValidationError};
use crate::named_params;
use crate::source::IdentitySource;
use crate::statement::{
    decode, insert_sql, select_columns, stored_form, Filter, NamedParams, Patch, Statement,
};
use crate::store::DynStore;
use crate::types::{Page, PageRequest};

use super::VersionedEntity;

/// Create, read, version-checked update and soft delete for one entity type.
#[derive(Debug)]
pub struct VersionedRepository<E> {
    store: DynStore,
    source: Arc<dyn IdentitySource>,
    max_page_size: u32,
    _entity: PhantomData<fn() -> E>,
}

impl<E> Clone for VersionedRepository<E> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            source: self.source.clone(),
            max_page_size: self.max_page_size,
            _entity: PhantomData,
        }
    }
}

impl<E: VersionedEntity> VersionedRepository<E> {
    /// Creates a repository over a store.
    pub fn new(store: DynStore, source: Arc<dyn IdentitySource>) -> Self {
        Self {
            store,
            source,
            max_page_size: DEFAULT_MAX_PAGE_SIZE,
            _entity: PhantomData,
        }
    }

    /// Sets the page size clamp for [`list`](Self::list).
    pub fn with_max_page_size(mut self, max_page_size: u32) -> Self {
        self.max_page_size = max_page_size.max(1);
        self
    }

    /// Inserts an entity at version 1.
    ///
    /// An empty id is replaced with a generated one; the stamps are set from
    /// `ctx` and the clock. An id that is already taken, live or deleted,
    /// fails with [`ResourceError::AlreadyExists`](crate::error::ResourceError::AlreadyExists).
    pub async fn create(&self, ctx: &AccessContext, mut entity: E) -> CoreResult<E> {
        let now = self.source.now();
        let meta = entity.meta_mut();
        if meta.id.is_empty() {
            meta.id = self.source.new_id();
        }
        meta.version = 1;
        meta.created_at = now;
        meta.created_by = ctx.actor_id().to_string();
        meta.updated_at = now;
        meta.updated_by = ctx.actor_id().to_string();
        meta.is_deleted = false;
        meta.deleted_at = None;
        let entity = stored_form(&entity)?;

        let (sql, params) = insert_sql(&entity);
        self.execute(ctx, "create", &sql, params)
            .await
            .map_err(|e| e.on_insert(E::RESOURCE_TYPE, entity.id()))?;

        tracing::debug!(resource_type = E::RESOURCE_TYPE, id = %entity.id(), "Created versioned entity");
        Ok(entity)
    }

    /// Returns a live entity.
    pub async fn get(&self, ctx: &AccessContext, id: &str) -> CoreResult<E> {
        let sql = format!(
            "SELECT {} FROM {} WHERE id = @id AND is_deleted = 0",
            select_columns::<E>(),
            E::TABLE
        );
        let statement = self.build(&sql, named_params! { "id" => id });
        let operation = self.operation("get");
        let row = ctx
            .run(&operation, self.store.fetch_optional(&statement))
            .await
            .map_err(|e| e.in_operation(&operation))?
            .ok_or_else(|| CoreError::not_found(E::RESOURCE_TYPE, id))?;
        decode(&row)
    }

    /// Returns one page of live entities matching `filter`, oldest first.
    pub async fn list(
        &self,
        ctx: &AccessContext,
        filter: Filter,
        page: PageRequest,
    ) -> CoreResult<Page<E>> {
        let page = page.clamped(self.max_page_size);
        let operation = self.operation("list");
        let mut params = NamedParams::new();
        let where_clause = filter.exclude_deleted().render(&mut params);

        let count_sql = format!("SELECT COUNT(*) AS total FROM {} {}", E::TABLE, where_clause);
        let count = self.build(&count_sql, params.clone());
        let total = ctx
            .run(&operation, self.store.fetch_optional(&count))
            .await
            .map_err(|e| e.in_operation(&operation))?
            .map(|row| row.decode::<i64>("total"))
            .transpose()?
            .unwrap_or(0);

        params.extend(named_params! { "limit" => page.limit, "offset" => page.offset });
        let sql = format!(
            "SELECT {} FROM {} {} ORDER BY created_at ASC, id ASC LIMIT @limit OFFSET @offset",
            select_columns::<E>(),
            E::TABLE,
            where_clause
        );
        let statement = self.build(&sql, params);
        let rows = ctx
            .run(&operation, self.store.fetch_all(&statement))
            .await
            .map_err(|e| e.in_operation(&operation))?;
        let items = rows.iter().map(decode::<E>).collect::<CoreResult<Vec<_>>>()?;

        Ok(Page {
            items,
            total: total.max(0) as u64,
            request: page,
        })
    }

    /// Applies `patch` if the stored version equals `expected_version`.
    ///
    /// On success the stored version is `expected_version + 1` and the
    /// patched entity is returned. A mismatch, including one caused by a
    /// writer that slipped in after the read, is a
    /// [`ConcurrencyError::VersionConflict`] and leaves the row untouched.
    pub async fn update_with_version<P>(
        &self,
        ctx: &AccessContext,
        id: &str,
        expected_version: i64,
        patch: &P,
    ) -> CoreResult<E>
    where
        P: Patch<E>,
    {
        let assignments = patch.assignments();
        if assignments.is_empty() {
            return Err(ValidationError::EmptyPatch {
                resource_type: E::RESOURCE_TYPE.to_string(),
                id: id.to_string(),
            }
            .into());
        }

        let mut current = self.get(ctx, id).await?;
        let stored_version = current.meta().version;
        if stored_version != expected_version {
            return Err(conflict::<E>(id, expected_version, stored_version));
        }

        let now = self.source.now();
        let mut assignments = assignments;
        assignments.set("updated_at", now);
        assignments.set("updated_by", ctx.actor_id());

        let mut params = named_params! { "id" => id, "expected_version" => expected_version };
        let set_clause = assignments.render(&mut params);
        let sql = format!(
            "UPDATE {} SET {}, version = version + 1 \
             WHERE id = @id AND version = @expected_version AND is_deleted = 0",
            E::TABLE,
            set_clause
        );
        let affected = self.execute(ctx, "update_with_version", &sql, params).await?;

        if affected == 0 {
            // Lost the race: report what is stored now.
            let actual = self.get(ctx, id).await?.meta().version;
            tracing::debug!(
                resource_type = E::RESOURCE_TYPE,
                id,
                expected_version,
                actual,
                "Compare-and-swap matched no row"
            );
            return Err(conflict::<E>(id, expected_version, actual));
        }

        patch.apply_to(&mut current);
        let meta = current.meta_mut();
        meta.version = expected_version + 1;
        meta.updated_at = now;
        meta.updated_by = ctx.actor_id().to_string();

        tracing::debug!(
            resource_type = E::RESOURCE_TYPE,
            id,
            version = expected_version + 1,
            "Updated versioned entity"
        );
        stored_form(&current)
    }

    /// Soft-deletes a live entity; its final version is kept.
    pub async fn delete(&self, ctx: &AccessContext, id: &str) -> CoreResult<()> {
        let now = self.source.now();
        let sql = format!(
            "UPDATE {} SET is_deleted = 1, deleted_at = @now, updated_at = @now, updated_by = @actor \
             WHERE id = @id AND is_deleted = 0",
            E::TABLE
        );
        let params = named_params! { "id" => id, "now" => now, "actor" => ctx.actor_id() };
        let affected = self.execute(ctx, "delete", &sql, params).await?;
        if affected == 0 {
            return Err(CoreError::not_found(E::RESOURCE_TYPE, id));
        }
        tracing::debug!(resource_type = E::RESOURCE_TYPE, id, "Deleted versioned entity");
        Ok(())
    }

    fn operation(&self, name: &str) -> String {
        format!("{}.{}", E::RESOURCE_TYPE, name)
    }

    fn build(&self, sql: &str, params: NamedParams) -> Statement {
        self.store.statement_builder().build(sql, params)
    }

    async fn execute(
        &self,
        ctx: &AccessContext,
        name: &str,
        sql: &str,
        params: NamedParams,
    ) -> CoreResult<u64> {
        let operation = self.operation(name);
        let statement = self.build(sql, params);
        ctx.run(&operation, self.store.execute(&statement))
            .await
            .map_err(|e| e.in_operation(&operation))
    }
}

fn conflict<E: VersionedEntity>(id: &str, expected_version: i64, actual_version: i64) -> CoreError {
    CoreError::Concurrency(ConcurrencyError::VersionConflict {
        resource_type: E::RESOURCE_TYPE.to_string(),
        id: id.to_string(),
        expected_version,
        actual_version,
    })
}
