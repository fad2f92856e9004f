//! Version-stamped clinical entities.
//!
//! Mutable clinical entities carry a [`RecordMeta`] with a version counter
//! that starts at 1 and grows by exactly 1 per accepted write. Writers go
//! through [`VersionedRepository::update_with_version`], which only succeeds
//! when the caller's expected version still matches the stored one:
//!
//! 1. Read the stored row; a version mismatch is rejected immediately.
//! 2. Write the patch with a single compare-and-swap `UPDATE` guarded by
//!    `version = expected`. A writer that interleaved between the read and
//!    the write makes the guard match zero rows, which is reported as the
//!    same conflict.
//!
//! No update is ever lost, even though the read and the write are two
//! separate store calls.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::statement::{Column, FromSqlValue, IntoSqlValue, Mapped, SqlValue};

mod clinical_record;
mod medication_order;
mod repository;

pub use clinical_record::{ClinicalRecord, ClinicalRecordPatch, RecordStatus};
pub use medication_order::{MedicationOrder, MedicationOrderPatch, OrderStatus};
pub use repository::VersionedRepository;

/// Repository for clinical records.
pub type ClinicalRecordRepository = VersionedRepository<ClinicalRecord>;

/// Repository for medication orders.
pub type MedicationOrderRepository = VersionedRepository<MedicationOrder>;

/// Identity, version and audit stamps shared by every versioned entity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordMeta {
    /// Entity id.
    pub id: String,
    /// Monotonic version, 1 after creation.
    pub version: i64,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Creating principal.
    pub created_by: String,
    /// Last update time.
    pub updated_at: DateTime<Utc>,
    /// Last updating principal.
    pub updated_by: String,
    /// Soft-delete flag.
    pub is_deleted: bool,
    /// Soft-delete time.
    pub deleted_at: Option<DateTime<Utc>>,
}

/// An entity with a [`RecordMeta`].
pub trait VersionedEntity: Mapped {
    /// Returns the shared stamps.
    fn meta(&self) -> &RecordMeta;

    /// Returns the shared stamps mutably.
    fn meta_mut(&mut self) -> &mut RecordMeta;
}

macro_rules! meta_column {
    ($name:literal => $field:ident) => {
        Column::new(
            $name,
            |entity: &E| entity.meta().$field.to_sql_value(),
            |entity: &mut E, value: &SqlValue| {
                entity.meta_mut().$field = FromSqlValue::from_sql_value(value)?;
                Ok(())
            },
        )
    };
}

/// Column mappings of the [`RecordMeta`] part of an entity.
pub fn meta_columns<E: VersionedEntity>() -> Vec<Column<E>> {
    vec![
        meta_column!("id" => id),
        meta_column!("version" => version),
        meta_column!("created_at" => created_at),
        meta_column!("created_by" => created_by),
        meta_column!("updated_at" => updated_at),
        meta_column!("updated_by" => updated_by),
        meta_column!("is_deleted" => is_deleted),
        meta_column!("deleted_at" => deleted_at),
    ]
}
