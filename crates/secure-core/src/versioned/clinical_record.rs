use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::column;
use crate::statement::{Assignments, Column, Mapped, Patch};
use crate::text_column_enum;

use super::{meta_columns, RecordMeta, VersionedEntity};

/// Lifecycle status of a clinical record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    /// Being written.
    #[default]
    Draft,
    /// Signed off.
    Final,
    /// Changed after sign-off.
    Amended,
    /// Recorded by mistake.
    EnteredInError,
}

impl RecordStatus {
    /// Returns the stored text code.
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordStatus::Draft => "draft",
            RecordStatus::Final => "final",
            RecordStatus::Amended => "amended",
            RecordStatus::EnteredInError => "entered_in_error",
        }
    }
}

impl fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(RecordStatus::Draft),
            "final" => Ok(RecordStatus::Final),
            "amended" => Ok(RecordStatus::Amended),
            "entered_in_error" => Ok(RecordStatus::EnteredInError),
            other => Err(format!("unknown record status '{}'", other)),
        }
    }
}

text_column_enum!(RecordStatus);

/// A clinical note or report about one patient.
///
/// `content` is an opaque JSON document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClinicalRecord {
    /// Identity, version and stamps.
    #[serde(flatten)]
    pub meta: RecordMeta,
    /// Patient the record is about.
    pub patient_id: String,
    /// Encounter the record was written in.
    pub encounter_id: Option<String>,
    /// Record type code, e.g. `progress_note`.
    pub record_type: String,
    /// Lifecycle status.
    pub status: RecordStatus,
    /// Display title.
    pub title: String,
    /// Opaque JSON body.
    pub content: Value,
}

impl ClinicalRecord {
    /// Creates a draft record; the repository assigns id and stamps.
    pub fn new(
        patient_id: impl Into<String>,
        record_type: impl Into<String>,
        title: impl Into<String>,
        content: Value,
    ) -> Self {
        Self {
            patient_id: patient_id.into(),
            record_type: record_type.into(),
            title: title.into(),
            content,
            ..Default::default()
        }
    }
}

impl Mapped for ClinicalRecord {
    const TABLE: &'static str = "clinical_records";
    const RESOURCE_TYPE: &'static str = "clinical_record";

    fn columns() -> Vec<Column<Self>> {
        let mut columns = meta_columns::<Self>();
        columns.extend([
            column!("patient_id" => patient_id),
            column!("encounter_id" => encounter_id),
            column!("record_type" => record_type),
            column!("status" => status),
            column!("title" => title),
            column!("content" => content),
        ]);
        columns
    }

    fn id(&self) -> &str {
        &self.meta.id
    }
}

impl VersionedEntity for ClinicalRecord {
    fn meta(&self) -> &RecordMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut RecordMeta {
        &mut self.meta
    }
}

/// Sparse update of a clinical record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClinicalRecordPatch {
    /// `Some(None)` detaches the record from its encounter.
    pub encounter_id: Option<Option<String>>,
    /// New record type.
    pub record_type: Option<String>,
    /// New status.
    pub status: Option<RecordStatus>,
    /// New title.
    pub title: Option<String>,
    /// Replacement body.
    pub content: Option<Value>,
}

impl Patch<ClinicalRecord> for ClinicalRecordPatch {
    fn assignments(&self) -> Assignments {
        let mut set = Assignments::new();
        set.set_present("encounter_id", &self.encounter_id);
        set.set_present("record_type", &self.record_type);
        set.set_present("status", &self.status);
        set.set_present("title", &self.title);
        set.set_present("content", &self.content);
        set
    }

    fn apply_to(&self, record: &mut ClinicalRecord) {
        if let Some(encounter_id) = &self.encounter_id {
            record.encounter_id = encounter_id.clone();
        }
        if let Some(record_type) = &self.record_type {
            record.record_type = record_type.clone();
        }
        if let Some(status) = self.status {
            record.status = status;
        }
        if let Some(title) = &self.title {
            record.title = title.clone();
        }
        if let Some(content) = &self.content {
            record.content = content.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::statement::{decode, insert_sql, select_columns, Row};

    #[test]
    fn test_columns_cover_meta_and_payload() {
        let columns = select_columns::<ClinicalRecord>();
        assert!(columns.starts_with("id, version, created_at"));
        assert!(columns.ends_with("title, content"));
    }

    #[test]
    fn test_row_decodes_into_record() {
        let mut record = ClinicalRecord::new(
            "P1",
            "progress_note",
            "Day 2",
            serde_json::json!({"subjective": "slept well"}),
        );
        record.meta.id = "cr-1".to_string();
        record.meta.version = 3;
        let (_, params) = insert_sql(&record);
        let row: Row = params.into_iter().collect();
        assert_eq!(decode::<ClinicalRecord>(&row).unwrap(), record);
    }
}
