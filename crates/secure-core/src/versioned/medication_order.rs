use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::column;
use crate::statement::{Assignments, Column, Mapped, Patch};
use crate::text_column_enum;

use super::{meta_columns, RecordMeta, VersionedEntity};

/// Status of a medication order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    #[default]
    Active,
    OnHold,
    Completed,
    Cancelled,
    Stopped,
}

impl OrderStatus {
    /// Returns the stored text code.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Active => "active",
            OrderStatus::OnHold => "on_hold",
            OrderStatus::Completed => "completed",
            OrderStatus::Cancelled => "cancelled",
            OrderStatus::Stopped => "stopped",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(OrderStatus::Active),
            "on_hold" => Ok(OrderStatus::OnHold),
            "completed" => Ok(OrderStatus::Completed),
            "cancelled" => Ok(OrderStatus::Cancelled),
            "stopped" => Ok(OrderStatus::Stopped),
            other => Err(format!("unknown order status '{}'", other)),
        }
    }
}

text_column_enum!(OrderStatus);

/// A prescription for one patient.
#[allow(missing_docs)]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MedicationOrder {
    #[serde(flatten)]
    pub meta: RecordMeta,
    pub patient_id: String,
    pub prescriber_id: String,
    pub medication_code: String,
    pub medication_name: String,
    pub dosage: String,
    pub route: String,
    pub frequency: String,
    pub status: OrderStatus,
    pub start_date: DateTime<Utc>,
    pub end_date: Option<DateTime<Utc>>,
    pub notes: Option<String>,
}

impl MedicationOrder {
    /// Creates an active order starting at `start_date`.
    pub fn new(
        patient_id: impl Into<String>,
        prescriber_id: impl Into<String>,
        medication_code: impl Into<String>,
        medication_name: impl Into<String>,
        start_date: DateTime<Utc>,
    ) -> Self {
        Self {
            patient_id: patient_id.into(),
            prescriber_id: prescriber_id.into(),
            medication_code: medication_code.into(),
            medication_name: medication_name.into(),
            start_date,
            ..Default::default()
        }
    }

    /// Sets dosage, route and frequency.
    pub fn dosed(
        mut self,
        dosage: impl Into<String>,
        route: impl Into<String>,
        frequency: impl Into<String>,
    ) -> Self {
        self.dosage = dosage.into();
        self.route = route.into();
        self.frequency = frequency.into();
        self
    }
}

impl Mapped for MedicationOrder {
    const TABLE: &'static str = "medication_orders";
    const RESOURCE_TYPE: &'static str = "medication_order";

    fn columns() -> Vec<Column<Self>> {
        let mut columns = meta_columns::<Self>();
        columns.extend([
            column!("patient_id" => patient_id),
            column!("prescriber_id" => prescriber_id),
            column!("medication_code" => medication_code),
            column!("medication_name" => medication_name),
            column!("dosage" => dosage),
            column!("route" => route),
            column!("frequency" => frequency),
            column!("status" => status),
            column!("start_date" => start_date),
            column!("end_date" => end_date),
            column!("notes" => notes),
        ]);
        columns
    }

    fn id(&self) -> &str {
        &self.meta.id
    }
}

impl VersionedEntity for MedicationOrder {
    fn meta(&self) -> &RecordMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut RecordMeta {
        &mut self.meta
    }
}

/// Sparse update of a medication order.
#[allow(missing_docs)]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MedicationOrderPatch {
    pub dosage: Option<String>,
    pub route: Option<String>,
    pub frequency: Option<String>,
    pub status: Option<OrderStatus>,
    pub end_date: Option<Option<DateTime<Utc>>>,
    pub notes: Option<Option<String>>,
}

impl Patch<MedicationOrder> for MedicationOrderPatch {
    fn assignments(&self) -> Assignments {
        let mut set = Assignments::new();
        set.set_present("dosage", &self.dosage);
        set.set_present("route", &self.route);
        set.set_present("frequency", &self.frequency);
        set.set_present("status", &self.status);
        set.set_present("end_date", &self.end_date);
        set.set_present("notes", &self.notes);
        set
    }

    fn apply_to(&self, order: &mut MedicationOrder) {
        if let Some(dosage) = &self.dosage {
            order.dosage = dosage.clone();
        }
        if let Some(route) = &self.route {
            order.route = route.clone();
        }
        if let Some(frequency) = &self.frequency {
            order.frequency = frequency.clone();
        }
        if let Some(status) = self.status {
            order.status = status;
        }
        if let Some(end_date) = self.end_date {
            order.end_date = end_date;
        }
        if let Some(notes) = &self.notes {
            order.notes = notes.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!("on_hold".parse::<OrderStatus>().unwrap(), OrderStatus::OnHold);
        assert_eq!(OrderStatus::Cancelled.to_string(), "cancelled");
        assert!("paused".parse::<OrderStatus>().is_err());
    }

    #[test]
    fn test_clearing_notes_is_a_present_field() {
        let patch = MedicationOrderPatch {
            notes: Some(None),
            ..Default::default()
        };
        assert_eq!(patch.assignments().columns(), vec!["notes"]);

        let mut order = MedicationOrder {
            notes: Some("take with food".to_string()),
            ..Default::default()
        };
        patch.apply_to(&mut order);
        assert!(order.notes.is_none());
    }
}
