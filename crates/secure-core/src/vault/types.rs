//! Identifier vault data types.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::column;
use crate::statement::{Assignments, Column, Mapped, Patch};
use crate::text_column_enum;

/// Identifier kinds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentifierKind {
    /// The legally protected national identification number.
    NationalId,
    /// Health insurance number.
    InsuranceId,
    /// Long-term care insurance number.
    CareInsuranceId,
    /// Facility medical record number.
    MedicalRecordNumber,
    /// Anything else.
    #[default]
    Other,
}

impl IdentifierKind {
    /// Returns the stored text code.
    pub fn as_str(&self) -> &'static str {
        match self {
            IdentifierKind::NationalId => "national_id",
            IdentifierKind::InsuranceId => "insurance_id",
            IdentifierKind::CareInsuranceId => "care_insurance_id",
            IdentifierKind::MedicalRecordNumber => "medical_record_number",
            IdentifierKind::Other => "other",
        }
    }

    /// Returns true if values of this kind are stored encrypted.
    pub fn is_sensitive(&self) -> bool {
        matches!(self, IdentifierKind::NationalId)
    }
}

impl fmt::Display for IdentifierKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IdentifierKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "national_id" => Ok(IdentifierKind::NationalId),
            "insurance_id" => Ok(IdentifierKind::InsuranceId),
            "care_insurance_id" => Ok(IdentifierKind::CareInsuranceId),
            "medical_record_number" => Ok(IdentifierKind::MedicalRecordNumber),
            "other" => Ok(IdentifierKind::Other),
            other => Err(format!("unknown identifier type '{}'", other)),
        }
    }
}

text_column_enum!(IdentifierKind);

/// Verification state of an identifier.
///
/// `unverified` is only ever the initial state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerificationStatus {
    /// Not yet checked.
    #[default]
    Unverified,
    /// Confirmed by an operator.
    Verified,
    /// Past its validity.
    Expired,
    /// Found to be wrong.
    Invalid,
}

impl VerificationStatus {
    /// Returns the stored text code.
    pub fn as_str(&self) -> &'static str {
        match self {
            VerificationStatus::Unverified => "unverified",
            VerificationStatus::Verified => "verified",
            VerificationStatus::Expired => "expired",
            VerificationStatus::Invalid => "invalid",
        }
    }

    /// Returns true if moving from `self` to `next` is allowed.
    pub fn can_transition_to(&self, next: VerificationStatus) -> bool {
        next != VerificationStatus::Unverified || *self == VerificationStatus::Unverified
    }
}

impl fmt::Display for VerificationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VerificationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unverified" => Ok(VerificationStatus::Unverified),
            "verified" => Ok(VerificationStatus::Verified),
            "expired" => Ok(VerificationStatus::Expired),
            "invalid" => Ok(VerificationStatus::Invalid),
            other => Err(format!("unknown verification status '{}'", other)),
        }
    }
}

text_column_enum!(VerificationStatus);

/// One identification number of one subject.
///
/// For sensitive kinds `value` holds ciphertext unless the identifier was
/// returned by a decrypting read.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SensitiveIdentifier {
    /// Identifier id.
    pub id: String,
    /// Owning subject.
    pub subject_id: String,
    /// Identifier kind.
    pub kind: IdentifierKind,
    /// Stored value (ciphertext for sensitive kinds).
    pub value: String,
    /// Primary flag for the (subject, kind) pair.
    pub is_primary: bool,
    /// Start of validity.
    pub valid_from: Option<DateTime<Utc>>,
    /// End of validity.
    pub valid_to: Option<DateTime<Utc>>,
    /// Issuing authority name.
    pub issuer_name: Option<String>,
    /// Issuing authority code.
    pub issuer_code: Option<String>,
    /// Verification state.
    pub verification_status: VerificationStatus,
    /// When the identifier was verified.
    pub verified_at: Option<DateTime<Utc>>,
    /// Who verified the identifier.
    pub verified_by: Option<String>,
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

impl Mapped for SensitiveIdentifier {
    const TABLE: &'static str = "patient_identifiers";
    const RESOURCE_TYPE: &'static str = "patient_identifier";

    fn columns() -> Vec<Column<Self>> {
        vec![
            column!("id" => id),
            column!("subject_id" => subject_id),
            column!("identifier_type" => kind),
            column!("identifier_value" => value),
            column!("is_primary" => is_primary),
            column!("valid_from" => valid_from),
            column!("valid_to" => valid_to),
            column!("issuer_name" => issuer_name),
            column!("issuer_code" => issuer_code),
            column!("verification_status" => verification_status),
            column!("verified_at" => verified_at),
            column!("verified_by" => verified_by),
            column!("created_at" => created_at),
            column!("created_by" => created_by),
            column!("updated_at" => updated_at),
            column!("updated_by" => updated_by),
            column!("is_deleted" => is_deleted),
            column!("deleted_at" => deleted_at),
        ]
    }

    fn id(&self) -> &str {
        &self.id
    }
}

/// Input for creating an identifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewIdentifier {
    /// Owning subject.
    pub subject_id: String,
    /// Identifier kind.
    pub kind: IdentifierKind,
    /// Raw value; encrypted before storage for sensitive kinds.
    pub value: String,
    /// Primary flag.
    #[serde(default)]
    pub is_primary: bool,
    /// Start of validity.
    #[serde(default)]
    pub valid_from: Option<DateTime<Utc>>,
    /// End of validity.
    #[serde(default)]
    pub valid_to: Option<DateTime<Utc>>,
    /// Issuing authority name.
    #[serde(default)]
    pub issuer_name: Option<String>,
    /// Issuing authority code.
    #[serde(default)]
    pub issuer_code: Option<String>,
}

impl NewIdentifier {
    /// Creates input with no validity window or issuer.
    pub fn new(
        subject_id: impl Into<String>,
        kind: IdentifierKind,
        value: impl Into<String>,
    ) -> Self {
        Self {
            subject_id: subject_id.into(),
            kind,
            value: value.into(),
            is_primary: false,
            valid_from: None,
            valid_to: None,
            issuer_name: None,
            issuer_code: None,
        }
    }

    /// Flags the identifier as primary for its kind.
    pub fn primary(mut self) -> Self {
        self.is_primary = true;
        self
    }

    /// Sets the validity window.
    pub fn valid_between(
        mut self,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Self {
        self.valid_from = from;
        self.valid_to = to;
        self
    }

    /// Sets the issuer metadata.
    pub fn issued_by(mut self, name: impl Into<String>, code: Option<String>) -> Self {
        self.issuer_name = Some(name.into());
        self.issuer_code = code;
        self
    }
}

/// Sparse update of an identifier.
///
/// `None` leaves a field untouched. For nullable columns `Some(None)` clears
/// the stored value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IdentifierPatch {
    /// New raw value; re-encrypted for sensitive kinds.
    pub value: Option<String>,
    /// Primary flag.
    pub is_primary: Option<bool>,
    /// Start of validity.
    pub valid_from: Option<Option<DateTime<Utc>>>,
    /// End of validity.
    pub valid_to: Option<Option<DateTime<Utc>>>,
    /// Issuing authority name.
    pub issuer_name: Option<Option<String>>,
    /// Issuing authority code.
    pub issuer_code: Option<Option<String>>,
    /// Verification state.
    pub verification_status: Option<VerificationStatus>,
}

impl IdentifierPatch {
    /// Creates an empty patch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a new raw value.
    pub fn value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }

    /// Sets the primary flag.
    pub fn primary(mut self, is_primary: bool) -> Self {
        self.is_primary = Some(is_primary);
        self
    }

    /// Sets the verification status.
    pub fn status(mut self, status: VerificationStatus) -> Self {
        self.verification_status = Some(status);
        self
    }
}

impl Patch<SensitiveIdentifier> for IdentifierPatch {
    fn assignments(&self) -> Assignments {
        let mut set = Assignments::new();
        set.set_present("identifier_value", &self.value);
        set.set_present("is_primary", &self.is_primary);
        set.set_present("valid_from", &self.valid_from);
        set.set_present("valid_to", &self.valid_to);
        set.set_present("issuer_name", &self.issuer_name);
        set.set_present("issuer_code", &self.issuer_code);
        set.set_present("verification_status", &self.verification_status);
        set
    }

    fn apply_to(&self, entity: &mut SensitiveIdentifier) {
        if let Some(value) = &self.value {
            entity.value = value.clone();
        }
        if let Some(is_primary) = self.is_primary {
            entity.is_primary = is_primary;
        }
        if let Some(valid_from) = self.valid_from {
            entity.valid_from = valid_from;
        }
        if let Some(valid_to) = self.valid_to {
            entity.valid_to = valid_to;
        }
        if let Some(issuer_name) = &self.issuer_name {
            entity.issuer_name = issuer_name.clone();
        }
        if let Some(issuer_code) = &self.issuer_code {
            entity.issuer_code = issuer_code.clone();
        }
        if let Some(status) = self.verification_status {
            entity.verification_status = status;
        }
    }
}
