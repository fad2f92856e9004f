//! Audit log entry type.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::column;
use crate::context::AccessContext;
use crate::statement::{Column, Mapped};
use crate::text_column_enum;

/// The kind of access an audit entry records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditAction {
    /// A read.
    #[default]
    View,
    /// A creation.
    Create,
    /// A modification.
    Update,
    /// A soft deletion.
    Delete,
    /// A decryption of a sensitive value.
    Decrypt,
}

impl AuditAction {
    /// Returns the stored text code.
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::View => "view",
            AuditAction::Create => "create",
            AuditAction::Update => "update",
            AuditAction::Delete => "delete",
            AuditAction::Decrypt => "decrypt",
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuditAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "view" => Ok(AuditAction::View),
            "create" => Ok(AuditAction::Create),
            "update" => Ok(AuditAction::Update),
            "delete" => Ok(AuditAction::Delete),
            "decrypt" => Ok(AuditAction::Decrypt),
            other => Err(format!("unknown audit action '{}'", other)),
        }
    }
}

text_column_enum!(AuditAction);

/// One immutable audit fact.
///
/// `id` and `timestamp` may be left unset; the trail stamps them when the
/// entry is appended.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuditLogEntry {
    /// Entry id (empty until appended).
    pub id: String,
    /// When the access happened.
    pub timestamp: Option<DateTime<Utc>>,
    /// Acting principal.
    pub actor_id: String,
    /// What was done.
    pub action: AuditAction,
    /// Type of the accessed resource.
    pub resource_type: String,
    /// Id of the accessed resource.
    pub resource_id: String,
    /// Subject the resource belongs to.
    pub subject_id: Option<String>,
    /// Whether the access succeeded.
    pub success: bool,
    /// Non-sensitive failure text.
    pub error_message: Option<String>,
    /// Structured description of what was touched.
    pub fields_accessed: Option<Value>,
    /// Network origin of the request.
    pub ip_address: Option<String>,
    /// Client string of the request.
    pub user_agent: Option<String>,
}

impl AuditLogEntry {
    /// Creates a successful entry for an action on a resource.
    pub fn new(
        action: AuditAction,
        resource_type: impl Into<String>,
        resource_id: impl Into<String>,
    ) -> Self {
        Self {
            action,
            resource_type: resource_type.into(),
            resource_id: resource_id.into(),
            success: true,
            ..Default::default()
        }
    }

    /// Copies the principal and request provenance from a context.
    ///
    /// Values already set on the entry are kept.
    pub fn with_context(mut self, ctx: &AccessContext) -> Self {
        if self.actor_id.is_empty() {
            self.actor_id = ctx.actor_id().to_string();
        }
        if self.ip_address.is_none() {
            self.ip_address = ctx.ip_address().map(str::to_string);
        }
        if self.user_agent.is_none() {
            self.user_agent = ctx.user_agent().map(str::to_string);
        }
        self
    }

    /// Sets the owning subject.
    pub fn with_subject(mut self, subject_id: impl Into<String>) -> Self {
        self.subject_id = Some(subject_id.into());
        self
    }

    /// Sets the structured fields-accessed payload.
    pub fn with_fields(mut self, fields: Value) -> Self {
        self.fields_accessed = Some(fields);
        self
    }

    /// Marks the access as failed.
    pub fn failed(mut self, message: impl Into<String>) -> Self {
        self.success = false;
        self.error_message = Some(message.into());
        self
    }
}

impl Mapped for AuditLogEntry {
    const TABLE: &'static str = "audit_logs";
    const RESOURCE_TYPE: &'static str = "audit_log";

    fn columns() -> Vec<Column<Self>> {
        vec![
            column!("id" => id),
            column!("logged_at" => timestamp),
            column!("actor_id" => actor_id),
            column!("action" => action),
            column!("resource_type" => resource_type),
            column!("resource_id" => resource_id),
            column!("subject_id" => subject_id),
            column!("success" => success),
            column!("error_message" => error_message),
            column!("fields_accessed" => fields_accessed),
            column!("ip_address" => ip_address),
            column!("user_agent" => user_agent),
        ]
    }

    fn id(&self) -> &str {
        &self.id
    }
}
