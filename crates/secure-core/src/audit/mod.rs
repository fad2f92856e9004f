//! Audit trail for protected data.
//!
//! Every decrypt of a sensitive identifier and every identifier mutation
//! appends one [`AuditLogEntry`]. Entries are never updated or deleted; the
//! schema rejects both at the store level as well. When the enclosing
//! operation's audit write fails, the operation fails with
//! [`AuditError::WriteFailed`](crate::error::AuditError::WriteFailed).
//!
//! Queries (by subject, by actor, by time range, failed only) return a
//! [`Page`](crate::types::Page) plus the total match count for compliance
//! reporting.

mod entry;
mod trail;

pub use entry::{AuditAction, AuditLogEntry};
pub use trail::{AuditTrail, DEFAULT_MAX_PAGE_SIZE, IDENTIFIER_RESOURCE_TYPE};
