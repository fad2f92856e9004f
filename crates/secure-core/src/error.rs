//! Error types for the secure data access core.
//!
//! Errors are grouped by category the same way callers react to them:
//! missing rows, version conflicts, cryptographic authentication failures,
//! unavailable dependencies, boundary validation and audit write failures.
//! Messages never carry identifier plaintext.

// Error enum variant fields are self-documenting via their #[error(...)] messages
#![allow(missing_docs)]

use thiserror::Error;

/// The primary error type for every core operation.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Resource state errors
    #[error(transparent)]
    Resource(#[from] ResourceError),

    /// Optimistic concurrency errors
    #[error(transparent)]
    Concurrency(#[from] ConcurrencyError),

    /// Ciphertext authentication errors
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    /// Store and key service failures
    #[error(transparent)]
    Dependency(#[from] DependencyError),

    /// Validation errors
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Audit trail write failures
    #[error(transparent)]
    Audit(#[from] AuditError),
}

/// Errors related to resource state.
#[derive(Error, Debug)]
pub enum ResourceError {
    /// No matching live row.
    #[error("resource not found: {resource_type}/{id}")]
    NotFound { resource_type: String, id: String },

    /// A row with the given id already exists.
    #[error("resource already exists: {resource_type}/{id}")]
    AlreadyExists { resource_type: String, id: String },
}

/// Errors related to optimistic concurrency control.
#[derive(Error, Debug)]
pub enum ConcurrencyError {
    /// The caller's expected version does not match the stored version.
    #[error(
        "version conflict on {resource_type}/{id}: expected {expected_version}, found {actual_version}"
    )]
    VersionConflict {
        resource_type: String,
        id: String,
        expected_version: i64,
        actual_version: i64,
    },

    /// The stored verification status moved after it was read.
    #[error("verification status of {resource_type}/{id} changed: expected {expected}, found {actual}")]
    StatusChanged {
        resource_type: String,
        id: String,
        expected: String,
        actual: String,
    },
}

/// Errors raised while authenticating or decoding ciphertext.
#[derive(Error, Debug)]
pub enum CryptoError {
    /// The ciphertext does not authenticate under the supplied context.
    #[error("ciphertext authentication failed for subject {subject_id}")]
    AuthenticationFailed { subject_id: String },

    /// The ciphertext blob is not in the expected transport encoding.
    #[error("malformed ciphertext: {message}")]
    MalformedCiphertext { message: String },
}

/// Errors originating from the row store or the key service.
#[derive(Error, Debug)]
pub enum DependencyError {
    /// The dependency cannot be reached.
    #[error("{service} unavailable: {message}")]
    Unavailable { service: String, message: String },

    /// The caller-supplied deadline elapsed.
    #[error("deadline exceeded during {operation}")]
    DeadlineExceeded { operation: String },

    /// The store rejected or failed a statement.
    #[error("store error in {backend}: {message}")]
    Store {
        backend: String,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The store rejected a row whose key is already taken.
    #[error("unique constraint violated in {backend}: {message}")]
    UniqueViolation { backend: String, message: String },

    /// A stored column could not be decoded into its field.
    #[error("cannot decode column {column}: {message}")]
    Decode { column: String, message: String },

    /// Serialization/deserialization error.
    #[error("serialization error: {message}")]
    Serialization { message: String },
}

/// Errors caught at the core's boundary.
#[derive(Error, Debug)]
pub enum ValidationError {
    /// A field has a value the core refuses to store.
    #[error("invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    /// A verification status change that the lifecycle forbids.
    #[error("illegal verification transition from {from} to {to}")]
    IllegalTransition { from: String, to: String },

    /// An update carried no fields.
    #[error("update for {resource_type}/{id} contains no fields")]
    EmptyPatch { resource_type: String, id: String },

    /// A statement was built for a different dialect than the store speaks.
    #[error("statement built for {statement} cannot run on a {store} store")]
    DialectMismatch { statement: String, store: String },
}

/// Errors writing the audit entry of an enclosing operation.
#[derive(Error, Debug)]
pub enum AuditError {
    /// The audit entry could not be appended; the enclosing operation fails.
    #[error("audit write failed for {action} on {resource_id}")]
    WriteFailed {
        action: String,
        resource_id: String,
        #[source]
        source: Box<CoreError>,
    },
}

/// Result type alias for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

impl CoreError {
    /// Returns true if no matching live row exists.
    pub fn is_not_found(&self) -> bool {
        matches!(self, CoreError::Resource(ResourceError::NotFound { .. }))
    }

    /// Returns true for optimistic concurrency conflicts.
    pub fn is_conflict(&self) -> bool {
        matches!(self, CoreError::Concurrency(_))
    }

    /// Returns true if ciphertext failed to authenticate.
    pub fn is_authentication(&self) -> bool {
        matches!(
            self,
            CoreError::Crypto(CryptoError::AuthenticationFailed { .. })
        )
    }

    /// Returns true if a dependency could not be reached or timed out.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            CoreError::Dependency(
                DependencyError::Unavailable { .. } | DependencyError::DeadlineExceeded { .. }
            )
        )
    }

    /// Returns true if the caller may re-read and resubmit.
    pub fn is_retryable(&self) -> bool {
        self.is_conflict() || self.is_unavailable()
    }

    /// Prefixes dependency failures with the operation that hit them.
    ///
    /// Other categories are returned untouched so callers keep matching on them.
    pub fn in_operation(self, operation: &str) -> Self {
        match self {
            CoreError::Dependency(DependencyError::Unavailable { service, message }) => {
                CoreError::Dependency(DependencyError::Unavailable {
                    service,
                    message: format!("{operation}: {message}"),
                })
            }
            CoreError::Dependency(DependencyError::Store {
                backend,
                message,
                source,
            }) => CoreError::Dependency(DependencyError::Store {
                backend,
                message: format!("{operation}: {message}"),
                source,
            }),
            other => other,
        }
    }

    /// Reports a unique-key rejection of an insert as
    /// [`ResourceError::AlreadyExists`] for `resource_type/id`.
    pub(crate) fn on_insert(self, resource_type: &str, id: &str) -> Self {
        match self {
            CoreError::Dependency(DependencyError::UniqueViolation { .. }) => {
                CoreError::Resource(ResourceError::AlreadyExists {
                    resource_type: resource_type.to_string(),
                    id: id.to_string(),
                })
            }
            other => other,
        }
    }

    pub(crate) fn not_found(resource_type: &str, id: &str) -> Self {
        CoreError::Resource(ResourceError::NotFound {
            resource_type: resource_type.to_string(),
            id: id.to_string(),
        })
    }
}

pub(crate) fn store_error(backend: &str, message: String) -> CoreError {
    CoreError::Dependency(DependencyError::Store {
        backend: backend.to_string(),
        message,
        source: None,
    })
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::Dependency(DependencyError::Serialization {
            message: err.to_string(),
        })
    }
}

/// Returns true if SQLite rejected a row for a duplicate primary or unique key.
#[cfg(feature = "sqlite")]
pub(crate) fn is_sqlite_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
                || e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}

#[cfg(feature = "sqlite")]
impl From<rusqlite::Error> for CoreError {
    fn from(err: rusqlite::Error) -> Self {
        if is_sqlite_unique_violation(&err) {
            return CoreError::Dependency(DependencyError::UniqueViolation {
                backend: "sqlite".to_string(),
                message: err.to_string(),
            });
        }
        CoreError::Dependency(DependencyError::Store {
            backend: "sqlite".to_string(),
            message: err.to_string(),
            source: Some(Box::new(err)),
        })
    }
}

#[cfg(feature = "sqlite")]
impl From<r2d2::Error> for CoreError {
    fn from(err: r2d2::Error) -> Self {
        CoreError::Dependency(DependencyError::Unavailable {
            service: "sqlite".to_string(),
            message: err.to_string(),
        })
    }
}

#[cfg(feature = "postgres")]
impl From<tokio_postgres::Error> for CoreError {
    fn from(err: tokio_postgres::Error) -> Self {
        if err.is_closed() {
            return CoreError::Dependency(DependencyError::Unavailable {
                service: "postgres".to_string(),
                message: err.to_string(),
            });
        }
        if err.code() == Some(&tokio_postgres::error::SqlState::UNIQUE_VIOLATION) {
            return CoreError::Dependency(DependencyError::UniqueViolation {
                backend: "postgres".to_string(),
                message: err.to_string(),
            });
        }
        CoreError::Dependency(DependencyError::Store {
            backend: "postgres".to_string(),
            message: err.to_string(),
            source: Some(Box::new(err)),
        })
    }
}
