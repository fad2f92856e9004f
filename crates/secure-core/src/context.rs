//! Access context for core operations.
//!
//! Every vault, audit and repository call takes an [`AccessContext`]. It
//! names the acting principal recorded in audit entries and timestamps, the
//! request provenance copied into audit entries, and an optional deadline
//! that bounds every store and key-service call made on the caller's behalf.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

use crate::error::{CoreError, CoreResult, DependencyError};

/// Principal id used by internal maintenance code.
pub const SYSTEM_ACTOR: &str = "system";

/// Who is acting, from where, and until when.
///
/// ```
/// use std::time::Duration;
/// use helios_secure_core::context::AccessContext;
///
/// let ctx = AccessContext::new("dr-tanaka")
///     .with_ip_address("10.0.0.7")
///     .with_user_agent("records-ui/2.3")
///     .with_timeout(Duration::from_secs(5));
/// assert_eq!(ctx.actor_id(), "dr-tanaka");
/// assert!(ctx.deadline().is_some());
/// ```
#[derive(Debug, Clone)]
pub struct AccessContext {
    actor_id: String,
    correlation_id: Option<String>,
    ip_address: Option<String>,
    user_agent: Option<String>,
    deadline: Option<Instant>,
}

impl AccessContext {
    /// Creates a context for the given principal.
    pub fn new(actor_id: impl Into<String>) -> Self {
        Self {
            actor_id: actor_id.into(),
            correlation_id: None,
            ip_address: None,
            user_agent: None,
            deadline: None,
        }
    }

    /// Creates the internal system context.
    pub fn system() -> Self {
        Self::new(SYSTEM_ACTOR)
    }

    /// Sets a correlation id for tracing.
    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    /// Sets the network origin of the request.
    pub fn with_ip_address(mut self, ip_address: impl Into<String>) -> Self {
        self.ip_address = Some(ip_address.into());
        self
    }

    /// Sets the client string of the request.
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    /// Sets an absolute deadline.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Sets a deadline relative to now.
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Returns the acting principal.
    pub fn actor_id(&self) -> &str {
        &self.actor_id
    }

    /// Returns the correlation id, if any.
    pub fn correlation_id(&self) -> Option<&str> {
        self.correlation_id.as_deref()
    }

    /// Returns the request's network origin, if any.
    pub fn ip_address(&self) -> Option<&str> {
        self.ip_address.as_deref()
    }

    /// Returns the request's client string, if any.
    pub fn user_agent(&self) -> Option<&str> {
        self.user_agent.as_deref()
    }

    /// Returns the deadline, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Returns true if this is the system context.
    pub fn is_system(&self) -> bool {
        self.actor_id == SYSTEM_ACTOR
    }

    /// Runs one store or key-service call under the context's deadline.
    ///
    /// An already-elapsed deadline fails before the call starts. Expiry while
    /// the call is in flight drops it; a write the store already acknowledged
    /// stays written. Events raised during the call carry the actor and
    /// correlation id.
    #[tracing::instrument(
        level = "debug",
        name = "access",
        skip(self, call),
        fields(actor = %self.actor_id, correlation_id = self.correlation_id.as_deref())
    )]
    pub async fn run<T, F>(&self, operation: &str, call: F) -> CoreResult<T>
    where
        F: Future<Output = CoreResult<T>>,
    {
        let Some(deadline) = self.deadline else {
            return call.await;
        };
        if Instant::now() >= deadline {
            return Err(deadline_exceeded(operation));
        }
        match tokio::time::timeout_at(deadline, call).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!("Deadline exceeded");
                Err(deadline_exceeded(operation))
            }
        }
    }
}

fn deadline_exceeded(operation: &str) -> CoreError {
    CoreError::Dependency(DependencyError::DeadlineExceeded {
        operation: operation.to_string(),
    })
}
