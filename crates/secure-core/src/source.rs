//! Identifier and clock source for new rows.

use std::fmt::Debug;

use chrono::{DateTime, SubsecRound, Utc};

/// Supplies unique ids and the current time for new entities and log entries.
pub trait IdentitySource: Send + Sync + Debug {
    /// Returns a fresh unique id.
    fn new_id(&self) -> String;

    /// Returns the current instant.
    fn now(&self) -> DateTime<Utc>;
}

/// Random v4 UUIDs and the system clock.
///
/// Times are truncated to microseconds, the precision timestamps are stored
/// with, so returned entities compare equal to their stored form.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemSource;

impl IdentitySource for SystemSource {
    fn new_id(&self) -> String {
        uuid::Uuid::new_v4().to_string()
    }

    fn now(&self) -> DateTime<Utc> {
        Utc::now().trunc_subsecs(6)
    }
}
