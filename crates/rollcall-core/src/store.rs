//! Persistence contracts consumed by the engine services.

use thiserror::Error;

use crate::types::{AttendanceEvent, Identity, NewAttendanceEvent};

/// Infrastructure-level store failure.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The store cannot be reached or a persisted row is unreadable.
    #[error("store unavailable: {0}")]
    Unavailable(String),
    /// An insert or compare-and-update lost a race.
    #[error("conflicting concurrent update for identity {identity_id}")]
    Conflict { identity_id: String },
}

/// Repository of one current template plus history per identity.
///
/// Implementations must provide the two atomicity guarantees the services
/// rely on: [`active_snapshot`](Self::active_snapshot) is one consistent
/// read (no identity visible half-way through a template rotation), and
/// [`update`](Self::update) is compare-and-update on `revision`, where a
/// stale revision returns [`StoreError::Conflict`] instead of silently
/// losing a history entry.
pub trait TemplateStore: Send + Sync {
    fn get(&self, identity_id: &str) -> Result<Option<Identity>, StoreError>;

    /// Insert a new identity; a duplicate `identity_id` is a conflict.
    fn insert(&self, identity: &Identity) -> Result<(), StoreError>;

    /// Persist `identity` verbatim (its `revision` already incremented by
    /// the caller) if the stored revision still equals `expected_revision`.
    fn update(&self, identity: &Identity, expected_revision: u64) -> Result<(), StoreError>;

    /// All active identities with a non-empty current template, in
    /// ascending `identity_id` order, read as one consistent snapshot.
    /// This ordering is the documented tie-break order for matching.
    fn active_snapshot(&self) -> Result<Vec<Identity>, StoreError>;

    /// An identity whose most recent enrollment used an image with this
    /// fingerprint; the lowest `identity_id` wins if several share it.
    fn find_by_fingerprint(&self, fingerprint: &str) -> Result<Option<Identity>, StoreError>;
}

/// Append-only attendance event log. Event ids are assigned monotonically
/// and timestamps are stamped by the store at insert.
pub trait AttendanceLog: Send + Sync {
    fn append(&self, event: NewAttendanceEvent) -> Result<AttendanceEvent, StoreError>;
}
