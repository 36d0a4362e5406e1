//! rollcall-core — Biometric identity matching and enrollment engine.
//!
//! Turns face template vectors into enrollment decisions and attendance
//! events: liveness gating, nearest-neighbor identification over the active
//! population, and an append-only event log, all behind storage and model
//! traits so the daemon can wire in SQLite and the model runtime.

pub mod attendance;
pub mod enroll;
pub mod error;
pub mod extractor;
pub mod fingerprint;
pub mod liveness;
pub mod matcher;
pub mod store;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use attendance::{AttendanceOutcome, AttendanceService};
pub use enroll::{EnrollOutcome, EnrollmentService, SetActiveOutcome};
pub use error::EngineError;
pub use extractor::{EmbeddingExtractor, Extraction, ExtractorError};
pub use fingerprint::{fingerprint, FINGERPRINT_LEN};
pub use liveness::{LivenessError, LivenessGate, LivenessVerdict};
pub use matcher::{L2Matcher, MatchHit, Matcher, DEFAULT_MATCH_THRESHOLD};
pub use store::{AttendanceLog, StoreError, TemplateStore};
pub use types::{
    AttendanceEvent, EventKind, Identity, NewAttendanceEvent, Template, UnknownEventKind,
};
