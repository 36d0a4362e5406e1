//! Attendance recording: probe image in, immutable check-in/out event out.

use std::sync::Arc;

use crate::error::EngineError;
use crate::extractor::{self, EmbeddingExtractor};
use crate::liveness::{self, LivenessGate};
use crate::matcher::Matcher;
use crate::store::{AttendanceLog, TemplateStore};
use crate::types::{AttendanceEvent, EventKind, NewAttendanceEvent};

/// A successfully recorded event plus the matched identity's display name,
/// so callers can render a greeting without a second lookup.
#[derive(Debug, Clone)]
pub struct AttendanceOutcome {
    pub event: AttendanceEvent,
    pub display_name: String,
}

/// Runs the recognition pipeline for one probe image and appends the event.
///
/// The pipeline is strictly ordered: liveness, extraction, nearest-neighbor
/// search over the active snapshot, then the log append. A failure at any
/// stage leaves the log untouched.
pub struct AttendanceService<S> {
    store: S,
    gate: Arc<dyn LivenessGate>,
    extractor: Arc<dyn EmbeddingExtractor>,
    matcher: Arc<dyn Matcher>,
    threshold: f32,
}

impl<S: TemplateStore + AttendanceLog> AttendanceService<S> {
    pub fn new(
        store: S,
        gate: Arc<dyn LivenessGate>,
        extractor: Arc<dyn EmbeddingExtractor>,
        matcher: Arc<dyn Matcher>,
        threshold: f32,
    ) -> Self {
        Self {
            store,
            gate,
            extractor,
            matcher,
            threshold,
        }
    }

    /// Identify the person in `image` and append one `kind` event for them.
    ///
    /// `claimed_identity` is advisory only. It never biases the search; when
    /// the match disagrees with the claim the mismatch is logged and the
    /// matched identity wins.
    pub fn record(
        &self,
        image: &[u8],
        device_id: &str,
        kind: EventKind,
        claimed_identity: Option<&str>,
    ) -> Result<AttendanceOutcome, EngineError> {
        liveness::enforce(self.gate.as_ref(), image)?;
        let probe = extractor::extract_collapsed(self.extractor.as_ref(), image)?;

        let candidates = self.store.active_snapshot()?;
        let Some(hit) = self.matcher.best_match(&probe, &candidates, self.threshold) else {
            tracing::info!(
                device_id,
                claimed = claimed_identity,
                candidates = candidates.len(),
                "probe matched no enrolled identity"
            );
            return Err(EngineError::IdentityNotRecognized);
        };

        if let Some(claimed) = claimed_identity {
            if claimed != hit.identity.identity_id {
                tracing::warn!(
                    claimed,
                    matched = %hit.identity.identity_id,
                    distance = hit.distance,
                    "claimed identity differs from matched identity"
                );
            }
        }

        let display_name = hit.identity.display_name.clone();
        let distance = hit.distance;
        let event = self.store.append(NewAttendanceEvent {
            identity_id: hit.identity.identity_id.clone(),
            device_id: device_id.to_string(),
            kind,
            confidence: Some(distance),
        })?;
        tracing::info!(
            event_id = event.event_id,
            identity_id = %event.identity_id,
            device_id,
            kind = %event.kind,
            distance,
            "attendance recorded"
        );
        Ok(AttendanceOutcome {
            event,
            display_name,
        })
    }
}
