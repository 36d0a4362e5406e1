//! Enrollment lifecycle: identity creation, template rotation, activation.

use std::sync::Arc;

use chrono::Utc;

use crate::error::EngineError;
use crate::extractor::{self, EmbeddingExtractor};
use crate::fingerprint;
use crate::liveness::{self, LivenessGate};
use crate::store::TemplateStore;
use crate::types::Identity;

/// Result of one enrollment call.
#[derive(Debug, Clone)]
pub struct EnrollOutcome {
    pub identity: Identity,
    /// True when this call created the identity rather than refreshing it.
    pub created: bool,
}

/// Result of an activation toggle.
#[derive(Debug, Clone)]
pub struct SetActiveOutcome {
    pub identity: Identity,
    /// False when the identity was already in the requested state.
    pub changed: bool,
}

/// Orchestrates hashing, liveness, extraction, and the template-store write.
///
/// All identity mutation flows through this service. Writes go through the
/// store's compare-and-update so concurrent rotations of the same identity
/// cannot interleave; the loser of a race gets
/// [`EngineError::StoreConflict`] and retries from the top.
pub struct EnrollmentService<S> {
    store: S,
    gate: Arc<dyn LivenessGate>,
    extractor: Arc<dyn EmbeddingExtractor>,
}

impl<S: TemplateStore> EnrollmentService<S> {
    pub fn new(
        store: S,
        gate: Arc<dyn LivenessGate>,
        extractor: Arc<dyn EmbeddingExtractor>,
    ) -> Self {
        Self {
            store,
            gate,
            extractor,
        }
    }

    /// Enroll or refresh one identity from a raw image.
    ///
    /// Rejects before any store mutation on a spoof verdict or when no face
    /// is extractable. Re-enrolling an existing identity pushes the prior
    /// current template onto history; the same image enrolled twice grows
    /// history each time, it is not a no-op.
    pub fn enroll(
        &self,
        identity_id: &str,
        image: &[u8],
        display_name: Option<&str>,
        actor: Option<&str>,
    ) -> Result<EnrollOutcome, EngineError> {
        let fp = fingerprint::fingerprint(image);
        liveness::enforce(self.gate.as_ref(), image)?;
        let template = extractor::extract_collapsed(self.extractor.as_ref(), image)?;

        // Same source image already enrolled under another identity is a
        // duplicate-enrollment signal: surfaced to the security log and the
        // fingerprint lookup, never a rejection.
        if let Some(other) = self.store.find_by_fingerprint(&fp)? {
            if other.identity_id != identity_id {
                tracing::warn!(
                    identity_id,
                    existing_identity_id = %other.identity_id,
                    fingerprint = %fp,
                    "image fingerprint already enrolled under another identity"
                );
            }
        }

        match self.store.get(identity_id)? {
            None => {
                tracing::info!(identity_id, fingerprint = %fp, "enrolling new identity");
                let identity = Identity::new(
                    identity_id,
                    display_name.unwrap_or(identity_id),
                    template,
                    fp,
                    actor,
                );
                self.store.insert(&identity)?;
                Ok(EnrollOutcome {
                    identity,
                    created: true,
                })
            }
            Some(mut identity) => {
                let expected = identity.revision;
                identity.rotate_template(template, fp);
                if let Some(name) = display_name {
                    identity.display_name = name.to_string();
                }
                identity.updated_at = Utc::now();
                identity.updated_by = actor.map(str::to_owned);
                identity.revision += 1;
                self.store.update(&identity, expected)?;
                tracing::info!(
                    identity_id,
                    template_versions = identity.template_version_count(),
                    "identity template rotated"
                );
                Ok(EnrollOutcome {
                    identity,
                    created: false,
                })
            }
        }
    }

    /// Toggle matcher visibility for one identity.
    ///
    /// Disabling requires an enrolled template, and that check runs first:
    /// a template-less identity is rejected even when already inactive.
    /// Toggling to the current state is a no-op.
    pub fn set_active(
        &self,
        identity_id: &str,
        active: bool,
        actor: Option<&str>,
    ) -> Result<SetActiveOutcome, EngineError> {
        let Some(mut identity) = self.store.get(identity_id)? else {
            return Err(EngineError::IdentityNotFound(identity_id.to_string()));
        };
        if !active && identity.current_template.is_none() {
            return Err(EngineError::NoCurrentTemplate(identity_id.to_string()));
        }
        if identity.active == active {
            return Ok(SetActiveOutcome {
                identity,
                changed: false,
            });
        }
        let expected = identity.revision;
        identity.active = active;
        identity.updated_at = Utc::now();
        identity.updated_by = actor.map(str::to_owned);
        identity.revision += 1;
        self.store.update(&identity, expected)?;
        tracing::info!(identity_id, active, "identity activation toggled");
        Ok(SetActiveOutcome {
            identity,
            changed: true,
        })
    }

    /// Fingerprint-addressed audit lookup.
    pub fn lookup_by_fingerprint(&self, fp: &str) -> Result<Identity, EngineError> {
        self.store
            .find_by_fingerprint(fp)?
            .ok_or_else(|| EngineError::IdentityNotFound(fp.to_string()))
    }
}
