use thiserror::Error;

use crate::store::StoreError;

/// Engine error taxonomy.
///
/// The business kinds map to distinct user-facing outcomes at the API layer.
/// The store kinds are infrastructure faults: callers retry with backoff and
/// monitoring alerts on them; routine non-matches get neither.
#[derive(Error, Debug)]
pub enum EngineError {
    /// The extractor found zero (or ambiguously many) faces. Extractor
    /// backend failures are logged internally and reported as this same
    /// kind, so callers cannot probe whether the extractor itself failed.
    #[error("no face detected in the supplied image")]
    NoFaceDetected,
    /// The liveness gate rejected the presentation, or failed closed.
    #[error("presentation rejected by liveness gate")]
    SpoofingDetected,
    /// Best distance exceeded the acceptance threshold, or no candidate
    /// was comparable at all.
    #[error("no enrolled identity matched the probe")]
    IdentityNotRecognized,
    #[error("identity not found: {0}")]
    IdentityNotFound(String),
    /// Refusal to disable an identity that has never enrolled a template.
    #[error("identity {0} has no current template")]
    NoCurrentTemplate(String),
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),
    /// Lost a compare-and-update race; retry the whole operation.
    #[error("conflicting concurrent update for identity {0}")]
    StoreConflict(String),
}

impl EngineError {
    /// Infrastructure faults alert monitoring; business outcomes do not.
    pub fn is_infrastructure(&self) -> bool {
        matches!(
            self,
            EngineError::StoreUnavailable(_) | EngineError::StoreConflict(_)
        )
    }
}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable(msg) => EngineError::StoreUnavailable(msg),
            StoreError::Conflict { identity_id } => EngineError::StoreConflict(identity_id),
        }
    }
}
