//! Liveness gate boundary and the accept/reject policy that owns it.

use thiserror::Error;

use crate::error::EngineError;

/// Verdict from the anti-spoofing model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LivenessVerdict {
    /// A live person.
    Real,
    /// A photo/screen/mask replay.
    Spoof,
    /// The gate could not locate a face to judge.
    Undetermined,
}

/// Gate backend fault (transport error, model crash, timeout).
#[derive(Error, Debug)]
pub enum LivenessError {
    #[error("liveness backend failure: {0}")]
    Backend(String),
}

/// External liveness gate contract.
pub trait LivenessGate: Send + Sync {
    fn check(&self, image: &[u8]) -> Result<LivenessVerdict, LivenessError>;
}

/// Apply the engine's liveness policy to one presentation.
///
/// `Real` proceeds. `Spoof` rejects the whole operation. `Undetermined`
/// fails open: the gate and the extractor may disagree on face presence, and
/// a missing verdict must not block a user the extractor can handle. A
/// backend fault fails closed: inability to evaluate liveness never defaults
/// to "assume real".
pub(crate) fn enforce(gate: &dyn LivenessGate, image: &[u8]) -> Result<(), EngineError> {
    match gate.check(image) {
        Ok(LivenessVerdict::Real) => Ok(()),
        Ok(LivenessVerdict::Spoof) => {
            tracing::warn!("liveness gate rejected presentation as spoof");
            Err(EngineError::SpoofingDetected)
        }
        Ok(LivenessVerdict::Undetermined) => {
            tracing::debug!("liveness verdict undetermined; failing open to extraction");
            Ok(())
        }
        Err(err) => {
            tracing::warn!(error = %err, "liveness gate failure; failing closed");
            Err(EngineError::SpoofingDetected)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(LivenessVerdict);

    impl LivenessGate for Fixed {
        fn check(&self, _image: &[u8]) -> Result<LivenessVerdict, LivenessError> {
            Ok(self.0)
        }
    }

    struct Broken;

    impl LivenessGate for Broken {
        fn check(&self, _image: &[u8]) -> Result<LivenessVerdict, LivenessError> {
            Err(LivenessError::Backend("model socket closed".into()))
        }
    }

    #[test]
    fn test_real_proceeds() {
        assert!(enforce(&Fixed(LivenessVerdict::Real), b"img").is_ok());
    }

    #[test]
    fn test_spoof_rejects() {
        assert!(matches!(
            enforce(&Fixed(LivenessVerdict::Spoof), b"img"),
            Err(EngineError::SpoofingDetected)
        ));
    }

    #[test]
    fn test_undetermined_fails_open() {
        assert!(enforce(&Fixed(LivenessVerdict::Undetermined), b"img").is_ok());
    }

    #[test]
    fn test_backend_failure_fails_closed() {
        assert!(matches!(
            enforce(&Broken, b"img"),
            Err(EngineError::SpoofingDetected)
        ));
    }
}
