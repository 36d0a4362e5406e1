//! Embedding extractor boundary.
//!
//! The extractor is an external model: image bytes in, one fixed-length
//! vector out. "More than one face" and "zero faces" both come back as
//! [`Extraction::NoFace`]; face selection belongs to the extractor, not to
//! this engine.

use thiserror::Error;

use crate::error::EngineError;
use crate::types::Template;

/// Extractor backend fault (transport error, model crash, timeout).
///
/// Distinguished from [`Extraction::NoFace`] so the failure can be logged,
/// but collapsed to the same user-visible error before leaving the engine.
#[derive(Error, Debug)]
pub enum ExtractorError {
    #[error("extractor backend failure: {0}")]
    Backend(String),
}

/// Discriminated extraction outcome: a usable face or none at all.
#[derive(Debug, Clone, PartialEq)]
pub enum Extraction {
    Face(Template),
    NoFace,
}

/// External embedding extractor contract.
pub trait EmbeddingExtractor: Send + Sync {
    fn extract(&self, image: &[u8]) -> Result<Extraction, ExtractorError>;
}

/// Run the extractor and collapse its failure modes.
///
/// A backend fault is logged with its detail and then reported as
/// `NoFaceDetected`, identical to an empty frame: the error surface must not
/// reveal to a caller probing the boundary whether the extractor itself
/// failed.
pub(crate) fn extract_collapsed(
    extractor: &dyn EmbeddingExtractor,
    image: &[u8],
) -> Result<Template, EngineError> {
    match extractor.extract(image) {
        Ok(Extraction::Face(template)) => Ok(template),
        Ok(Extraction::NoFace) => Err(EngineError::NoFaceDetected),
        Err(err) => {
            tracing::warn!(error = %err, "extractor backend failure collapsed to no-face");
            Err(EngineError::NoFaceDetected)
        }
    }
}
