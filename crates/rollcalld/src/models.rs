//! Clients for the face model runtime on the system bus.
//!
//! Embedding extraction and liveness classification run in a separate
//! service (`org.rollcall.FaceModels1`); this daemon never loads a model
//! itself. Calls originate on the engine thread, so the blocking proxy
//! variant is used, with a method timeout so a wedged runtime cannot stall
//! the engine indefinitely. A timed-out or unreachable runtime surfaces as
//! a backend error and the fail policies in the engine take it from there.

use std::time::Duration;

use rollcall_core::{
    EmbeddingExtractor, Extraction, ExtractorError, LivenessError, LivenessGate, LivenessVerdict,
    Template,
};

// `#[zbus::proxy]` generates both `FaceModelsProxy` (async) and
// `FaceModelsProxyBlocking` (synchronous). Only the blocking variant is used.
#[zbus::proxy(
    interface = "org.rollcall.FaceModels1",
    default_service = "org.rollcall.FaceModels1",
    default_path = "/org/rollcall/FaceModels1"
)]
pub(crate) trait FaceModels {
    /// Detect the most prominent face and return `(found, embedding,
    /// model_version)`.
    async fn extract(&self, image: &[u8]) -> zbus::Result<(bool, Vec<f64>, String)>;

    /// Classify the probe as `"real"`, `"spoof"`, or `"undetermined"`.
    async fn check_liveness(&self, image: &[u8]) -> zbus::Result<String>;
}

/// Connect to the model runtime over the system bus.
pub fn connect(timeout: Duration) -> zbus::Result<FaceModelsProxyBlocking<'static>> {
    let conn = zbus::blocking::connection::Builder::system()?
        .method_timeout(timeout)
        .build()?;
    FaceModelsProxyBlocking::new(&conn)
}

/// Embedding extractor backed by the remote model runtime.
pub struct DbusExtractor {
    proxy: FaceModelsProxyBlocking<'static>,
}

impl DbusExtractor {
    pub fn new(proxy: FaceModelsProxyBlocking<'static>) -> Self {
        Self { proxy }
    }
}

impl EmbeddingExtractor for DbusExtractor {
    fn extract(&self, image: &[u8]) -> Result<Extraction, ExtractorError> {
        let (found, values, model_version) = self
            .proxy
            .extract(image)
            .map_err(|e| ExtractorError::Backend(e.to_string()))?;
        collapse_extraction(found, values, model_version)
    }
}

/// Liveness gate backed by the remote model runtime.
pub struct DbusLivenessGate {
    proxy: FaceModelsProxyBlocking<'static>,
}

impl DbusLivenessGate {
    pub fn new(proxy: FaceModelsProxyBlocking<'static>) -> Self {
        Self { proxy }
    }
}

impl LivenessGate for DbusLivenessGate {
    fn check(&self, image: &[u8]) -> Result<LivenessVerdict, LivenessError> {
        let verdict = self
            .proxy
            .check_liveness(image)
            .map_err(|e| LivenessError::Backend(e.to_string()))?;
        parse_verdict(&verdict)
    }
}

/// A `found` flag with an empty vector is a runtime contract violation,
/// reported as a backend fault rather than a clean no-face result.
fn collapse_extraction(
    found: bool,
    values: Vec<f64>,
    model_version: String,
) -> Result<Extraction, ExtractorError> {
    if !found {
        return Ok(Extraction::NoFace);
    }
    if values.is_empty() {
        return Err(ExtractorError::Backend(
            "runtime reported a face but returned an empty embedding".into(),
        ));
    }
    Ok(Extraction::Face(Template {
        values: values.into_iter().map(|v| v as f32).collect(),
        model_version: Some(model_version),
    }))
}

fn parse_verdict(raw: &str) -> Result<LivenessVerdict, LivenessError> {
    match raw {
        "real" => Ok(LivenessVerdict::Real),
        "spoof" => Ok(LivenessVerdict::Spoof),
        "undetermined" => Ok(LivenessVerdict::Undetermined),
        other => Err(LivenessError::Backend(format!(
            "unknown liveness verdict {other:?}"
        ))),
    }
}
