//! Shared test doubles for the service tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use chrono::Utc;

use crate::extractor::{EmbeddingExtractor, Extraction, ExtractorError};
use crate::liveness::{LivenessError, LivenessGate, LivenessVerdict};
use crate::store::{AttendanceLog, StoreError, TemplateStore};
use crate::types::{AttendanceEvent, Identity, NewAttendanceEvent, Template};

pub(crate) fn template(values: &[f32]) -> Template {
    Template::new(values.to_vec())
}

#[derive(Default)]
struct MemoryInner {
    identities: Mutex<HashMap<String, Identity>>,
    events: Mutex<Vec<AttendanceEvent>>,
}

/// In-memory store honoring the snapshot and compare-and-update contracts.
/// Cloning shares state, mirroring the shape of the SQLite-backed store.
#[derive(Clone, Default)]
pub(crate) struct MemoryStore {
    inner: Arc<MemoryInner>,
}

impl MemoryStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn seed(&self, identity: Identity) {
        self.inner
            .identities
            .lock()
            .unwrap()
            .insert(identity.identity_id.clone(), identity);
    }

    pub(crate) fn identity_count(&self) -> usize {
        self.inner.identities.lock().unwrap().len()
    }

    pub(crate) fn event_count(&self) -> usize {
        self.inner.events.lock().unwrap().len()
    }

    pub(crate) fn events(&self) -> Vec<AttendanceEvent> {
        self.inner.events.lock().unwrap().clone()
    }
}

impl TemplateStore for MemoryStore {
    fn get(&self, identity_id: &str) -> Result<Option<Identity>, StoreError> {
        Ok(self.inner.identities.lock().unwrap().get(identity_id).cloned())
    }

    fn insert(&self, identity: &Identity) -> Result<(), StoreError> {
        let mut map = self.inner.identities.lock().unwrap();
        if map.contains_key(&identity.identity_id) {
            return Err(StoreError::Conflict {
                identity_id: identity.identity_id.clone(),
            });
        }
        map.insert(identity.identity_id.clone(), identity.clone());
        Ok(())
    }

    fn update(&self, identity: &Identity, expected_revision: u64) -> Result<(), StoreError> {
        let mut map = self.inner.identities.lock().unwrap();
        match map.get(&identity.identity_id) {
            Some(stored) if stored.revision == expected_revision => {
                map.insert(identity.identity_id.clone(), identity.clone());
                Ok(())
            }
            Some(_) => Err(StoreError::Conflict {
                identity_id: identity.identity_id.clone(),
            }),
            None => Err(StoreError::Unavailable(format!(
                "identity {} vanished mid-update",
                identity.identity_id
            ))),
        }
    }

    fn active_snapshot(&self) -> Result<Vec<Identity>, StoreError> {
        let map = self.inner.identities.lock().unwrap();
        let mut snapshot: Vec<Identity> = map.values().filter(|i| i.matchable()).cloned().collect();
        snapshot.sort_by(|a, b| a.identity_id.cmp(&b.identity_id));
        Ok(snapshot)
    }

    fn find_by_fingerprint(&self, fingerprint: &str) -> Result<Option<Identity>, StoreError> {
        let map = self.inner.identities.lock().unwrap();
        let mut hits: Vec<&Identity> = map
            .values()
            .filter(|i| i.image_fingerprint.as_deref() == Some(fingerprint))
            .collect();
        hits.sort_by(|a, b| a.identity_id.cmp(&b.identity_id));
        Ok(hits.first().map(|i| (*i).clone()))
    }
}

impl AttendanceLog for MemoryStore {
    fn append(&self, event: NewAttendanceEvent) -> Result<AttendanceEvent, StoreError> {
        let mut events = self.inner.events.lock().unwrap();
        let stored = AttendanceEvent {
            event_id: events.len() as i64 + 1,
            identity_id: event.identity_id,
            device_id: event.device_id,
            kind: event.kind,
            timestamp: Utc::now(),
            confidence: event.confidence,
        };
        events.push(stored.clone());
        Ok(stored)
    }
}

enum GateScript {
    Verdict(LivenessVerdict),
    Fail,
}

/// Gate double returning one scripted outcome and counting calls.
pub(crate) struct ScriptedGate {
    script: GateScript,
    pub(crate) calls: AtomicUsize,
}

impl ScriptedGate {
    pub(crate) fn real() -> Arc<Self> {
        Arc::new(Self {
            script: GateScript::Verdict(LivenessVerdict::Real),
            calls: AtomicUsize::new(0),
        })
    }

    pub(crate) fn spoof() -> Arc<Self> {
        Arc::new(Self {
            script: GateScript::Verdict(LivenessVerdict::Spoof),
            calls: AtomicUsize::new(0),
        })
    }

    pub(crate) fn undetermined() -> Arc<Self> {
        Arc::new(Self {
            script: GateScript::Verdict(LivenessVerdict::Undetermined),
            calls: AtomicUsize::new(0),
        })
    }

    pub(crate) fn broken() -> Arc<Self> {
        Arc::new(Self {
            script: GateScript::Fail,
            calls: AtomicUsize::new(0),
        })
    }
}

impl LivenessGate for ScriptedGate {
    fn check(&self, _image: &[u8]) -> Result<LivenessVerdict, LivenessError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.script {
            GateScript::Verdict(v) => Ok(v),
            GateScript::Fail => Err(LivenessError::Backend("scripted gate failure".into())),
        }
    }
}

/// Extractor double deriving the template from the image bytes, so tests can
/// predict exactly which vector a given image yields: byte sum, length, 1.
pub(crate) struct ByteSumExtractor {
    pub(crate) calls: AtomicUsize,
}

impl ByteSumExtractor {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
        })
    }

    pub(crate) fn template_for(image: &[u8]) -> Template {
        let sum = image.iter().map(|b| *b as f32).sum::<f32>();
        Template::new(vec![sum, image.len() as f32, 1.0])
    }
}

impl EmbeddingExtractor for ByteSumExtractor {
    fn extract(&self, image: &[u8]) -> Result<Extraction, ExtractorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if image.is_empty() {
            return Ok(Extraction::NoFace);
        }
        Ok(Extraction::Face(Self::template_for(image)))
    }
}

/// Extractor double returning one fixed template for every image.
pub(crate) struct FixedExtractor(pub(crate) Template);

impl EmbeddingExtractor for FixedExtractor {
    fn extract(&self, _image: &[u8]) -> Result<Extraction, ExtractorError> {
        Ok(Extraction::Face(self.0.clone()))
    }
}

/// Extractor double that never sees a face.
pub(crate) struct NoFaceExtractor {
    pub(crate) calls: AtomicUsize,
}

impl NoFaceExtractor {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
        })
    }
}

impl EmbeddingExtractor for NoFaceExtractor {
    fn extract(&self, _image: &[u8]) -> Result<Extraction, ExtractorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Extraction::NoFace)
    }
}

/// Extractor double whose backend always faults.
pub(crate) struct BrokenExtractor;

impl EmbeddingExtractor for BrokenExtractor {
    fn extract(&self, _image: &[u8]) -> Result<Extraction, ExtractorError> {
        Err(ExtractorError::Backend("scripted extractor failure".into()))
    }
}
