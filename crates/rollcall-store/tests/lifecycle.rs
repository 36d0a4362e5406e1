//! End-to-end enrollment and attendance flows over a real SQLite store.

use std::sync::Arc;

use rollcall_core::{
    fingerprint, AttendanceService, EmbeddingExtractor, EngineError, EnrollmentService, EventKind,
    Extraction, ExtractorError, L2Matcher, LivenessError, LivenessGate, LivenessVerdict, Template,
    DEFAULT_MATCH_THRESHOLD,
};
use rollcall_store::{generate_key, SqliteStore};

struct AlwaysReal;

impl LivenessGate for AlwaysReal {
    fn check(&self, _image: &[u8]) -> Result<LivenessVerdict, LivenessError> {
        Ok(LivenessVerdict::Real)
    }
}

/// Maps an image to a 3-dim template from its first byte, so tests can
/// place probes at exact distances.
struct FirstByteExtractor;

impl EmbeddingExtractor for FirstByteExtractor {
    fn extract(&self, image: &[u8]) -> Result<Extraction, ExtractorError> {
        match image.first() {
            Some(&b) => Ok(Extraction::Face(Template::new(vec![
                f32::from(b),
                0.0,
                0.0,
            ]))),
            None => Ok(Extraction::NoFace),
        }
    }
}

fn services(
    store: SqliteStore,
) -> (
    EnrollmentService<SqliteStore>,
    AttendanceService<SqliteStore>,
) {
    let gate: Arc<dyn LivenessGate> = Arc::new(AlwaysReal);
    let extractor: Arc<dyn EmbeddingExtractor> = Arc::new(FirstByteExtractor);
    (
        EnrollmentService::new(store.clone(), gate.clone(), extractor.clone()),
        AttendanceService::new(
            store,
            gate,
            extractor,
            Arc::new(L2Matcher),
            DEFAULT_MATCH_THRESHOLD,
        ),
    )
}

const IMG_ADA: &[u8] = &[10, 1];
const IMG_GRACE: &[u8] = &[40, 2];
const IMG_ADA_RETAKE: &[u8] = &[10, 7];

#[test]
fn test_enroll_match_and_report_lifecycle() {
    let store = SqliteStore::open_in_memory(None).unwrap();
    let (enrollment, attendance) = services(store.clone());

    enrollment
        .enroll("emp-001", IMG_ADA, Some("Ada"), Some("ops"))
        .unwrap();
    enrollment
        .enroll("emp-002", IMG_GRACE, Some("Grace"), Some("ops"))
        .unwrap();

    // Probe identical to Ada's enrollment image.
    let checked_in = attendance
        .record(IMG_ADA, "kiosk-1", EventKind::In, None)
        .unwrap();
    assert_eq!(checked_in.event.identity_id, "emp-001");
    assert_eq!(checked_in.display_name, "Ada");
    assert!(checked_in.event.confidence.unwrap() < 1e-6);

    // Different bytes, same leading byte: still lands on Grace.
    let checked_out = attendance
        .record(&[40, 9], "kiosk-2", EventKind::Out, None)
        .unwrap();
    assert_eq!(checked_out.event.identity_id, "emp-002");

    let window = store
        .events_between(
            checked_in.event.timestamp - chrono::Duration::hours(1),
            checked_in.event.timestamp + chrono::Duration::hours(1),
        )
        .unwrap();
    let ids: Vec<&str> = window.iter().map(|e| e.identity_id.as_str()).collect();
    assert_eq!(ids, vec!["emp-002", "emp-001"]);

    // Retake keeps the old template in history and updates the fingerprint.
    let refreshed = enrollment
        .enroll("emp-001", IMG_ADA_RETAKE, None, Some("ops"))
        .unwrap();
    assert!(!refreshed.created);
    assert_eq!(refreshed.identity.template_version_count(), 2);
    let by_fp = enrollment
        .lookup_by_fingerprint(&fingerprint(IMG_ADA_RETAKE))
        .unwrap();
    assert_eq!(by_fp.identity_id, "emp-001");

    // Deactivation hides Ada from the matcher without touching her history.
    enrollment.set_active("emp-001", false, Some("ops")).unwrap();
    let err = attendance
        .record(IMG_ADA, "kiosk-1", EventKind::In, None)
        .unwrap_err();
    assert!(matches!(err, EngineError::IdentityNotRecognized));

    enrollment.set_active("emp-001", true, Some("ops")).unwrap();
    let back = attendance
        .record(IMG_ADA, "kiosk-1", EventKind::In, None)
        .unwrap();
    assert_eq!(back.event.identity_id, "emp-001");

    let stats = store.stats().unwrap();
    assert_eq!(stats.identities, 2);
    assert_eq!(stats.active_templates, 2);
    assert_eq!(stats.events, 3);
}

#[test]
fn test_unrecognized_probe_leaves_log_empty() {
    let store = SqliteStore::open_in_memory(None).unwrap();
    let (enrollment, attendance) = services(store.clone());
    enrollment.enroll("emp-001", IMG_ADA, None, None).unwrap();

    // First byte 12 puts the probe at distance 2.0 from the only identity.
    let err = attendance
        .record(&[12, 1], "kiosk-1", EventKind::In, None)
        .unwrap_err();
    assert!(matches!(err, EngineError::IdentityNotRecognized));
    assert_eq!(store.stats().unwrap().events, 0);
}

#[test]
fn test_sealed_store_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("attendance.db");
    let key = generate_key();

    {
        let store = SqliteStore::open(&path, Some(key)).unwrap();
        let (enrollment, attendance) = services(store);
        enrollment
            .enroll("emp-001", IMG_ADA, Some("Ada"), None)
            .unwrap();
        attendance
            .record(IMG_ADA, "kiosk-1", EventKind::In, None)
            .unwrap();
    }

    let store = SqliteStore::open(&path, Some(key)).unwrap();
    let (_, attendance) = services(store.clone());
    let outcome = attendance
        .record(IMG_ADA, "kiosk-1", EventKind::Out, None)
        .unwrap();
    assert_eq!(outcome.event.identity_id, "emp-001");
    assert_eq!(outcome.display_name, "Ada");
    assert_eq!(store.stats().unwrap().events, 2);
}
