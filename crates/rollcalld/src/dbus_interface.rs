use chrono::{DateTime, Utc};
use zbus::interface;

use rollcall_core::{AttendanceEvent, EventKind, Identity};

use crate::engine::{EngineError, EngineHandle};

/// D-Bus surface of the daemon.
///
/// Bus name: `org.rollcall.Attendance1` (system bus)
/// Object path: `/org/rollcall/Attendance1`
///
/// Methods return JSON strings rather than nested D-Bus structs so clients
/// in any language can consume them without bespoke type mappings. Business
/// failures come back as `org.freedesktop.DBus.Error.Failed` with a stable
/// `code: detail` message; bad arguments as `InvalidArgs`.
pub struct RollcallService {
    engine: EngineHandle,
    threshold: f32,
    sealed: bool,
}

impl RollcallService {
    pub fn new(engine: EngineHandle, threshold: f32, sealed: bool) -> Self {
        Self {
            engine,
            threshold,
            sealed,
        }
    }
}

#[interface(name = "org.rollcall.Attendance1")]
impl RollcallService {
    /// Enroll a new identity or refresh an existing one from a raw image.
    ///
    /// Empty `display_name`/`actor` mean "not supplied". Returns a JSON
    /// object with the stored identity and whether it was created.
    async fn enroll(
        &self,
        identity_id: &str,
        image: Vec<u8>,
        display_name: &str,
        actor: &str,
    ) -> zbus::fdo::Result<String> {
        let identity_id = require_id(identity_id, "identity_id")?;
        validate_image(&image)?;
        let reply = self
            .engine
            .enroll(
                identity_id.to_owned(),
                image,
                optional(display_name).map(str::to_owned),
                optional(actor).map(str::to_owned),
            )
            .await
            .map_err(to_fdo)?;
        Ok(serde_json::json!({
            "created": reply.created,
            "identity": identity_view(&reply.identity, reply.image_archived),
        })
        .to_string())
    }

    /// Identify the probe image and append an IN/OUT attendance event.
    ///
    /// `mode` is "in" or "out" (any case). An empty `claimed_identity`
    /// means the device made no claim; a claim never biases the match.
    async fn record_attendance(
        &self,
        image: Vec<u8>,
        device_id: &str,
        mode: &str,
        claimed_identity: &str,
    ) -> zbus::fdo::Result<String> {
        let device_id = require_id(device_id, "device_id")?;
        let kind = parse_kind(mode)?;
        validate_image(&image)?;
        let outcome = self
            .engine
            .record(
                image,
                device_id.to_owned(),
                kind,
                optional(claimed_identity).map(str::to_owned),
            )
            .await
            .map_err(to_fdo)?;
        Ok(event_view(&outcome.event, Some(&outcome.display_name)).to_string())
    }

    /// Toggle whether an identity is visible to the matcher. Returns true
    /// when the stored state actually changed.
    async fn set_active(
        &self,
        identity_id: &str,
        active: bool,
        actor: &str,
    ) -> zbus::fdo::Result<bool> {
        let identity_id = require_id(identity_id, "identity_id")?;
        let outcome = self
            .engine
            .set_active(
                identity_id.to_owned(),
                active,
                optional(actor).map(str::to_owned),
            )
            .await
            .map_err(to_fdo)?;
        Ok(outcome.changed)
    }

    /// Audit lookup: which identity enrolled the image with this
    /// fingerprint?
    async fn lookup_by_fingerprint(&self, fingerprint: &str) -> zbus::fdo::Result<String> {
        let fingerprint = require_id(fingerprint, "fingerprint")?;
        let record = self
            .engine
            .lookup_by_fingerprint(fingerprint.to_owned())
            .await
            .map_err(to_fdo)?;
        Ok(identity_view(&record.identity, record.image_archived).to_string())
    }

    /// Return the archived enrollment image for a fingerprint.
    async fn fetch_image(&self, fingerprint: &str) -> zbus::fdo::Result<Vec<u8>> {
        let fingerprint = require_id(fingerprint, "fingerprint")?;
        let image = self
            .engine
            .fetch_image(fingerprint.to_owned())
            .await
            .map_err(to_fdo)?;
        image.ok_or_else(|| {
            zbus::fdo::Error::Failed(format!(
                "image-not-archived: no archived image for fingerprint {fingerprint:?}"
            ))
        })
    }

    /// All identities, active and inactive, as a JSON array.
    async fn list_identities(&self) -> zbus::fdo::Result<String> {
        let records = self.engine.list_identities().await.map_err(to_fdo)?;
        let views: Vec<serde_json::Value> = records
            .iter()
            .map(|r| identity_view(&r.identity, r.image_archived))
            .collect();
        Ok(serde_json::Value::Array(views).to_string())
    }

    /// Attendance events in `[from, to)`, newest first, as a JSON array.
    /// Both bounds are RFC 3339 timestamps.
    async fn attendance_report(&self, from: &str, to: &str) -> zbus::fdo::Result<String> {
        let from = parse_timestamp(from, "from")?;
        let to = parse_timestamp(to, "to")?;
        if from >= to {
            return Err(zbus::fdo::Error::InvalidArgs(
                "from must precede to".into(),
            ));
        }
        let entries = self.engine.report(from, to).await.map_err(to_fdo)?;
        let views: Vec<serde_json::Value> = entries
            .iter()
            .map(|e| event_view(&e.event, e.display_name.as_deref()))
            .collect();
        Ok(serde_json::Value::Array(views).to_string())
    }

    /// Daemon version, configuration, and store counters as a JSON object.
    async fn status(&self) -> zbus::fdo::Result<String> {
        let stats = self.engine.stats().await.map_err(to_fdo)?;
        Ok(serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "match_threshold": self.threshold,
            "sealed": self.sealed,
            "identities": stats.identities,
            "active_templates": stats.active_templates,
            "events": stats.events,
        })
        .to_string())
    }
}

/// Empty strings stand in for "absent" on the wire.
fn optional(value: &str) -> Option<&str> {
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

fn require_id<'a>(value: &'a str, field: &str) -> zbus::fdo::Result<&'a str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(zbus::fdo::Error::InvalidArgs(format!(
            "{field} must not be empty"
        )));
    }
    Ok(trimmed)
}

/// Reject payloads that are not even plausibly an image before they reach
/// the model runtime.
fn validate_image(image: &[u8]) -> zbus::fdo::Result<()> {
    if image.is_empty() {
        return Err(zbus::fdo::Error::InvalidArgs(
            "image payload is empty".into(),
        ));
    }
    if image::guess_format(image).is_err() {
        return Err(zbus::fdo::Error::InvalidArgs(
            "payload is not a recognized image format".into(),
        ));
    }
    Ok(())
}

fn parse_kind(mode: &str) -> zbus::fdo::Result<EventKind> {
    mode.parse()
        .map_err(|e: rollcall_core::UnknownEventKind| zbus::fdo::Error::InvalidArgs(e.to_string()))
}

fn parse_timestamp(value: &str, field: &str) -> zbus::fdo::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| zbus::fdo::Error::InvalidArgs(format!("{field}: {e}")))
}

/// Stable machine-readable prefix for business failures.
fn error_code(err: &EngineError) -> &'static str {
    match err {
        EngineError::Core(core) => match core {
            rollcall_core::EngineError::NoFaceDetected => "no-face-detected",
            rollcall_core::EngineError::SpoofingDetected => "spoofing-detected",
            rollcall_core::EngineError::IdentityNotRecognized => "identity-not-recognized",
            rollcall_core::EngineError::IdentityNotFound(_) => "identity-not-found",
            rollcall_core::EngineError::NoCurrentTemplate(_) => "no-current-template",
            rollcall_core::EngineError::StoreUnavailable(_) => "store-unavailable",
            rollcall_core::EngineError::StoreConflict(_) => "store-conflict",
        },
        EngineError::ChannelClosed => "engine-unavailable",
    }
}

fn to_fdo(err: EngineError) -> zbus::fdo::Error {
    zbus::fdo::Error::Failed(format!("{}: {err}", error_code(&err)))
}

/// JSON identity view. Template vectors never leave the daemon; only their
/// shape and provenance do.
fn identity_view(identity: &Identity, image_archived: bool) -> serde_json::Value {
    let template = identity.current_template.as_ref();
    serde_json::json!({
        "identity_id": identity.identity_id,
        "display_name": identity.display_name,
        "active": identity.active,
        "image_fingerprint": identity.image_fingerprint,
        "template_version_count": identity.template_version_count(),
        "template_dimension": template.map(|t| t.values.len()),
        "model_version": template.and_then(|t| t.model_version.clone()),
        "image_archived": image_archived,
        "created_at": identity.created_at.to_rfc3339(),
        "updated_at": identity.updated_at.to_rfc3339(),
        "created_by": identity.created_by,
        "updated_by": identity.updated_by,
    })
}

fn event_view(event: &AttendanceEvent, display_name: Option<&str>) -> serde_json::Value {
    serde_json::json!({
        "event_id": event.event_id,
        "identity_id": event.identity_id,
        "display_name": display_name,
        "device_id": event.device_id,
        "mode": event.kind.as_str(),
        "timestamp": event.timestamp.to_rfc3339(),
        "confidence": event.confidence,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rollcall_core::Template;

    const PNG_MAGIC: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
    const JPEG_MAGIC: [u8; 3] = [0xFF, 0xD8, 0xFF];

    #[test]
    fn test_optional_maps_empty_to_none() {
        assert_eq!(optional(""), None);
        assert_eq!(optional("kiosk-1"), Some("kiosk-1"));
    }

    #[test]
    fn test_require_id_trims_and_rejects_blank() {
        assert_eq!(require_id("  emp-001 ", "identity_id").unwrap(), "emp-001");
        assert!(require_id("   ", "identity_id").is_err());
        assert!(require_id("", "identity_id").is_err());
    }

    #[test]
    fn test_validate_image_checks_magic_bytes() {
        assert!(validate_image(&PNG_MAGIC).is_ok());
        assert!(validate_image(&JPEG_MAGIC).is_ok());
        assert!(validate_image(&[]).is_err());
        assert!(validate_image(&[0x00, 0x01, 0x02]).is_err());
    }

    #[test]
    fn test_parse_kind_accepts_any_case() {
        assert_eq!(parse_kind("in").unwrap(), EventKind::In);
        assert_eq!(parse_kind("OUT").unwrap(), EventKind::Out);
        assert!(parse_kind("lunch").is_err());
    }

    #[test]
    fn test_parse_timestamp_requires_rfc3339() {
        let t = parse_timestamp("2026-03-01T08:00:00Z", "from").unwrap();
        assert_eq!(t, Utc.with_ymd_and_hms(2026, 3, 1, 8, 0, 0).unwrap());
        assert!(parse_timestamp("yesterday", "from").is_err());
    }

    #[test]
    fn test_error_codes_are_stable() {
        assert_eq!(
            error_code(&EngineError::Core(
                rollcall_core::EngineError::SpoofingDetected
            )),
            "spoofing-detected"
        );
        assert_eq!(
            error_code(&EngineError::Core(
                rollcall_core::EngineError::IdentityNotFound("emp-404".into())
            )),
            "identity-not-found"
        );
        assert_eq!(
            error_code(&EngineError::ChannelClosed),
            "engine-unavailable"
        );
    }

    #[test]
    fn test_identity_view_omits_template_values() {
        let identity = Identity::new(
            "emp-001",
            "Ada",
            Template::new(vec![0.25, 0.5]),
            "fp".to_owned(),
            Some("hr-admin"),
        );
        let view = identity_view(&identity, true);
        assert_eq!(view["identity_id"], "emp-001");
        assert_eq!(view["template_version_count"], 1);
        assert_eq!(view["template_dimension"], 2);
        assert_eq!(view["image_archived"], true);
        assert!(!view.to_string().contains("0.25"));
    }
}
