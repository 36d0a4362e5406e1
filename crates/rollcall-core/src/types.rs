use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Face template vector (fixed dimensionality per extractor model).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
    pub values: Vec<f32>,
    /// Model version that produced this template (e.g., "w600k_r50").
    pub model_version: Option<String>,
}

impl Template {
    pub fn new(values: Vec<f32>) -> Self {
        Self {
            values,
            model_version: None,
        }
    }

    /// Compute Euclidean (L2) distance to another template.
    pub fn euclidean_distance(&self, other: &Template) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }

    /// Whether two templates can be meaningfully compared: both non-empty
    /// and of equal dimensionality.
    pub fn comparable_with(&self, other: &Template) -> bool {
        !self.values.is_empty() && self.values.len() == other.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// One enrolled person: the current template plus its append-only history.
///
/// Every prior value of `current_template` appears in `template_history` in
/// chronological order before being overwritten. The only template mutation
/// path is [`rotate_template`](Self::rotate_template).
#[derive(Debug, Clone, PartialEq)]
pub struct Identity {
    /// Stable external key; immutable once created.
    pub identity_id: String,
    pub display_name: String,
    /// The active embedding. Absent means the identity can never match.
    pub current_template: Option<Template>,
    /// Prior `current_template` values, oldest first. Append-only.
    pub template_history: Vec<Template>,
    /// Content hash of the most recently enrolled image.
    pub image_fingerprint: Option<String>,
    /// Inactive identities are invisible to the matcher but retained.
    pub active: bool,
    /// Update counter backing the store's compare-and-update contract.
    pub revision: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub created_by: Option<String>,
    pub updated_by: Option<String>,
}

impl Identity {
    /// Fresh identity from a first successful enrollment.
    pub fn new(
        identity_id: impl Into<String>,
        display_name: impl Into<String>,
        template: Template,
        fingerprint: String,
        actor: Option<&str>,
    ) -> Self {
        let now = Utc::now();
        Self {
            identity_id: identity_id.into(),
            display_name: display_name.into(),
            current_template: Some(template),
            template_history: Vec::new(),
            image_fingerprint: Some(fingerprint),
            active: true,
            revision: 0,
            created_at: now,
            updated_at: now,
            created_by: actor.map(str::to_owned),
            updated_by: actor.map(str::to_owned),
        }
    }

    /// Rotate in a freshly extracted template. The previous current value
    /// (if any) is appended to history before being replaced; a first
    /// enrollment pushes nothing.
    pub fn rotate_template(&mut self, template: Template, fingerprint: String) {
        if let Some(prev) = self.current_template.take() {
            self.template_history.push(prev);
        }
        self.current_template = Some(template);
        self.image_fingerprint = Some(fingerprint);
    }

    /// Number of template versions ever enrolled (history plus current).
    pub fn template_version_count(&self) -> usize {
        self.template_history.len() + usize::from(self.current_template.is_some())
    }

    /// Whether the matcher may consider this identity at all.
    pub fn matchable(&self) -> bool {
        self.active && self.current_template.as_ref().is_some_and(|t| !t.is_empty())
    }
}

/// Direction of an attendance event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    In,
    Out,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::In => "IN",
            EventKind::Out => "OUT",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error for an unrecognized event-kind string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown event kind {0:?} (expected IN or OUT)")]
pub struct UnknownEventKind(pub String);

impl std::str::FromStr for EventKind {
    type Err = UnknownEventKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "IN" => Ok(EventKind::In),
            "OUT" => Ok(EventKind::Out),
            _ => Err(UnknownEventKind(s.to_string())),
        }
    }
}

/// One recorded check-in/out. Created exactly once per successful match,
/// never mutated or deleted; events outlive later identity edits.
#[derive(Debug, Clone, PartialEq)]
pub struct AttendanceEvent {
    /// Monotonically assigned surrogate key.
    pub event_id: i64,
    pub identity_id: String,
    /// Originating device/session label, free text.
    pub device_id: String,
    pub kind: EventKind,
    /// Assigned by the store at insert; immutable.
    pub timestamp: DateTime<Utc>,
    /// Winning match distance, lower is better. Absent for events recorded
    /// out-of-band.
    pub confidence: Option<f32>,
}

/// Fields the attendance service supplies; the store assigns the rest.
#[derive(Debug, Clone)]
pub struct NewAttendanceEvent {
    pub identity_id: String,
    pub device_id: String,
    pub kind: EventKind,
    pub confidence: Option<f32>,
}
