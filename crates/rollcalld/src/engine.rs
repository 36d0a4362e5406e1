use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use rollcall_core::{
    AttendanceOutcome, AttendanceService, EmbeddingExtractor, EnrollmentService, EventKind,
    Identity, L2Matcher, LivenessGate, SetActiveOutcome,
};
use rollcall_store::{BlobStore, FsBlobStore, SqliteStore, StoreStats};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Core(#[from] rollcall_core::EngineError),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Result of an enrollment operation.
pub struct EnrollReply {
    pub identity: Identity,
    pub created: bool,
    /// False when the image archive write failed; the enrollment itself
    /// stands regardless.
    pub image_archived: bool,
}

/// One identity plus whether its enrollment image is in the archive.
pub struct IdentityRecord {
    pub identity: Identity,
    pub image_archived: bool,
}

/// One report row with the display name joined in.
pub struct ReportEntry {
    pub event: rollcall_core::AttendanceEvent,
    pub display_name: Option<String>,
}

/// Messages sent from D-Bus handlers to the engine thread.
enum EngineRequest {
    Enroll {
        identity_id: String,
        image: Vec<u8>,
        display_name: Option<String>,
        actor: Option<String>,
        reply: oneshot::Sender<Result<EnrollReply, EngineError>>,
    },
    Record {
        image: Vec<u8>,
        device_id: String,
        kind: EventKind,
        claimed_identity: Option<String>,
        reply: oneshot::Sender<Result<AttendanceOutcome, EngineError>>,
    },
    SetActive {
        identity_id: String,
        active: bool,
        actor: Option<String>,
        reply: oneshot::Sender<Result<SetActiveOutcome, EngineError>>,
    },
    Lookup {
        fingerprint: String,
        reply: oneshot::Sender<Result<IdentityRecord, EngineError>>,
    },
    FetchImage {
        fingerprint: String,
        reply: oneshot::Sender<Result<Option<Vec<u8>>, EngineError>>,
    },
    List {
        reply: oneshot::Sender<Result<Vec<IdentityRecord>, EngineError>>,
    },
    Report {
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        reply: oneshot::Sender<Result<Vec<ReportEntry>, EngineError>>,
    },
    Stats {
        reply: oneshot::Sender<Result<StoreStats, EngineError>>,
    },
}

impl EngineRequest {
    fn name(&self) -> &'static str {
        match self {
            EngineRequest::Enroll { .. } => "enroll",
            EngineRequest::Record { .. } => "record",
            EngineRequest::SetActive { .. } => "set_active",
            EngineRequest::Lookup { .. } => "lookup",
            EngineRequest::FetchImage { .. } => "fetch_image",
            EngineRequest::List { .. } => "list",
            EngineRequest::Report { .. } => "report",
            EngineRequest::Stats { .. } => "stats",
        }
    }
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<Result<T, EngineError>>) -> EngineRequest,
    ) -> Result<T, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(build(reply_tx))
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// Enroll or refresh an identity from a raw image.
    pub async fn enroll(
        &self,
        identity_id: String,
        image: Vec<u8>,
        display_name: Option<String>,
        actor: Option<String>,
    ) -> Result<EnrollReply, EngineError> {
        self.request(|reply| EngineRequest::Enroll {
            identity_id,
            image,
            display_name,
            actor,
            reply,
        })
        .await
    }

    /// Identify the probe image and append an attendance event.
    pub async fn record(
        &self,
        image: Vec<u8>,
        device_id: String,
        kind: EventKind,
        claimed_identity: Option<String>,
    ) -> Result<AttendanceOutcome, EngineError> {
        self.request(|reply| EngineRequest::Record {
            image,
            device_id,
            kind,
            claimed_identity,
            reply,
        })
        .await
    }

    /// Toggle matcher visibility for an identity.
    pub async fn set_active(
        &self,
        identity_id: String,
        active: bool,
        actor: Option<String>,
    ) -> Result<SetActiveOutcome, EngineError> {
        self.request(|reply| EngineRequest::SetActive {
            identity_id,
            active,
            actor,
            reply,
        })
        .await
    }

    /// Audit lookup by enrollment image fingerprint.
    pub async fn lookup_by_fingerprint(
        &self,
        fingerprint: String,
    ) -> Result<IdentityRecord, EngineError> {
        self.request(|reply| EngineRequest::Lookup { fingerprint, reply })
            .await
    }

    /// Fetch an archived enrollment image by fingerprint.
    pub async fn fetch_image(&self, fingerprint: String) -> Result<Option<Vec<u8>>, EngineError> {
        self.request(|reply| EngineRequest::FetchImage { fingerprint, reply })
            .await
    }

    pub async fn list_identities(&self) -> Result<Vec<IdentityRecord>, EngineError> {
        self.request(|reply| EngineRequest::List { reply }).await
    }

    /// Events with `from <= timestamp < to`, newest first.
    pub async fn report(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<ReportEntry>, EngineError> {
        self.request(|reply| EngineRequest::Report { from, to, reply })
            .await
    }

    pub async fn stats(&self) -> Result<StoreStats, EngineError> {
        self.request(|reply| EngineRequest::Stats { reply }).await
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// The thread owns the store, the image archive, and the model runtime
/// clients; D-Bus handlers talk to it through the returned handle. Requests
/// are served one at a time, so enroll's read-modify-write never races
/// another in-process writer; the store's revision check still guards
/// against other processes.
pub fn spawn_engine(
    store: SqliteStore,
    blobs: FsBlobStore,
    gate: Arc<dyn LivenessGate>,
    extractor: Arc<dyn EmbeddingExtractor>,
    threshold: f32,
) -> EngineHandle {
    let engine = Engine {
        enrollment: EnrollmentService::new(store.clone(), gate.clone(), extractor.clone()),
        attendance: AttendanceService::new(
            store.clone(),
            gate,
            extractor,
            Arc::new(L2Matcher),
            threshold,
        ),
        store,
        blobs,
    };

    let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);

    std::thread::Builder::new()
        .name("rollcall-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                let request_id = Uuid::new_v4();
                let span = tracing::info_span!("request", id = %request_id, op = req.name());
                let _guard = span.enter();
                engine.dispatch(req);
            }
            tracing::info!("engine thread exiting");
        })
        .expect("failed to spawn engine thread");

    EngineHandle { tx }
}

struct Engine {
    enrollment: EnrollmentService<SqliteStore>,
    attendance: AttendanceService<SqliteStore>,
    store: SqliteStore,
    blobs: FsBlobStore,
}

impl Engine {
    fn dispatch(&self, req: EngineRequest) {
        match req {
            EngineRequest::Enroll {
                identity_id,
                image,
                display_name,
                actor,
                reply,
            } => {
                let result = self.run_enroll(
                    &identity_id,
                    &image,
                    display_name.as_deref(),
                    actor.as_deref(),
                );
                let _ = reply.send(result);
            }
            EngineRequest::Record {
                image,
                device_id,
                kind,
                claimed_identity,
                reply,
            } => {
                let result = self
                    .attendance
                    .record(&image, &device_id, kind, claimed_identity.as_deref())
                    .map_err(EngineError::from);
                let _ = reply.send(result);
            }
            EngineRequest::SetActive {
                identity_id,
                active,
                actor,
                reply,
            } => {
                let result = self
                    .enrollment
                    .set_active(&identity_id, active, actor.as_deref())
                    .map_err(EngineError::from);
                let _ = reply.send(result);
            }
            EngineRequest::Lookup { fingerprint, reply } => {
                let _ = reply.send(self.run_lookup(&fingerprint));
            }
            EngineRequest::FetchImage { fingerprint, reply } => {
                let _ = reply.send(self.run_fetch_image(&fingerprint));
            }
            EngineRequest::List { reply } => {
                let _ = reply.send(self.run_list());
            }
            EngineRequest::Report { from, to, reply } => {
                let _ = reply.send(self.run_report(from, to));
            }
            EngineRequest::Stats { reply } => {
                let result = self
                    .store
                    .stats()
                    .map_err(rollcall_core::EngineError::from)
                    .map_err(EngineError::from);
                let _ = reply.send(result);
            }
        }
    }

    fn run_enroll(
        &self,
        identity_id: &str,
        image: &[u8],
        display_name: Option<&str>,
        actor: Option<&str>,
    ) -> Result<EnrollReply, EngineError> {
        let outcome = self
            .enrollment
            .enroll(identity_id, image, display_name, actor)?;
        let image_archived = match outcome.identity.image_fingerprint.as_deref() {
            Some(fp) => match self.blobs.put(fp, image) {
                Ok(_) => true,
                Err(e) => {
                    tracing::warn!(identity_id, error = %e, "image archival failed; enrollment stands");
                    false
                }
            },
            None => false,
        };
        Ok(EnrollReply {
            identity: outcome.identity,
            created: outcome.created,
            image_archived,
        })
    }

    fn run_lookup(&self, fingerprint: &str) -> Result<IdentityRecord, EngineError> {
        let identity = self.enrollment.lookup_by_fingerprint(fingerprint)?;
        Ok(self.with_archive_flag(identity))
    }

    fn run_fetch_image(&self, fingerprint: &str) -> Result<Option<Vec<u8>>, EngineError> {
        self.blobs
            .get(fingerprint)
            .map_err(|e| rollcall_core::EngineError::StoreUnavailable(e.to_string()).into())
    }

    fn run_list(&self) -> Result<Vec<IdentityRecord>, EngineError> {
        let identities = self.store.list().map_err(rollcall_core::EngineError::from)?;
        Ok(identities
            .into_iter()
            .map(|identity| self.with_archive_flag(identity))
            .collect())
    }

    fn run_report(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<ReportEntry>, EngineError> {
        let events = self
            .store
            .events_between(from, to)
            .map_err(rollcall_core::EngineError::from)?;
        let names: HashMap<String, String> = self
            .store
            .list()
            .map_err(rollcall_core::EngineError::from)?
            .into_iter()
            .map(|identity| (identity.identity_id, identity.display_name))
            .collect();
        Ok(events
            .into_iter()
            .map(|event| {
                let display_name = names.get(&event.identity_id).cloned();
                ReportEntry {
                    event,
                    display_name,
                }
            })
            .collect())
    }

    fn with_archive_flag(&self, identity: Identity) -> IdentityRecord {
        let image_archived = identity
            .image_fingerprint
            .as_deref()
            .map(|fp| self.blobs.contains(fp).unwrap_or(false))
            .unwrap_or(false);
        IdentityRecord {
            identity,
            image_archived,
        }
    }
}
