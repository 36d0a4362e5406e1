//! SQLite-backed identity and attendance persistence.
//!
//! One database file holds three tables: `identities` (current template,
//! history, audit fields, revision counter), `attendance_events` (append-only
//! log), and `store_meta` (template encoding marker). Templates are stored
//! as JSON blobs, sealed with AES-256-GCM when the store is opened with a
//! key. A store created plain must not be reopened sealed or vice versa;
//! `open` refuses the mismatch instead of returning garbage.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use rollcall_core::store::{AttendanceLog, StoreError, TemplateStore};
use rollcall_core::types::{AttendanceEvent, Identity, NewAttendanceEvent, Template};

use crate::seal::{self, KEY_LEN};

const META_TEMPLATE_ENCODING: &str = "template_encoding";
const ENCODING_PLAIN: &str = "plain";
const ENCODING_SEALED: &str = "aes-256-gcm";

/// Aggregate counters for the daemon status surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreStats {
    pub identities: u64,
    /// Identities the matcher can currently see.
    pub active_templates: u64,
    pub events: u64,
}

/// Handle to one SQLite database. Cloning shares the connection.
#[derive(Clone, Debug)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    key: Option<[u8; KEY_LEN]>,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `path`. A `key` switches
    /// template columns to sealed encoding.
    pub fn open(path: impl AsRef<Path>, key: Option<[u8; KEY_LEN]>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Unavailable(format!("create {parent:?}: {e}")))?;
        }
        let conn = Connection::open(path).map_err(unavailable)?;
        let store = Self::init(conn, key)?;
        tracing::info!(
            path = %path.display(),
            sealed = store.key.is_some(),
            "opened attendance store"
        );
        Ok(store)
    }

    /// In-memory database, used by tests and throwaway tooling.
    pub fn open_in_memory(key: Option<[u8; KEY_LEN]>) -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(unavailable)?;
        Self::init(conn, key)
    }

    fn init(conn: Connection, key: Option<[u8; KEY_LEN]>) -> Result<Self, StoreError> {
        init_schema(&conn).map_err(unavailable)?;

        let desired = if key.is_some() {
            ENCODING_SEALED
        } else {
            ENCODING_PLAIN
        };
        let existing: Option<String> = conn
            .query_row(
                "SELECT value FROM store_meta WHERE key = ?1",
                params![META_TEMPLATE_ENCODING],
                |row| row.get(0),
            )
            .optional()
            .map_err(unavailable)?;
        match existing.as_deref() {
            None => {
                conn.execute(
                    "INSERT INTO store_meta (key, value) VALUES (?1, ?2)",
                    params![META_TEMPLATE_ENCODING, desired],
                )
                .map_err(unavailable)?;
            }
            Some(enc) if enc == desired => {}
            Some(enc) => {
                return Err(StoreError::Unavailable(format!(
                    "store uses template encoding {enc:?} but this process is configured for {desired:?}"
                )));
            }
        }

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            key,
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Unavailable("store mutex poisoned".into()))
    }

    fn encode_template(&self, template: &Template) -> Result<Vec<u8>, StoreError> {
        let plain = serde_json::to_vec(template)
            .map_err(|e| StoreError::Unavailable(format!("template encode: {e}")))?;
        match &self.key {
            Some(key) => seal::seal(key, &plain)
                .map_err(|e| StoreError::Unavailable(format!("template seal: {e}"))),
            None => Ok(plain),
        }
    }

    fn decode_template(&self, blob: &[u8]) -> Result<Template, StoreError> {
        let plain = match &self.key {
            Some(key) => seal::open(key, blob)
                .map_err(|e| StoreError::Unavailable(format!("template unseal: {e}")))?,
            None => blob.to_vec(),
        };
        serde_json::from_slice(&plain)
            .map_err(|e| StoreError::Unavailable(format!("template decode: {e}")))
    }

    fn encode_history(&self, history: &[Template]) -> Result<Vec<u8>, StoreError> {
        let plain = serde_json::to_vec(history)
            .map_err(|e| StoreError::Unavailable(format!("history encode: {e}")))?;
        match &self.key {
            Some(key) => seal::seal(key, &plain)
                .map_err(|e| StoreError::Unavailable(format!("history seal: {e}"))),
            None => Ok(plain),
        }
    }

    fn decode_history(&self, blob: &[u8]) -> Result<Vec<Template>, StoreError> {
        let plain = match &self.key {
            Some(key) => seal::open(key, blob)
                .map_err(|e| StoreError::Unavailable(format!("history unseal: {e}")))?,
            None => blob.to_vec(),
        };
        serde_json::from_slice(&plain)
            .map_err(|e| StoreError::Unavailable(format!("history decode: {e}")))
    }

    fn hydrate(&self, row: IdentityRow) -> Result<Identity, StoreError> {
        let current_template = row
            .current_template
            .as_deref()
            .map(|blob| self.decode_template(blob))
            .transpose()?;
        let template_history = self.decode_history(&row.template_history)?;
        Ok(Identity {
            identity_id: row.identity_id,
            display_name: row.display_name,
            current_template,
            template_history,
            image_fingerprint: row.image_fingerprint,
            active: row.active,
            revision: row.revision as u64,
            created_at: parse_timestamp(&row.created_at)?,
            updated_at: parse_timestamp(&row.updated_at)?,
            created_by: row.created_by,
            updated_by: row.updated_by,
        })
    }

    /// Events with `from <= timestamp < to`, newest first.
    pub fn events_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<AttendanceEvent>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT event_id, identity_id, device_id, event_type, timestamp, confidence
                 FROM attendance_events
                 WHERE timestamp >= ?1 AND timestamp < ?2
                 ORDER BY timestamp DESC, event_id DESC",
            )
            .map_err(unavailable)?;
        let rows = stmt
            .query_map(params![from.to_rfc3339(), to.to_rfc3339()], read_event_row)
            .map_err(unavailable)?
            .collect::<rusqlite::Result<Vec<EventRow>>>()
            .map_err(unavailable)?;
        rows.into_iter().map(hydrate_event).collect()
    }

    /// Every identity, active or not, ascending by id.
    pub fn list(&self) -> Result<Vec<Identity>, StoreError> {
        let rows = {
            let conn = self.lock()?;
            let mut stmt = conn
                .prepare(
                    "SELECT identity_id, display_name, current_template, template_history,
                            image_fingerprint, active, revision, created_at, updated_at,
                            created_by, updated_by
                     FROM identities
                     ORDER BY identity_id ASC",
                )
                .map_err(unavailable)?;
            let rows = stmt
                .query_map([], read_identity_row)
                .map_err(unavailable)?
                .collect::<rusqlite::Result<Vec<IdentityRow>>>()
                .map_err(unavailable)?;
            rows
        };
        rows.into_iter().map(|row| self.hydrate(row)).collect()
    }

    pub fn stats(&self) -> Result<StoreStats, StoreError> {
        let conn = self.lock()?;
        let identities: i64 = conn
            .query_row("SELECT COUNT(*) FROM identities", [], |row| row.get(0))
            .map_err(unavailable)?;
        let active_templates: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM identities
                 WHERE active = 1 AND current_template IS NOT NULL",
                [],
                |row| row.get(0),
            )
            .map_err(unavailable)?;
        let events: i64 = conn
            .query_row("SELECT COUNT(*) FROM attendance_events", [], |row| row.get(0))
            .map_err(unavailable)?;
        Ok(StoreStats {
            identities: identities as u64,
            active_templates: active_templates as u64,
            events: events as u64,
        })
    }
}

impl TemplateStore for SqliteStore {
    fn get(&self, identity_id: &str) -> Result<Option<Identity>, StoreError> {
        let row = {
            let conn = self.lock()?;
            conn.query_row(
                "SELECT identity_id, display_name, current_template, template_history,
                        image_fingerprint, active, revision, created_at, updated_at,
                        created_by, updated_by
                 FROM identities
                 WHERE identity_id = ?1",
                params![identity_id],
                read_identity_row,
            )
            .optional()
            .map_err(unavailable)?
        };
        row.map(|row| self.hydrate(row)).transpose()
    }

    fn insert(&self, identity: &Identity) -> Result<(), StoreError> {
        let current = identity
            .current_template
            .as_ref()
            .map(|t| self.encode_template(t))
            .transpose()?;
        let history = self.encode_history(&identity.template_history)?;
        let conn = self.lock()?;
        let result = conn.execute(
            "INSERT INTO identities (identity_id, display_name, current_template,
                                     template_history, image_fingerprint, active, revision,
                                     created_at, updated_at, created_by, updated_by)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                identity.identity_id,
                identity.display_name,
                current,
                history,
                identity.image_fingerprint,
                identity.active,
                identity.revision as i64,
                identity.created_at.to_rfc3339(),
                identity.updated_at.to_rfc3339(),
                identity.created_by,
                identity.updated_by,
            ],
        );
        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(StoreError::Conflict {
                    identity_id: identity.identity_id.clone(),
                })
            }
            Err(e) => Err(unavailable(e)),
        }
    }

    fn update(&self, identity: &Identity, expected_revision: u64) -> Result<(), StoreError> {
        let current = identity
            .current_template
            .as_ref()
            .map(|t| self.encode_template(t))
            .transpose()?;
        let history = self.encode_history(&identity.template_history)?;
        let conn = self.lock()?;
        let changed = conn
            .execute(
                "UPDATE identities
                 SET display_name = ?2, current_template = ?3, template_history = ?4,
                     image_fingerprint = ?5, active = ?6, revision = ?7,
                     updated_at = ?8, updated_by = ?9
                 WHERE identity_id = ?1 AND revision = ?10",
                params![
                    identity.identity_id,
                    identity.display_name,
                    current,
                    history,
                    identity.image_fingerprint,
                    identity.active,
                    identity.revision as i64,
                    identity.updated_at.to_rfc3339(),
                    identity.updated_by,
                    expected_revision as i64,
                ],
            )
            .map_err(unavailable)?;
        if changed == 1 {
            return Ok(());
        }
        let exists: bool = conn
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM identities WHERE identity_id = ?1)",
                params![identity.identity_id],
                |row| row.get(0),
            )
            .map_err(unavailable)?;
        if exists {
            Err(StoreError::Conflict {
                identity_id: identity.identity_id.clone(),
            })
        } else {
            Err(StoreError::Unavailable(format!(
                "identity {} vanished during update",
                identity.identity_id
            )))
        }
    }

    fn active_snapshot(&self) -> Result<Vec<Identity>, StoreError> {
        let rows = {
            let conn = self.lock()?;
            let mut stmt = conn
                .prepare(
                    "SELECT identity_id, display_name, current_template, template_history,
                            image_fingerprint, active, revision, created_at, updated_at,
                            created_by, updated_by
                     FROM identities
                     WHERE active = 1 AND current_template IS NOT NULL
                     ORDER BY identity_id ASC",
                )
                .map_err(unavailable)?;
            let rows = stmt
                .query_map([], read_identity_row)
                .map_err(unavailable)?
                .collect::<rusqlite::Result<Vec<IdentityRow>>>()
                .map_err(unavailable)?;
            rows
        };
        let identities = rows
            .into_iter()
            .map(|row| self.hydrate(row))
            .collect::<Result<Vec<Identity>, StoreError>>()?;
        Ok(identities.into_iter().filter(Identity::matchable).collect())
    }

    fn find_by_fingerprint(&self, fingerprint: &str) -> Result<Option<Identity>, StoreError> {
        let row = {
            let conn = self.lock()?;
            conn.query_row(
                "SELECT identity_id, display_name, current_template, template_history,
                        image_fingerprint, active, revision, created_at, updated_at,
                        created_by, updated_by
                 FROM identities
                 WHERE image_fingerprint = ?1
                 ORDER BY identity_id ASC
                 LIMIT 1",
                params![fingerprint],
                read_identity_row,
            )
            .optional()
            .map_err(unavailable)?
        };
        row.map(|row| self.hydrate(row)).transpose()
    }
}

impl AttendanceLog for SqliteStore {
    fn append(&self, event: NewAttendanceEvent) -> Result<AttendanceEvent, StoreError> {
        let timestamp = Utc::now();
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO attendance_events (identity_id, device_id, event_type, timestamp,
                                            confidence)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                event.identity_id,
                event.device_id,
                event.kind.as_str(),
                timestamp.to_rfc3339(),
                event.confidence.map(f64::from),
            ],
        )
        .map_err(unavailable)?;
        Ok(AttendanceEvent {
            event_id: conn.last_insert_rowid(),
            identity_id: event.identity_id,
            device_id: event.device_id,
            kind: event.kind,
            timestamp,
            confidence: event.confidence,
        })
    }
}

fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         CREATE TABLE IF NOT EXISTS identities (
             identity_id       TEXT PRIMARY KEY,
             display_name      TEXT NOT NULL,
             current_template  BLOB,
             template_history  BLOB NOT NULL,
             image_fingerprint TEXT,
             active            INTEGER NOT NULL,
             revision          INTEGER NOT NULL,
             created_at        TEXT NOT NULL,
             updated_at        TEXT NOT NULL,
             created_by        TEXT,
             updated_by        TEXT
         );
         CREATE INDEX IF NOT EXISTS idx_identities_fingerprint
             ON identities(image_fingerprint);
         CREATE TABLE IF NOT EXISTS attendance_events (
             event_id    INTEGER PRIMARY KEY AUTOINCREMENT,
             identity_id TEXT NOT NULL,
             device_id   TEXT NOT NULL,
             event_type  TEXT NOT NULL CHECK (event_type IN ('IN', 'OUT')),
             timestamp   TEXT NOT NULL,
             confidence  REAL
         );
         CREATE INDEX IF NOT EXISTS idx_events_identity
             ON attendance_events(identity_id);
         CREATE INDEX IF NOT EXISTS idx_events_timestamp
             ON attendance_events(timestamp);
         CREATE TABLE IF NOT EXISTS store_meta (
             key   TEXT PRIMARY KEY,
             value TEXT NOT NULL
         );",
    )
}

struct IdentityRow {
    identity_id: String,
    display_name: String,
    current_template: Option<Vec<u8>>,
    template_history: Vec<u8>,
    image_fingerprint: Option<String>,
    active: bool,
    revision: i64,
    created_at: String,
    updated_at: String,
    created_by: Option<String>,
    updated_by: Option<String>,
}

fn read_identity_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<IdentityRow> {
    Ok(IdentityRow {
        identity_id: row.get(0)?,
        display_name: row.get(1)?,
        current_template: row.get(2)?,
        template_history: row.get(3)?,
        image_fingerprint: row.get(4)?,
        active: row.get(5)?,
        revision: row.get(6)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
        created_by: row.get(9)?,
        updated_by: row.get(10)?,
    })
}

struct EventRow {
    event_id: i64,
    identity_id: String,
    device_id: String,
    event_type: String,
    timestamp: String,
    confidence: Option<f64>,
}

fn read_event_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<EventRow> {
    Ok(EventRow {
        event_id: row.get(0)?,
        identity_id: row.get(1)?,
        device_id: row.get(2)?,
        event_type: row.get(3)?,
        timestamp: row.get(4)?,
        confidence: row.get(5)?,
    })
}

fn hydrate_event(row: EventRow) -> Result<AttendanceEvent, StoreError> {
    let kind = row
        .event_type
        .parse()
        .map_err(|e| StoreError::Unavailable(format!("corrupt event row {}: {e}", row.event_id)))?;
    Ok(AttendanceEvent {
        event_id: row.event_id,
        identity_id: row.identity_id,
        device_id: row.device_id,
        kind,
        timestamp: parse_timestamp(&row.timestamp)?,
        confidence: row.confidence.map(|c| c as f32),
    })
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Unavailable(format!("corrupt timestamp {raw:?}: {e}")))
}

fn unavailable(e: impl std::fmt::Display) -> StoreError {
    StoreError::Unavailable(e.to_string())
}
