use std::path::PathBuf;

/// Daemon configuration, loaded from environment variables.
pub struct Config {
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Directory for the content-addressed enrollment image archive.
    pub blob_dir: PathBuf,
    /// Path to a 32-byte template sealing key. Unset disables sealing;
    /// when set to a missing file, a key is generated there on startup.
    pub seal_key_file: Option<PathBuf>,
    /// L2 distance threshold for a positive identification.
    pub match_threshold: f32,
    /// Timeout in seconds for a face model runtime call.
    pub model_timeout_secs: u64,
}

impl Config {
    /// Load configuration from `ROLLCALL_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let data_dir = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("rollcall");

        let db_path = std::env::var("ROLLCALL_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("attendance.db"));

        let blob_dir = std::env::var("ROLLCALL_BLOB_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("images"));

        Self {
            db_path,
            blob_dir,
            seal_key_file: std::env::var("ROLLCALL_SEAL_KEY_FILE")
                .ok()
                .map(PathBuf::from),
            match_threshold: env_f32(
                "ROLLCALL_MATCH_THRESHOLD",
                rollcall_core::DEFAULT_MATCH_THRESHOLD,
            ),
            model_timeout_secs: env_u64("ROLLCALL_MODEL_TIMEOUT_SECS", 10),
        }
    }
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
