//! rollcall-store — SQLite persistence and image archival for rollcall.
//!
//! Implements the engine's storage traits over a single SQLite database,
//! with optional AES-256-GCM sealing of template columns, plus a
//! content-addressed filesystem archive for enrollment images.

pub mod blob;
pub mod seal;
pub mod sqlite;

pub use blob::{BlobError, BlobStore, FsBlobStore};
pub use seal::{generate_key, SealError, KEY_LEN};
pub use sqlite::{SqliteStore, StoreStats};
