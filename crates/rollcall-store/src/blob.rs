//! Content-addressed image archive on the local filesystem.
//!
//! Each enrollment image is stored once under its fingerprint, so the
//! archive doubles as a dedup map: a second enrollment of the same image is
//! a metadata-only no-op here. Writes go through a temp file in the target
//! directory and a rename, never a partial final file.

use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

#[derive(Debug, thiserror::Error)]
pub enum BlobError {
    #[error("image archive I/O failure: {0}")]
    Io(#[from] std::io::Error),
}

/// Write-once archive keyed by image fingerprint.
pub trait BlobStore: Send + Sync {
    /// Store `image` under `fingerprint`, returning the blob id. Storing
    /// the same fingerprint again is a no-op.
    fn put(&self, fingerprint: &str, image: &[u8]) -> Result<String, BlobError>;
    fn get(&self, fingerprint: &str) -> Result<Option<Vec<u8>>, BlobError>;
    fn contains(&self, fingerprint: &str) -> Result<bool, BlobError>;
}

/// Directory-per-archive blob store; one file per fingerprint.
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, BlobError> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, fingerprint: &str) -> PathBuf {
        self.root.join(fingerprint)
    }
}

impl BlobStore for FsBlobStore {
    fn put(&self, fingerprint: &str, image: &[u8]) -> Result<String, BlobError> {
        let path = self.path_for(fingerprint);
        if path.try_exists()? {
            return Ok(fingerprint.to_string());
        }
        let mut tmp = NamedTempFile::new_in(&self.root)?;
        tmp.write_all(image)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tmp.as_file()
                .set_permissions(std::fs::Permissions::from_mode(0o600))?;
        }
        tmp.persist(&path).map_err(|e| BlobError::Io(e.error))?;
        tracing::debug!(fingerprint, "archived enrollment image");
        Ok(fingerprint.to_string())
    }

    fn get(&self, fingerprint: &str) -> Result<Option<Vec<u8>>, BlobError> {
        match std::fs::read(self.path_for(fingerprint)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn contains(&self, fingerprint: &str) -> Result<bool, BlobError> {
        Ok(self.path_for(fingerprint).try_exists()?)
    }
}
