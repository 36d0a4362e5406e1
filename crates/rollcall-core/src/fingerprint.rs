//! Content fingerprints for raw image bytes.
//!
//! Content-addressing, not cryptographic security: the fingerprint detects
//! re-submission of an identical source image and keys the blob archive.

use std::fmt::Write;

use sha2::{Digest, Sha256};

/// Length of a rendered fingerprint: SHA-256 as lowercase hex.
pub const FINGERPRINT_LEN: usize = 64;

/// Deterministic content fingerprint of raw image bytes.
pub fn fingerprint(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let mut out = String::with_capacity(FINGERPRINT_LEN);
    for byte in digest {
        // Writing into a String is infallible.
        let _ = write!(out, "{byte:02x}");
    }
    out
}
