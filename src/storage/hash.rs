//! Content hashing.
//!
//! SHA-256 over raw file bytes, hex encoded. These digests are what the state
//! record stores per touched path and what drift detection compares against.

use std::fs::File;
use std::io;
use std::path::Path;

use sha2::{Digest, Sha256};

use crate::error::Result;

/// Hash a byte slice.
#[must_use]
pub fn hash_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Hash a file's contents without loading it into memory at once.
pub fn compute_hash(path: &Path) -> Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(hex::encode(hasher.finalize()))
}

/// Hash a file if it exists.
pub fn hash_optional(path: &Path) -> Result<Option<String>> {
    if path.is_file() {
        compute_hash(path).map(Some)
    } else {
        Ok(None)
    }
}
