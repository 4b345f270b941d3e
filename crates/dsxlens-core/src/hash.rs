//! Content hashing for backups and revision checks

use sha2::{Digest, Sha256};

/// SHA-256 of the given text, hex encoded
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}
