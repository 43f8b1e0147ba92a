//! Content digests used as optimistic-concurrency version tokens.

use sha2::{Digest, Sha256};

/// Hex-encoded SHA-256 of the fully serialized document bytes.
pub fn content_digest(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}
