use sha2::{Digest, Sha256};

/// Computes a deterministic SHA-256 hash over a serialized table file.
///
/// Recorded per table in `metadata.json` and checked again before a restore
/// reads the file back.
pub fn content_hash(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    hex::encode(hasher.finalize())
}
