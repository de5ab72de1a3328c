//! Subject hashing.
//!
//! Two deliberately different hashes coexist. The campaign layer
//! deduplicates by full SHA-256 over the unnormalized subject bytes: the
//! digest is part of a persistent unique key and may be compared against
//! external tooling. The dynamic-rule tracker uses a truncated blake3
//! digest over the trimmed lowercased subject: rows are ephemeral and the
//! hash sits on the synchronous decision path.

use sha2::{Digest, Sha256};

/// SHA-256 hex digest of the subject, bytewise and unnormalized. Campaign
/// dedup key component.
#[must_use]
pub fn campaign_subject_hash(subject: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(subject.as_bytes());
    hex::encode(hasher.finalize())
}

/// Stable short hash of the trimmed lowercased subject used by the
/// dynamic-rule tracker. First 8 bytes of the blake3 digest, hex encoded.
#[must_use]
pub fn tracker_subject_hash(subject: &str) -> String {
    let normalized = subject.trim().to_lowercase();
    let digest = blake3::hash(normalized.as_bytes());
    hex::encode(&digest.as_bytes()[..8])
}
