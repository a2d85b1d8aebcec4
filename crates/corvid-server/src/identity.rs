//! Operator token digests and the authentication cache.
//!
//! Tokens are never stored or cached in the clear: both the operator store
//! and the cache are keyed by `hex(sha256(token))`.

use dashmap::DashMap;
use rand::RngCore;
use sha2::{Digest, Sha256};

/// Lower-case hex SHA-256 of a raw bearer token.
pub fn token_digest(raw: &str) -> String {
    hex::encode(Sha256::digest(raw.as_bytes()))
}

/// Fresh 256-bit operator token, hex encoded.
pub fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Token digest → operator name.
///
/// Entries are immutable once inserted and there is no per-entry expiry;
/// revocation clears the whole cache.
#[derive(Debug, Default)]
pub struct IdentityCache {
    entries: DashMap<String, String>,
}

impl IdentityCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, digest: &str) -> Option<String> {
        self.entries.get(digest).map(|e| e.value().clone())
    }

    /// Insert unless the digest is already cached.
    pub fn put(&self, digest: String, operator: String) {
        self.entries.entry(digest).or_insert(operator);
    }

    pub fn clear(&self) {
        self.entries.clear();
        tracing::info!("Token cache cleared");
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
