//! Content fingerprints used as version labels and legacy name suffixes.
//!
//! 16 hex characters of SHA-256 is treated as practically collision-free for
//! naming purposes; this is not a security boundary.

use sha2::{Digest, Sha256};

/// Hex characters kept from a digest.
pub const FINGERPRINT_LEN: usize = 16;

/// What a fingerprint is derived from.
#[derive(Debug, Clone, Copy)]
pub enum FingerprintSource<'a> {
    /// Packaged source bytes; hashed.
    Package(&'a [u8]),
    /// A hex digest already computed upstream; truncated.
    Digest(&'a str),
    /// An arbitrary identity string; hashed.
    Identity(&'a str),
}

pub fn fingerprint(source: FingerprintSource<'_>) -> String {
    match source {
        FingerprintSource::Package(bytes) => truncate(&sha256_hex(bytes)),
        FingerprintSource::Digest(digest) if is_hex_digest(digest) => truncate(&digest.to_ascii_lowercase()),
        FingerprintSource::Digest(other) | FingerprintSource::Identity(other) => truncate(&sha256_hex(other.as_bytes())),
    }
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

fn is_hex_digest(value: &str) -> bool {
    value.len() >= FINGERPRINT_LEN && value.bytes().all(|b| b.is_ascii_hexdigit())
}

fn truncate(digest: &str) -> String {
    digest.chars().take(FINGERPRINT_LEN).collect()
}
