//! Request body fingerprints.
//!
//! A [`Fingerprint`] is the SHA-256 digest of a request body. The gate feeds
//! body frames into a [`FingerprintHasher`] as they stream in, so the digest is
//! ready as soon as the last frame has been buffered.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Length of a fingerprint in bytes.
pub const FINGERPRINT_LEN: usize = 32;

/// SHA-256 digest of a request body.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint([u8; FINGERPRINT_LEN]);

impl Fingerprint {
    /// Computes the fingerprint of a complete body.
    #[must_use]
    pub fn of(body: &[u8]) -> Self {
        let mut hasher = FingerprintHasher::new();
        hasher.update(body);
        hasher.finish()
    }

    /// Wraps raw digest bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; FINGERPRINT_LEN]) -> Self {
        Self(bytes)
    }

    /// Returns the raw digest bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; FINGERPRINT_LEN] {
        &self.0
    }

    /// Returns the lowercase hex form of the digest.
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl std::fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // The first eight bytes are enough to tell digests apart in logs.
        write!(f, "Fingerprint({}..)", hex::encode(&self.0[..8]))
    }
}

/// Incremental SHA-256 hasher, one per request.
#[derive(Clone, Default)]
pub struct FingerprintHasher {
    inner: Sha256,
    bytes_hashed: u64,
}

impl FingerprintHasher {
    /// Creates an empty hasher.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds a chunk of body bytes.
    pub fn update(&mut self, chunk: &[u8]) {
        self.inner.update(chunk);
        self.bytes_hashed += chunk.len() as u64;
    }

    /// Returns how many bytes have been fed so far.
    #[must_use]
    pub const fn bytes_hashed(&self) -> u64 {
        self.bytes_hashed
    }

    /// Consumes the hasher and returns the digest.
    #[must_use]
    pub fn finish(self) -> Fingerprint {
        let digest = self.inner.finalize();
        let mut bytes = [0u8; FINGERPRINT_LEN];
        bytes.copy_from_slice(&digest);
        Fingerprint(bytes)
    }
}

impl std::fmt::Debug for FingerprintHasher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FingerprintHasher")
            .field("bytes_hashed", &self.bytes_hashed)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_digest() {
        let fp = Fingerprint::of(b"abc");
        assert_eq!(
            fp.to_hex(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_empty_body_digest() {
        assert_eq!(
            Fingerprint::of(b"").to_string(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_chunked_matches_whole() {
        let mut hasher = FingerprintHasher::new();
        hasher.update(b"{\"item\":");
        hasher.update(b"");
        hasher.update(b"\"book\"}");
        assert_eq!(hasher.bytes_hashed(), 15);
        assert_eq!(hasher.finish(), Fingerprint::of(b"{\"item\":\"book\"}"));
    }

    #[test]
    fn test_different_bodies_differ() {
        assert_ne!(
            Fingerprint::of(b"{\"item\":\"book\"}"),
            Fingerprint::of(b"{\"item\":\"pen\"}")
        );
    }

    #[test]
    fn test_debug_is_abbreviated() {
        let debug = format!("{:?}", Fingerprint::of(b"abc"));
        assert_eq!(debug, "Fingerprint(ba7816bf8f01cfea..)");
    }
}
