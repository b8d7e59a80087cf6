//! Content Fingerprints
//!
//! SHA-256 over the raw cover bytes. Used only to detect "same picture as
//! last time", never for anything security related.

use std::fmt;

use sha2::{Digest, Sha256};

/// Digest of a cover image's raw bytes
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentFingerprint([u8; 32]);

impl ContentFingerprint {
    /// Fingerprint a byte slice
    #[must_use]
    pub fn of(bytes: &[u8]) -> Self {
        Self(Sha256::digest(bytes).into())
    }

    /// First 12 hex characters, enough to tell covers apart in logs
    #[must_use]
    pub fn short(&self) -> String {
        hex::encode(&self.0[..6])
    }
}

impl fmt::Debug for ContentFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentFingerprint({})", self.short())
    }
}

impl fmt::Display for ContentFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.short())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_bytes_same_fingerprint() {
        assert_eq!(ContentFingerprint::of(b"cover"), ContentFingerprint::of(b"cover"));
        assert_ne!(ContentFingerprint::of(b"cover"), ContentFingerprint::of(b"cover2"));
    }

    #[test]
    fn test_hex_rendering() {
        // sha256("") is well known
        let fp = ContentFingerprint::of(b"");
        assert_eq!(fp.short(), "e3b0c44298fc");
        assert_eq!(fp.to_string(), "e3b0c44298fc");
    }
}
