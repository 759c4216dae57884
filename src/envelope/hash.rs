//! Content hashes for chunked payloads.

use md5::{Digest, Md5};
use std::fmt;

/// Hex-encoded MD5 digest of a serialized payload.
///
/// The digest doubles as a path segment, so only 32 lowercase or uppercase
/// hex characters are accepted when parsing a stored value.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ContentHash(String);

impl ContentHash {
    /// Length of the hex form.
    pub const HEX_LEN: usize = 32;

    /// Compute the digest of `data`.
    pub fn compute(data: &[u8]) -> Self {
        let mut hasher = Md5::new();
        hasher.update(data);
        Self(hex::encode(hasher.finalize().as_slice()))
    }

    /// Parse a digest read back from an envelope.
    pub fn parse(s: &str) -> Option<Self> {
        if s.len() == Self::HEX_LEN && s.bytes().all(|b| b.is_ascii_hexdigit()) {
            Some(Self(s.to_ascii_lowercase()))
        } else {
            None
        }
    }

    /// The hex form.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({})", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_digests() {
        assert_eq!(
            ContentHash::compute(b"").as_str(),
            "d41d8cd98f00b204e9800998ecf8427e"
        );
        assert_eq!(
            ContentHash::compute(b"hello").as_str(),
            "5d41402abc4b2a76b9719d911017c592"
        );
    }

    #[test]
    fn test_parse() {
        let hash = ContentHash::parse("5D41402ABC4B2A76B9719D911017C592").unwrap();
        assert_eq!(hash, ContentHash::compute(b"hello"));

        assert!(ContentHash::parse("").is_none());
        assert!(ContentHash::parse("5d41402abc4b2a76b9719d911017c59").is_none());
        assert!(ContentHash::parse("5d41402abc4b2a76b9719d911017c59/").is_none());
        assert!(ContentHash::parse("zz41402abc4b2a76b9719d911017c592").is_none());
    }
}
