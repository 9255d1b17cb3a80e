//! Content hashing using BLAKE3.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{CryptoError, CryptoResult};

/// A BLAKE3 content hash (32 bytes).
///
/// Used for:
/// - Audit chain linking (each entry hashes its predecessor's hash)
/// - Checkpoint snapshot integrity
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    /// Hash arbitrary data.
    #[must_use]
    pub fn hash(data: &[u8]) -> Self {
        Self(*blake3::hash(data).as_bytes())
    }

    /// Hash with a derive-key context so hashes from different record types
    /// can never collide.
    #[must_use]
    pub fn hash_with_domain(domain: &str, data: &[u8]) -> Self {
        let mut hasher = blake3::Hasher::new_derive_key(domain);
        hasher.update(data);
        Self(*hasher.finalize().as_bytes())
    }

    /// The zero hash, used as the predecessor of a genesis entry.
    #[must_use]
    pub const fn zero() -> Self {
        Self([0u8; 32])
    }

    /// Check if this is the zero hash.
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }

    /// Get the raw bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Create from raw bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Encode as hex string.
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Decode from hex string.
    ///
    /// # Errors
    ///
    /// Returns an error if the string is not valid hex or not 32 bytes.
    pub fn from_hex(s: &str) -> CryptoResult<Self> {
        let bytes = hex::decode(s).map_err(|e| CryptoError::InvalidEncoding(e.to_string()))?;
        let arr: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| CryptoError::InvalidLength {
                expected: 32,
                actual: bytes.len(),
            })?;
        Ok(Self(arr))
    }

    /// Short form for logs and tables.
    #[must_use]
    pub fn short(&self) -> String {
        hex::encode(&self.0[..8])
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({})", self.short())
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl Serialize for ContentHash {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for ContentHash {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

impl Default for ContentHash {
    fn default() -> Self {
        Self::zero()
    }
}

impl AsRef<[u8]> for ContentHash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Incremental, domain-separated hasher over length-prefixed fields.
///
/// Each field is framed by its length so `("ab", "c")` and `("a", "bc")`
/// hash differently.
pub struct FieldHasher {
    inner: blake3::Hasher,
}

impl FieldHasher {
    /// Start hashing under `domain`.
    #[must_use]
    pub fn new(domain: &str) -> Self {
        Self {
            inner: blake3::Hasher::new_derive_key(domain),
        }
    }

    /// Append a byte field.
    #[must_use]
    pub fn field(mut self, bytes: &[u8]) -> Self {
        let len = u64::try_from(bytes.len()).unwrap_or(u64::MAX);
        self.inner.update(&len.to_le_bytes());
        self.inner.update(bytes);
        self
    }

    /// Append a string field.
    #[must_use]
    pub fn str_field(self, s: &str) -> Self {
        self.field(s.as_bytes())
    }

    /// Append an optional field; `None` and `Some(b"")` hash differently.
    #[must_use]
    pub fn opt_field(self, bytes: Option<&[u8]>) -> Self {
        match bytes {
            Some(b) => self.field(&[1]).field(b),
            None => self.field(&[0]),
        }
    }

    /// Append an integer field.
    #[must_use]
    pub fn u64_field(self, value: u64) -> Self {
        self.field(&value.to_le_bytes())
    }

    /// Append a signed integer field.
    #[must_use]
    pub fn i64_field(self, value: i64) -> Self {
        self.field(&value.to_le_bytes())
    }

    /// Finish and return the hash.
    #[must_use]
    pub fn finish(self) -> ContentHash {
        ContentHash(*self.inner.finalize().as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_is_deterministic() {
        assert_eq!(ContentHash::hash(b"a"), ContentHash::hash(b"a"));
        assert_ne!(ContentHash::hash(b"a"), ContentHash::hash(b"b"));
    }

    #[test]
    fn test_domains_separate() {
        assert_ne!(
            ContentHash::hash_with_domain("one", b"x"),
            ContentHash::hash_with_domain("two", b"x")
        );
    }

    #[test]
    fn test_field_framing_is_unambiguous() {
        let a = FieldHasher::new("t").str_field("ab").str_field("c").finish();
        let b = FieldHasher::new("t").str_field("a").str_field("bc").finish();
        assert_ne!(a, b);

        let none = FieldHasher::new("t").opt_field(None).finish();
        let empty = FieldHasher::new("t").opt_field(Some(b"")).finish();
        assert_ne!(none, empty);
    }

    #[test]
    fn test_zero_hash() {
        assert!(ContentHash::zero().is_zero());
        assert!(!ContentHash::hash(b"").is_zero());
        assert_eq!(ContentHash::default(), ContentHash::zero());
    }

    #[test]
    fn test_serde_hex() {
        let hash = ContentHash::hash(b"serde");
        let json = serde_json::to_string(&hash).unwrap();
        assert_eq!(json, format!("\"{}\"", hash.to_hex()));
        let back: ContentHash = serde_json::from_str(&json).unwrap();
        assert_eq!(back, hash);
        assert!(ContentHash::from_hex("abcd").is_err());
    }
}
