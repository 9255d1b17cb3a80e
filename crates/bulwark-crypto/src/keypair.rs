//! Ed25519 keys and signatures.
//!
//! The runtime key signs every audit entry so that a rewritten chain cannot
//! be re-hashed into consistency without also holding the secret key.

use std::fmt;
use std::io::Write;
use std::path::Path;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use ed25519_dalek::{Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::error::{CryptoError, CryptoResult};

/// An Ed25519 key pair. The secret half is zeroized on drop.
#[derive(ZeroizeOnDrop)]
pub struct KeyPair {
    #[zeroize(skip)]
    verifying_key: VerifyingKey,
    signing_key: SigningKey,
}

impl KeyPair {
    /// Generate a new random key pair.
    #[must_use]
    pub fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        Self {
            verifying_key: signing_key.verifying_key(),
            signing_key,
        }
    }

    /// Reconstruct from a 32-byte secret key.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidLength`] if the slice is not 32 bytes.
    pub fn from_secret_key(bytes: &[u8]) -> CryptoResult<Self> {
        let mut secret: [u8; 32] = bytes.try_into().map_err(|_| CryptoError::InvalidLength {
            expected: 32,
            actual: bytes.len(),
        })?;
        let signing_key = SigningKey::from_bytes(&secret);
        secret.zeroize();
        Ok(Self {
            verifying_key: signing_key.verifying_key(),
            signing_key,
        })
    }

    /// The shareable public half.
    #[must_use]
    pub fn public_key(&self) -> PublicKey {
        PublicKey(*self.verifying_key.as_bytes())
    }

    /// Short key identifier for logs.
    #[must_use]
    pub fn key_id_hex(&self) -> String {
        self.public_key().key_id_hex()
    }

    /// Sign a message.
    #[must_use]
    pub fn sign(&self, message: &[u8]) -> Signature {
        Signature(self.signing_key.sign(message).to_bytes())
    }

    /// Load a key from `path`, or generate and persist one if absent.
    ///
    /// New key files are created atomically with mode 0600 on Unix. Symlinked
    /// key files are refused.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::IoError`] on I/O failures or symlinks, and
    /// [`CryptoError::InvalidLength`] if the stored key is malformed.
    pub fn load_or_generate(path: impl AsRef<Path>) -> CryptoResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| CryptoError::IoError(e.to_string()))?;
        }

        let mut options = std::fs::OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        match options.open(path) {
            Ok(mut file) => {
                let kp = Self::generate();
                let secret = Zeroizing::new(kp.signing_key.to_bytes());
                file.write_all(secret.as_ref())
                    .map_err(|e| CryptoError::IoError(e.to_string()))?;
                return Ok(kp);
            },
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {},
            Err(e) => return Err(CryptoError::IoError(e.to_string())),
        }

        let meta =
            std::fs::symlink_metadata(path).map_err(|e| CryptoError::IoError(e.to_string()))?;
        if meta.file_type().is_symlink() {
            return Err(CryptoError::IoError(format!(
                "refusing to read key file {}: path is a symlink",
                path.display()
            )));
        }
        let bytes =
            Zeroizing::new(std::fs::read(path).map_err(|e| CryptoError::IoError(e.to_string()))?);
        Self::from_secret_key(&bytes)
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("key_id", &self.key_id_hex())
            .finish_non_exhaustive()
    }
}

/// An Ed25519 public key.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PublicKey([u8; 32]);

impl PublicKey {
    /// Create from raw bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// First eight bytes as hex.
    #[must_use]
    pub fn key_id_hex(&self) -> String {
        hex::encode(&self.0[..8])
    }

    /// Verify `signature` over `message`.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidPublicKey`] for a malformed key and
    /// [`CryptoError::SignatureVerificationFailed`] for a bad signature.
    pub fn verify(&self, message: &[u8], signature: &Signature) -> CryptoResult<()> {
        let key = VerifyingKey::from_bytes(&self.0)
            .map_err(|e| CryptoError::InvalidPublicKey(e.to_string()))?;
        let sig = ed25519_dalek::Signature::from_bytes(&signature.0);
        key.verify(message, &sig)
            .map_err(|_| CryptoError::SignatureVerificationFailed)
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", self.key_id_hex())
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl Serialize for PublicKey {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(self.0))
    }
}

impl<'de> Deserialize<'de> for PublicKey {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        let bytes = STANDARD.decode(&s).map_err(serde::de::Error::custom)?;
        let arr: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| serde::de::Error::custom("public key must be 32 bytes"))?;
        Ok(Self(arr))
    }
}

/// An Ed25519 signature (64 bytes).
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Signature([u8; 64]);

impl Signature {
    /// Create from raw bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 64]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 64] {
        &self.0
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({}...)", hex::encode(&self.0[..8]))
    }
}

impl Serialize for Signature {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(self.0))
    }
}

impl<'de> Deserialize<'de> for Signature {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        let bytes = STANDARD.decode(&s).map_err(serde::de::Error::custom)?;
        let arr: [u8; 64] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| serde::de::Error::custom("signature must be 64 bytes"))?;
        Ok(Self(arr))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_and_verify() {
        let kp = KeyPair::generate();
        let sig = kp.sign(b"entry");
        assert!(kp.public_key().verify(b"entry", &sig).is_ok());
        assert!(kp.public_key().verify(b"other", &sig).is_err());
    }

    #[test]
    fn test_foreign_key_rejects() {
        let kp = KeyPair::generate();
        let other = KeyPair::generate();
        let sig = kp.sign(b"entry");
        assert!(other.public_key().verify(b"entry", &sig).is_err());
    }

    #[test]
    fn test_from_secret_key_length() {
        assert!(KeyPair::from_secret_key(&[7u8; 31]).is_err());
        let a = KeyPair::from_secret_key(&[7u8; 32]).unwrap();
        let b = KeyPair::from_secret_key(&[7u8; 32]).unwrap();
        assert_eq!(a.public_key(), b.public_key());
    }

    #[test]
    fn test_load_or_generate_is_stable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keys").join("runtime.key");
        let first = KeyPair::load_or_generate(&path).unwrap();
        let second = KeyPair::load_or_generate(&path).unwrap();
        assert_eq!(first.public_key(), second.public_key());

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[test]
    fn test_serde_round_trip() {
        let kp = KeyPair::generate();
        let sig = kp.sign(b"x");
        let json = serde_json::to_string(&(kp.public_key(), sig)).unwrap();
        let (pk, back): (PublicKey, Signature) = serde_json::from_str(&json).unwrap();
        assert_eq!(pk, kp.public_key());
        assert_eq!(back, sig);
    }
}
