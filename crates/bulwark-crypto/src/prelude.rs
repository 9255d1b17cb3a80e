//! Prelude module - commonly used types for convenient import.

pub use crate::{ContentHash, CryptoError, CryptoResult, FieldHasher, KeyPair, PublicKey, Signature};
