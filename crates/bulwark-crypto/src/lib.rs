//! Bulwark Crypto - hashing and signing primitives.
//!
//! This crate provides:
//! - BLAKE3 [`ContentHash`] with domain separation, used for the audit hash
//!   chain and checkpoint integrity
//! - [`FieldHasher`] for unambiguous, length-prefixed hashing of records
//! - Ed25519 [`KeyPair`] / [`PublicKey`] / [`Signature`] for signing audit
//!   entries with the runtime key
//!
//! # Example
//!
//! ```
//! use bulwark_crypto::{ContentHash, KeyPair};
//!
//! let keypair = KeyPair::generate();
//! let hash = ContentHash::hash_with_domain("bulwark.example.v1", b"payload");
//! let signature = keypair.sign(hash.as_bytes());
//! assert!(keypair.public_key().verify(hash.as_bytes(), &signature).is_ok());
//! ```

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

mod error;
mod hash;
mod keypair;

pub use error::{CryptoError, CryptoResult};
pub use hash::{ContentHash, FieldHasher};
pub use keypair::{KeyPair, PublicKey, Signature};
