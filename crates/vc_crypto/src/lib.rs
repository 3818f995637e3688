//! vc_crypto — cryptographic primitives for the Veilchat messaging core
//!
//! Two independent key schemes live here:
//! - [`DeviceKeyPair`] + [`SharedSecret`]: one long-term X25519 identity
//!   per device install; pairwise conversation secrets derived via ECDH
//!   with a peer's published public key, expanded through HKDF-SHA256.
//! - [`ThreadKey`]: an independently generated 32-byte symmetric key per
//!   conversation, owned by a single device and never derived from peer
//!   material.
//!
//! Both schemes encrypt with XChaCha20-Poly1305 ([`aead::seal`] /
//! [`aead::open`]). Secrets are zeroized on drop.

pub mod aead;
pub mod error;
pub mod kdf;
pub mod keys;

pub use error::CryptoError;
pub use keys::{DeviceKeyPair, PublicKeyBytes, SharedSecret, ThreadKey};
