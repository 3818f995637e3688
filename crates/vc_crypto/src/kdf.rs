//! Key derivation.
//!
//! The raw X25519 output is never used directly as a cipher key; it is
//! expanded through HKDF-SHA256 with a fixed salt and info string shared
//! by both conversation participants, so A and B end up with identical
//! key material.

use hkdf::Hkdf;
use sha2::Sha256;

use crate::error::CryptoError;

const SECRET_SALT: &[u8] = b"veilchat-thread-secret-v1";

/// Expand `ikm` + `info` into `output.len()` bytes of key material.
///
/// `salt` may be `None` (HKDF substitutes a zeroed salt).
pub fn hkdf_expand(
    ikm: &[u8],
    salt: Option<&[u8]>,
    info: &[u8],
    output: &mut [u8],
) -> Result<(), CryptoError> {
    let hk = Hkdf::<Sha256>::new(salt, ikm);
    hk.expand(info, output)
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))
}

/// Derive the 32-byte conversation secret from a raw DH output.
pub fn derive_thread_secret(dh_output: &[u8]) -> Result<[u8; 32], CryptoError> {
    let mut key = [0u8; 32];
    hkdf_expand(dh_output, Some(SECRET_SALT), b"pairwise-message-key", &mut key)?;
    Ok(key)
}
