//! Authenticated encryption for message envelopes.
//!
//! XChaCha20-Poly1305: 32-byte key, 24-byte random nonce, 16-byte tag.
//! Nonce and ciphertext travel as separate envelope fields, so `seal`
//! returns them separately and `open` validates the nonce length before
//! touching the cipher.

use chacha20poly1305::{
    aead::{Aead, AeadCore, KeyInit, OsRng as AeadOsRng},
    XChaCha20Poly1305,
};
use zeroize::Zeroizing;

use crate::error::CryptoError;

/// XChaCha20-Poly1305 nonce length in bytes.
pub const NONCE_LEN: usize = 24;

/// Encrypt `plaintext` under a 32-byte key, drawing a fresh random nonce.
/// Nonce reuse under the same key is forbidden; every call generates new
/// randomness.
pub fn seal(key: &[u8; 32], plaintext: &[u8]) -> Result<([u8; NONCE_LEN], Vec<u8>), CryptoError> {
    let cipher = XChaCha20Poly1305::new_from_slice(key).map_err(|_| CryptoError::AeadEncrypt)?;

    let nonce = XChaCha20Poly1305::generate_nonce(&mut AeadOsRng);
    let ciphertext = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|_| CryptoError::AeadEncrypt)?;

    let mut nonce_out = [0u8; NONCE_LEN];
    nonce_out.copy_from_slice(&nonce);
    Ok((nonce_out, ciphertext))
}

/// Decrypt a ciphertext produced by [`seal`]. Fails on a wrong key,
/// corrupted input, or a nonce of the wrong length; never panics.
pub fn open(key: &[u8; 32], nonce: &[u8], ciphertext: &[u8]) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    if nonce.len() != NONCE_LEN {
        return Err(CryptoError::NonceLength {
            expected: NONCE_LEN,
            got: nonce.len(),
        });
    }

    let cipher = XChaCha20Poly1305::new_from_slice(key).map_err(|_| CryptoError::AeadDecrypt)?;
    let nonce = chacha20poly1305::XNonce::from_slice(nonce);

    let plaintext = cipher
        .decrypt(nonce, ciphertext)
        .map_err(|_| CryptoError::AeadDecrypt)?;

    Ok(Zeroizing::new(plaintext))
}
