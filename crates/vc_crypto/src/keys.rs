//! Device key material.
//!
//! Each *device* owns one long-term X25519 [`DeviceKeyPair`], created on
//! first use. The private half persists only in the local store; the
//! public half is uploaded to the backend profile record so peers can
//! derive a pairwise secret.
//!
//! Pairwise [`SharedSecret`]s come out of ECDH with a peer's published
//! key and are cached in memory only. [`ThreadKey`]s are the independent
//! per-conversation symmetric scheme: random 32 bytes, generated locally,
//! never a function of anyone else's key material.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use x25519_dalek::{PublicKey as X25519Public, StaticSecret};
use zeroize::ZeroizeOnDrop;

use crate::{error::CryptoError, kdf};

// ── Newtype wrappers ──────────────────────────────────────────────────────────

/// 32-byte X25519 public key, base64url-encoded on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PublicKeyBytes(pub Vec<u8>);

impl PublicKeyBytes {
    pub fn to_b64(&self) -> String {
        URL_SAFE_NO_PAD.encode(&self.0)
    }

    pub fn from_b64(s: &str) -> Result<Self, CryptoError> {
        let bytes = URL_SAFE_NO_PAD.decode(s)?;
        if bytes.len() != 32 {
            return Err(CryptoError::InvalidKey(format!(
                "Public key must be 32 bytes, got {}",
                bytes.len()
            )));
        }
        Ok(Self(bytes))
    }

    /// Human-readable fingerprint: BLAKE3 of the key bytes, truncated to
    /// 20 bytes (160 bits), hex-encoded in groups of 4 for display.
    ///
    /// Example: "a1b2 c3d4 e5f6 7890 abcd ef01 2345 6789 0abc def0"
    pub fn fingerprint(&self) -> String {
        fingerprint_bytes(&self.0)
    }

    fn as_array(&self) -> Result<[u8; 32], CryptoError> {
        self.0
            .as_slice()
            .try_into()
            .map_err(|_| CryptoError::InvalidKey("expected 32-byte key".into()))
    }
}

pub(crate) fn fingerprint_bytes(bytes: &[u8]) -> String {
    let hash = blake3::hash(bytes);
    let hex = hex::encode(&hash.as_bytes()[..20]);
    hex.chars()
        .collect::<Vec<_>>()
        .chunks(4)
        .map(|c| c.iter().collect::<String>())
        .collect::<Vec<_>>()
        .join(" ")
}

// ── Device keypair ────────────────────────────────────────────────────────────

/// Long-term device identity key. Drop clears the secret via ZeroizeOnDrop.
#[derive(ZeroizeOnDrop)]
pub struct DeviceKeyPair {
    #[zeroize(skip)]
    pub public: PublicKeyBytes,
    secret_bytes: [u8; 32],
}

impl DeviceKeyPair {
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = PublicKeyBytes(X25519Public::from(&secret).as_bytes().to_vec());
        Self {
            public,
            secret_bytes: secret.to_bytes(),
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        if bytes.len() != 32 {
            return Err(CryptoError::InvalidKey(format!(
                "Device key must be 32 bytes, got {}",
                bytes.len()
            )));
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(bytes);
        let secret = StaticSecret::from(arr);
        let public = PublicKeyBytes(X25519Public::from(&secret).as_bytes().to_vec());
        Ok(Self {
            public,
            secret_bytes: arr,
        })
    }

    pub fn from_b64(s: &str) -> Result<Self, CryptoError> {
        let bytes = URL_SAFE_NO_PAD.decode(s)?;
        Self::from_bytes(&bytes)
    }

    /// Export the secret half for local persistence. Never transmitted.
    pub fn secret_b64(&self) -> String {
        URL_SAFE_NO_PAD.encode(self.secret_bytes)
    }

    /// Export the public key in base64 format for server upload.
    pub fn public_b64(&self) -> String {
        self.public.to_b64()
    }

    /// ECDH against a peer's public key, expanded to a 32-byte secret.
    ///
    /// Commutative: `a.diffie_hellman(b_pub) == b.diffie_hellman(a_pub)`,
    /// so both conversation participants derive the same key.
    pub fn diffie_hellman(&self, peer: &PublicKeyBytes) -> Result<SharedSecret, CryptoError> {
        let secret = StaticSecret::from(self.secret_bytes);
        let peer_pub = X25519Public::from(peer.as_array()?);
        let dh = secret.diffie_hellman(&peer_pub);
        let key = kdf::derive_thread_secret(dh.as_bytes())?;
        Ok(SharedSecret(key))
    }
}

// ── Derived and generated secrets ─────────────────────────────────────────────

/// Pairwise conversation secret derived via ECDH. Held in memory for the
/// process lifetime, recomputed on cold start, never persisted.
#[derive(ZeroizeOnDrop)]
pub struct SharedSecret(pub(crate) [u8; 32]);

impl SharedSecret {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

/// Independently generated per-conversation symmetric key.
#[derive(Clone, ZeroizeOnDrop)]
pub struct ThreadKey([u8; 32]);

impl ThreadKey {
    pub fn generate() -> Self {
        use rand::RngCore;
        let mut key = [0u8; 32];
        OsRng.fill_bytes(&mut key);
        Self(key)
    }

    pub fn from_b64(s: &str) -> Result<Self, CryptoError> {
        let bytes = URL_SAFE_NO_PAD.decode(s)?;
        if bytes.len() != 32 {
            return Err(CryptoError::InvalidKey(format!(
                "Thread key must be 32 bytes, got {}",
                bytes.len()
            )));
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }

    pub fn to_b64(&self) -> String {
        URL_SAFE_NO_PAD.encode(self.0)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Deterministic, non-reversible digest for out-of-band verification.
    /// The same key yields the same fingerprint on every device.
    pub fn fingerprint(&self) -> String {
        fingerprint_bytes(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dh_is_commutative() {
        let alice = DeviceKeyPair::generate();
        let bob = DeviceKeyPair::generate();

        let ab = alice.diffie_hellman(&bob.public).unwrap();
        let ba = bob.diffie_hellman(&alice.public).unwrap();

        assert_eq!(ab.as_bytes(), ba.as_bytes(), "both sides must derive the same secret");
    }

    #[test]
    fn dh_differs_per_peer() {
        let alice = DeviceKeyPair::generate();
        let bob = DeviceKeyPair::generate();
        let carol = DeviceKeyPair::generate();

        let with_bob = alice.diffie_hellman(&bob.public).unwrap();
        let with_carol = alice.diffie_hellman(&carol.public).unwrap();

        assert_ne!(with_bob.as_bytes(), with_carol.as_bytes());
    }

    #[test]
    fn keypair_survives_b64_round_trip() {
        let pair = DeviceKeyPair::generate();
        let restored = DeviceKeyPair::from_b64(&pair.secret_b64()).unwrap();
        assert_eq!(pair.public, restored.public);
    }

    #[test]
    fn public_key_b64_rejects_wrong_length() {
        let short = URL_SAFE_NO_PAD.encode([0u8; 16]);
        assert!(PublicKeyBytes::from_b64(&short).is_err());
        assert!(PublicKeyBytes::from_b64("not base64!!!").is_err());
    }

    #[test]
    fn thread_key_fingerprint_is_stable_and_distinct() {
        let key = ThreadKey::generate();
        let same = ThreadKey::from_b64(&key.to_b64()).unwrap();
        assert_eq!(key.fingerprint(), same.fingerprint());

        let other = ThreadKey::generate();
        assert_ne!(key.fingerprint(), other.fingerprint());
    }
}
