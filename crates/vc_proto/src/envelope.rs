//! Versioned message envelope — what the transport and backend see.
//!
//! `version` selects the encoding scheme:
//!   0 — reversible base64 of the plaintext. NOT confidential; emitted
//!       only when the cipher backend is unavailable, and explicitly
//!       distinguishable so callers can surface the downgrade.
//!   1 — XChaCha20-Poly1305 ciphertext with a separate 24-byte nonce.
//!
//! The typed [`Envelope`] forces an exhaustive decision per version;
//! an unknown version on the wire is a typed error, never a guess.

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::ProtoError;

pub const VERSION_PLAIN: u8 = 0;
pub const VERSION_SEALED: u8 = 1;

/// On-wire JSON form: `{ ciphertext, nonce, version }`. Version-0
/// envelopes carry an empty nonce.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireEnvelope {
    pub ciphertext: String,
    #[serde(default)]
    pub nonce: String,
    pub version: u8,
}

/// Typed envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Envelope {
    /// Version 0: reversibly encoded, readable by anyone on the path.
    Plain { encoded: String },
    /// Version 1: authenticated ciphertext plus its nonce.
    Sealed { ciphertext: String, nonce: String },
}

impl Envelope {
    pub fn version(&self) -> u8 {
        match self {
            Envelope::Plain { .. } => VERSION_PLAIN,
            Envelope::Sealed { .. } => VERSION_SEALED,
        }
    }

    /// Whether this envelope carries a real confidentiality guarantee.
    /// A `Plain` envelope is a deliberate fallback, not encryption.
    pub fn is_confidential(&self) -> bool {
        matches!(self, Envelope::Sealed { .. })
    }

    pub fn to_wire(&self) -> WireEnvelope {
        match self {
            Envelope::Plain { encoded } => WireEnvelope {
                ciphertext: encoded.clone(),
                nonce: String::new(),
                version: VERSION_PLAIN,
            },
            Envelope::Sealed { ciphertext, nonce } => WireEnvelope {
                ciphertext: ciphertext.clone(),
                nonce: nonce.clone(),
                version: VERSION_SEALED,
            },
        }
    }
}

impl TryFrom<WireEnvelope> for Envelope {
    type Error = ProtoError;

    fn try_from(wire: WireEnvelope) -> Result<Self, ProtoError> {
        match wire.version {
            VERSION_PLAIN => Ok(Envelope::Plain {
                encoded: wire.ciphertext,
            }),
            VERSION_SEALED => Ok(Envelope::Sealed {
                ciphertext: wire.ciphertext,
                nonce: wire.nonce,
            }),
            other => Err(ProtoError::UnsupportedVersion(other)),
        }
    }
}

impl Serialize for Envelope {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_wire().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Envelope {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let wire = WireEnvelope::deserialize(deserializer)?;
        Envelope::try_from(wire).map_err(serde::de::Error::custom)
    }
}
