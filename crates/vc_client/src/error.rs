//! Error taxonomy of the messaging core.
//!
//! Expected failure modes are typed variants; nothing here is allowed to
//! escape as a panic. Decryption failures are recovered close to the call
//! site and rendered as placeholders; transport failures are retried
//! automatically up to the backoff cap.

use thiserror::Error;

use vc_proto::PeerUserId;

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("Device identity not initialised; call ensure_identity() first")]
    IdentityNotInitialized,

    #[error("Peer {0} has not published an encryption key")]
    PeerKeyUnavailable(PeerUserId),

    #[error("Encryption backend unavailable")]
    EncryptionUnavailable,

    #[error("Message could not be decrypted")]
    DecryptionFailed,

    #[error("Transport is not connected")]
    TransportUnavailable,

    #[error("Automatic reconnection gave up after {attempts} attempts")]
    ReconnectExhausted { attempts: u32 },

    #[error("Outbox is full ({capacity} queued frames)")]
    OutboxFull { capacity: usize },

    #[error("Connection failed: {0}")]
    Connect(String),

    #[error("Socket error: {0}")]
    Socket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Crypto error: {0}")]
    Crypto(#[from] vc_crypto::CryptoError),

    #[error("Store error: {0}")]
    Store(#[from] vc_store::StoreError),

    #[error("Wire format error: {0}")]
    Proto(#[from] vc_proto::ProtoError),

    #[error("Backend request failed: {0}")]
    Api(#[from] reqwest::Error),
}
