//! REST request/response bodies shared with the backend.
//! These map directly to JSON bodies on the wire.

use serde::{Deserialize, Serialize};

use crate::ids::ConversationId;

/// Subset of `GET /profiles/{id}/` this core consumes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileResponse {
    pub id: u64,
    #[serde(default)]
    pub username: Option<String>,
    /// Base64 X25519 public key; absent until the peer initialises
    /// encryption on one of their devices.
    #[serde(default)]
    pub public_encryption_key: Option<String>,
}

/// Body of `PUT /profiles/me/` when publishing this device's key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileKeyUpdate {
    pub public_encryption_key: String,
}

/// REST persistence body for an encrypted message. Realtime delivery goes
/// over the socket; this mirrors it into thread history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutgoingMessage {
    pub thread: ConversationId,
    pub encrypted_content: String,
    pub nonce: String,
    pub encryption_version: u8,
    /// Server-visible placeholder; the real content travels encrypted.
    pub content: String,
}
