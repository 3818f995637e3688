//! Per-conversation context wiring the components together.
//!
//! One session per open conversation view, holding its own cipher
//! handles and transport. Nothing here is process-global, so several
//! conversations (or a test harness) can run side by side without shared
//! mutable state.
//!
//! Scheme selection: the ECDH shared-secret scheme is canonical. When the
//! peer has never published a key the session degrades to the per-thread
//! symmetric scheme, whose own fallback covers a missing cipher backend,
//! so an outbound message always becomes some envelope.

use std::sync::Arc;

use serde_json::Map;
use tracing::warn;

use vc_proto::{api::OutgoingMessage, ConversationId, Envelope, MessageKind, PeerUserId};

use crate::{
    api::ProfileApi,
    channel_cipher::{ChannelCipher, Decrypted},
    error::ChatError,
    key_manager::KeyManager,
    transport::SecureTransport,
};

/// Server-visible stand-in stored in thread history; the real content
/// only ever travels inside the envelope.
const HISTORY_PLACEHOLDER: &str = "[Encrypted Message]";

/// Which scheme produced an outbound envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemeUsed {
    /// ECDH shared secret with the peer's published key (canonical).
    SharedSecret,
    /// Device-local per-thread key (peer never published a key).
    ThreadKey,
}

pub struct ConversationSession {
    conversation: ConversationId,
    peer: PeerUserId,
    keys: Arc<KeyManager>,
    cipher: Arc<ChannelCipher>,
    transport: SecureTransport,
    history: Option<ProfileApi>,
}

impl ConversationSession {
    pub fn new(
        conversation: ConversationId,
        peer: PeerUserId,
        keys: Arc<KeyManager>,
        cipher: Arc<ChannelCipher>,
        transport: SecureTransport,
    ) -> Self {
        Self {
            conversation,
            peer,
            keys,
            cipher,
            transport,
            history: None,
        }
    }

    /// Mirror outbound envelopes into thread history via REST, alongside
    /// realtime delivery. Best effort: a failed mirror is logged, never
    /// fatal to the send.
    pub fn with_history_api(mut self, api: ProfileApi) -> Self {
        self.history = Some(api);
        self
    }

    pub fn conversation(&self) -> ConversationId {
        self.conversation
    }

    pub fn peer(&self) -> PeerUserId {
        self.peer
    }

    /// Open the realtime channel for this conversation.
    pub fn connect(&self) {
        self.transport.connect(self.conversation);
    }

    /// The underlying transport, for event subscription.
    pub fn transport(&self) -> &SecureTransport {
        &self.transport
    }

    /// Encrypt a message and hand the envelope to the transport. Returns
    /// which scheme sealed it.
    pub async fn send_secure(&self, plaintext: &str) -> Result<SchemeUsed, ChatError> {
        let (envelope, scheme) = self.encrypt_outgoing(plaintext).await?;
        let message = serde_json::to_value(&envelope).map_err(vc_proto::ProtoError::from)?;
        self.transport.send(message, MessageKind::Text, Map::new())?;

        if let Some(api) = &self.history {
            let wire = envelope.to_wire();
            let record = OutgoingMessage {
                thread: self.conversation,
                encrypted_content: wire.ciphertext,
                nonce: wire.nonce,
                encryption_version: wire.version,
                content: HISTORY_PLACEHOLDER.into(),
            };
            if let Err(e) = api.post_message(&record).await {
                warn!(conversation = %self.conversation, "history mirror failed: {e}");
            }
        }
        Ok(scheme)
    }

    async fn encrypt_outgoing(&self, plaintext: &str) -> Result<(Envelope, SchemeUsed), ChatError> {
        match self.keys.encrypt(plaintext, self.conversation, self.peer).await {
            Ok(envelope) => Ok((envelope, SchemeUsed::SharedSecret)),
            Err(ChatError::PeerKeyUnavailable(peer)) => {
                warn!(%peer, "peer key unavailable, degrading to thread-key scheme");
                let envelope = self.cipher.encrypt(plaintext, self.conversation).await?;
                Ok((envelope, SchemeUsed::ThreadKey))
            }
            Err(e) => Err(e),
        }
    }

    /// Decrypt an inbound envelope: canonical scheme first, thread-key
    /// scheme second. Failures collapse to the placeholder so a single
    /// bad message never hides the conversation.
    pub async fn decrypt_incoming(&self, envelope: &Envelope) -> Decrypted {
        match self.keys.decrypt(envelope, self.conversation, self.peer).await {
            Ok(text) => {
                if envelope.is_confidential() {
                    Decrypted::Confidential(text)
                } else {
                    Decrypted::Unprotected(text)
                }
            }
            Err(_) => self.cipher.decrypt(envelope, self.conversation).await,
        }
    }

    /// Tear down: close the channel and drop the cached secret.
    pub async fn close(&self) {
        self.transport.disconnect();
        self.keys.forget_conversation(self.conversation).await;
    }
}
