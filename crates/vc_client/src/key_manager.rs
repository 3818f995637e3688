//! Device identity and pairwise shared-secret derivation.
//!
//! One long-term X25519 key pair per device install. The private half
//! lives only in the local store; the public half is published to the
//! backend profile (best effort, republished lazily if the upload
//! failed). Conversation secrets are derived on demand via ECDH with the
//! peer's published key, cached in memory for the process lifetime, and
//! never persisted.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{Mutex, OnceCell, RwLock};
use tracing::{info, warn};

use vc_crypto::{aead, DeviceKeyPair, PublicKeyBytes, SharedSecret};
use vc_proto::{ConversationId, Envelope, PeerUserId};
use vc_store::Store;

use crate::{api::KeyDirectory, codec, error::ChatError};

struct LoadedIdentity {
    keys: DeviceKeyPair,
    published: AtomicBool,
}

pub struct KeyManager {
    store: Store,
    directory: Arc<dyn KeyDirectory>,
    identity: RwLock<Option<Arc<LoadedIdentity>>>,
    /// One cell per conversation: concurrent derivations for the same
    /// conversation share a single fetch + DH instead of racing.
    secrets: Mutex<HashMap<ConversationId, Arc<OnceCell<Arc<SharedSecret>>>>>,
}

impl KeyManager {
    pub fn new(store: Store, directory: Arc<dyn KeyDirectory>) -> Self {
        Self {
            store,
            directory,
            identity: RwLock::new(None),
            secrets: Mutex::new(HashMap::new()),
        }
    }

    /// Load or create the device identity. Idempotent: an existing key
    /// pair is never regenerated. A failed public-key upload is logged
    /// and retried on the next shared-secret derivation, not surfaced as
    /// an error.
    pub async fn ensure_identity(&self) -> Result<PublicKeyBytes, ChatError> {
        if let Some(identity) = self.identity.read().await.as_ref() {
            return Ok(identity.keys.public.clone());
        }

        let mut slot = self.identity.write().await;
        if let Some(identity) = slot.as_ref() {
            return Ok(identity.keys.public.clone());
        }

        let record = match self.store.load_identity().await? {
            Some(record) => record,
            None => {
                let fresh = DeviceKeyPair::generate();
                let published = match self.directory.publish_key(&fresh.public_b64()).await {
                    Ok(()) => {
                        info!("published device public key");
                        true
                    }
                    Err(e) => {
                        warn!("device key publish failed, will retry lazily: {e}");
                        false
                    }
                };
                self.store
                    .insert_identity(&fresh.secret_b64(), &fresh.public_b64(), published)
                    .await?
            }
        };

        let keys = DeviceKeyPair::from_b64(&record.secret_key)?;
        let identity = Arc::new(LoadedIdentity {
            keys,
            published: AtomicBool::new(record.published),
        });
        let public = identity.keys.public.clone();
        *slot = Some(identity);
        Ok(public)
    }

    /// The loaded identity, falling back to the store. Never generates key
    /// material: callers that have not initialised the device get
    /// `IdentityNotInitialized`.
    async fn loaded_identity(&self) -> Result<Arc<LoadedIdentity>, ChatError> {
        if let Some(identity) = self.identity.read().await.as_ref() {
            return Ok(identity.clone());
        }

        let record = self
            .store
            .load_identity()
            .await?
            .ok_or(ChatError::IdentityNotInitialized)?;
        let keys = DeviceKeyPair::from_b64(&record.secret_key)?;

        let mut slot = self.identity.write().await;
        if let Some(identity) = slot.as_ref() {
            return Ok(identity.clone());
        }
        let identity = Arc::new(LoadedIdentity {
            keys,
            published: AtomicBool::new(record.published),
        });
        *slot = Some(identity.clone());
        Ok(identity)
    }

    /// Derive (or fetch from cache) the shared secret for a conversation.
    /// Concurrent calls for the same conversation share one derivation;
    /// a failed derivation is not cached and retries on the next call.
    pub async fn derive_shared_secret(
        &self,
        conversation: ConversationId,
        peer: PeerUserId,
    ) -> Result<Arc<SharedSecret>, ChatError> {
        let cell = {
            let mut secrets = self.secrets.lock().await;
            secrets
                .entry(conversation)
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .clone()
        };

        let secret = cell
            .get_or_try_init(|| self.derive_uncached(conversation, peer))
            .await?
            .clone();
        Ok(secret)
    }

    async fn derive_uncached(
        &self,
        conversation: ConversationId,
        peer: PeerUserId,
    ) -> Result<Arc<SharedSecret>, ChatError> {
        let identity = self.loaded_identity().await?;
        self.retry_publish_if_needed(&identity).await;

        let peer_key_b64 = self
            .directory
            .fetch_peer_key(peer)
            .await?
            .ok_or(ChatError::PeerKeyUnavailable(peer))?;
        let peer_key = PublicKeyBytes::from_b64(&peer_key_b64)?;

        let secret = identity.keys.diffie_hellman(&peer_key)?;
        info!(%conversation, %peer, "derived conversation secret");
        Ok(Arc::new(secret))
    }

    async fn retry_publish_if_needed(&self, identity: &LoadedIdentity) {
        if identity.published.load(Ordering::Relaxed) {
            return;
        }
        match self.directory.publish_key(&identity.keys.public_b64()).await {
            Ok(()) => {
                identity.published.store(true, Ordering::Relaxed);
                if let Err(e) = self.store.mark_identity_published().await {
                    warn!("failed to record key publication: {e}");
                }
                info!("published device public key after earlier failure");
            }
            Err(e) => warn!("device key publish retry failed: {e}"),
        }
    }

    /// Encrypt with the conversation's shared secret; fresh nonce per call.
    pub async fn encrypt(
        &self,
        plaintext: &str,
        conversation: ConversationId,
        peer: PeerUserId,
    ) -> Result<Envelope, ChatError> {
        let secret = self.derive_shared_secret(conversation, peer).await?;
        let (nonce, ciphertext) = aead::seal(secret.as_bytes(), plaintext.as_bytes())?;
        Ok(Envelope::Sealed {
            ciphertext: codec::encode(&ciphertext),
            nonce: codec::encode(&nonce),
        })
    }

    /// Decrypt an envelope with the conversation's shared secret.
    ///
    /// Any cryptographic failure collapses to `DecryptionFailed`: the
    /// cause is logged here, never surfaced to rendering code.
    pub async fn decrypt(
        &self,
        envelope: &Envelope,
        conversation: ConversationId,
        peer: PeerUserId,
    ) -> Result<String, ChatError> {
        match envelope {
            Envelope::Plain { encoded } => codec::decode_plain(encoded),
            Envelope::Sealed { ciphertext, nonce } => {
                let secret = self.derive_shared_secret(conversation, peer).await?;
                let ciphertext = codec::decode(ciphertext).map_err(|_| ChatError::DecryptionFailed)?;
                let nonce = codec::decode(nonce).map_err(|_| ChatError::DecryptionFailed)?;
                let plaintext = aead::open(secret.as_bytes(), &nonce, &ciphertext).map_err(|e| {
                    warn!(%conversation, "decryption failed: {e}");
                    ChatError::DecryptionFailed
                })?;
                String::from_utf8(plaintext.to_vec()).map_err(|_| ChatError::DecryptionFailed)
            }
        }
    }

    /// Drop the cached secret for a conversation (view closed). The
    /// secret is recomputed on next use; nothing was ever persisted.
    pub async fn forget_conversation(&self, conversation: ConversationId) {
        self.secrets.lock().await.remove(&conversation);
    }
}
