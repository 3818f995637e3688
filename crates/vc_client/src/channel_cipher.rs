//! Per-conversation symmetric confidentiality with graceful degradation.
//!
//! Each conversation gets an independently generated 32-byte key on first
//! use, persisted locally and never derived from peer material. When the
//! cipher backend is unavailable the component degrades to version-0
//! envelopes: reversible encoding, no confidentiality, explicitly marked
//! so the application can surface the downgrade instead of hiding it.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OnceCell};
use tracing::warn;

use vc_crypto::{aead, ThreadKey};
use vc_proto::{ConversationId, Envelope};
use vc_store::Store;

use crate::{codec, error::ChatError};

/// Rendered in place of a message that failed to decrypt, so one corrupt
/// message never breaks the rest of a conversation.
pub const DECRYPT_FAILED_PLACEHOLDER: &str = "[message could not be decrypted]";

/// Whether the AEAD backend may be used. `Disabled` forces the version-0
/// fallback; injectable for platforms without a crypto provider and for
/// exercising the degraded path in tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CryptoAvailability {
    #[default]
    Available,
    Disabled,
}

/// Outcome of decrypting an inbound envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decrypted {
    /// Version-1 envelope, authenticated and decrypted.
    Confidential(String),
    /// Version-0 fallback envelope; readable, but was never confidential.
    Unprotected(String),
    /// Wrong key, corrupted ciphertext, or malformed nonce.
    Failed,
}

impl Decrypted {
    /// Text to render; failures collapse to the fixed placeholder.
    pub fn display_text(&self) -> &str {
        match self {
            Decrypted::Confidential(text) | Decrypted::Unprotected(text) => text,
            Decrypted::Failed => DECRYPT_FAILED_PLACEHOLDER,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Decrypted::Failed)
    }
}

pub struct ChannelCipher {
    store: Store,
    availability: CryptoAvailability,
    /// One cell per conversation: first-use key creation is single-flight,
    /// and the store refuses to overwrite, so two racing creators always
    /// converge on one persisted key.
    keys: Mutex<HashMap<ConversationId, Arc<OnceCell<Arc<ThreadKey>>>>>,
}

impl ChannelCipher {
    pub fn new(store: Store) -> Self {
        Self::with_availability(store, CryptoAvailability::Available)
    }

    pub fn with_availability(store: Store, availability: CryptoAvailability) -> Self {
        Self {
            store,
            availability,
            keys: Mutex::new(HashMap::new()),
        }
    }

    /// Cached key, else the persisted one, else a freshly generated and
    /// persisted key. An existing key is never regenerated; doing so would
    /// orphan every previously stored ciphertext for the conversation.
    pub async fn get_or_create_thread_key(
        &self,
        conversation: ConversationId,
    ) -> Result<Arc<ThreadKey>, ChatError> {
        let cell = {
            let mut keys = self.keys.lock().await;
            keys.entry(conversation)
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .clone()
        };

        let key = cell
            .get_or_try_init(|| async {
                if let Some(stored) = self.store.load_thread_key(conversation).await? {
                    return Ok::<_, ChatError>(Arc::new(ThreadKey::from_b64(&stored)?));
                }
                let fresh = ThreadKey::generate();
                let winner = self
                    .store
                    .insert_thread_key(conversation, &fresh.to_b64())
                    .await?;
                Ok(Arc::new(ThreadKey::from_b64(&winner)?))
            })
            .await?
            .clone();
        Ok(key)
    }

    /// Encrypt for a conversation. Falls back to a version-0 envelope when
    /// the cipher backend is unavailable; the downgrade is logged and the
    /// resulting envelope reports `is_confidential() == false`.
    pub async fn encrypt(
        &self,
        plaintext: &str,
        conversation: ConversationId,
    ) -> Result<Envelope, ChatError> {
        if self.availability == CryptoAvailability::Disabled {
            warn!(%conversation, "cipher backend unavailable, sending reversibly encoded fallback");
            return Ok(Envelope::Plain {
                encoded: codec::encode_plain(plaintext),
            });
        }

        let key = self.get_or_create_thread_key(conversation).await?;
        let (nonce, ciphertext) = aead::seal(key.as_bytes(), plaintext.as_bytes())?;
        Ok(Envelope::Sealed {
            ciphertext: codec::encode(&ciphertext),
            nonce: codec::encode(&nonce),
        })
    }

    /// Decrypt an inbound envelope. Never errors on bad input: corruption,
    /// a wrong key, or a malformed nonce all collapse to
    /// [`Decrypted::Failed`] so rendering carries on.
    pub async fn decrypt(&self, envelope: &Envelope, conversation: ConversationId) -> Decrypted {
        match envelope {
            Envelope::Plain { encoded } => match codec::decode_plain(encoded) {
                Ok(text) => Decrypted::Unprotected(text),
                Err(_) => Decrypted::Failed,
            },
            Envelope::Sealed { ciphertext, nonce } => {
                let key = match self.get_or_create_thread_key(conversation).await {
                    Ok(key) => key,
                    Err(e) => {
                        warn!(%conversation, "thread key unavailable for decrypt: {e}");
                        return Decrypted::Failed;
                    }
                };
                let (Ok(ciphertext), Ok(nonce)) = (codec::decode(ciphertext), codec::decode(nonce))
                else {
                    return Decrypted::Failed;
                };
                match aead::open(key.as_bytes(), &nonce, &ciphertext) {
                    Ok(plaintext) => match String::from_utf8(plaintext.to_vec()) {
                        Ok(text) => Decrypted::Confidential(text),
                        Err(_) => Decrypted::Failed,
                    },
                    Err(e) => {
                        warn!(%conversation, "decryption failed: {e}");
                        Decrypted::Failed
                    }
                }
            }
        }
    }

    /// Remove a conversation's key from cache and store (user left the
    /// conversation).
    pub async fn clear_thread_key(&self, conversation: ConversationId) -> Result<(), ChatError> {
        self.keys.lock().await.remove(&conversation);
        self.store.delete_thread_key(conversation).await?;
        Ok(())
    }

    /// Remove every thread key (sign-out).
    pub async fn clear_all_keys(&self) -> Result<(), ChatError> {
        self.keys.lock().await.clear();
        self.store.delete_all_thread_keys().await?;
        Ok(())
    }

    /// Deterministic short digest of the conversation key for out-of-band
    /// verification. Same key, same fingerprint, on any device.
    pub async fn key_fingerprint(&self, conversation: ConversationId) -> Result<String, ChatError> {
        Ok(self.get_or_create_thread_key(conversation).await?.fingerprint())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn cipher() -> (tempfile::TempDir, Arc<ChannelCipher>) {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = Store::open(&dir.path().join("keys.db")).await.expect("open store");
        (dir, Arc::new(ChannelCipher::new(store)))
    }

    #[tokio::test]
    async fn round_trip() {
        let (_dir, cipher) = cipher().await;
        let conv = ConversationId(1);

        let envelope = cipher.encrypt("hello", conv).await.unwrap();
        assert!(envelope.is_confidential());
        assert_eq!(cipher.decrypt(&envelope, conv).await, Decrypted::Confidential("hello".into()));
    }

    #[tokio::test]
    async fn key_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keys.db");

        let envelope = {
            let store = Store::open(&path).await.unwrap();
            let cipher = ChannelCipher::new(store);
            cipher.encrypt("persisted", ConversationId(4)).await.unwrap()
        };

        // Fresh cipher over the same store: must load, not regenerate.
        let store = Store::open(&path).await.unwrap();
        let cipher = ChannelCipher::new(store);
        assert_eq!(
            cipher.decrypt(&envelope, ConversationId(4)).await,
            Decrypted::Confidential("persisted".into())
        );
    }

    #[tokio::test]
    async fn concurrent_first_use_creates_exactly_one_key() {
        let (_dir, cipher) = cipher().await;
        let conv = ConversationId(77);

        let (a, b) = tokio::join!(
            cipher.get_or_create_thread_key(conv),
            cipher.get_or_create_thread_key(conv),
        );
        let (a, b) = (a.unwrap(), b.unwrap());

        assert_eq!(a.as_bytes(), b.as_bytes(), "both callers must resolve to the same key");
        assert_eq!(a.fingerprint(), cipher.key_fingerprint(conv).await.unwrap());
    }

    #[tokio::test]
    async fn unavailable_backend_falls_back_to_version_zero() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(&dir.path().join("keys.db")).await.unwrap();
        let cipher = ChannelCipher::with_availability(store, CryptoAvailability::Disabled);
        let conv = ConversationId(2);

        let envelope = cipher.encrypt("visible", conv).await.unwrap();
        assert!(!envelope.is_confidential(), "fallback must be distinguishable");
        assert_eq!(envelope.version(), 0);

        // The encoding reverses exactly; no data loss.
        assert_eq!(cipher.decrypt(&envelope, conv).await, Decrypted::Unprotected("visible".into()));
    }

    #[tokio::test]
    async fn corruption_yields_the_placeholder_not_a_panic() {
        let (_dir, cipher) = cipher().await;
        let conv = ConversationId(3);

        let envelope = cipher.encrypt("intact", conv).await.unwrap();
        let (ciphertext, nonce) = match &envelope {
            Envelope::Sealed { ciphertext, nonce } => (ciphertext.clone(), nonce.clone()),
            Envelope::Plain { .. } => unreachable!("backend is available"),
        };

        // Corrupted ciphertext.
        let corrupt = Envelope::Sealed {
            ciphertext: format!("{ciphertext}AA"),
            nonce: nonce.clone(),
        };
        assert!(cipher.decrypt(&corrupt, conv).await.is_failed());

        // Truncated nonce.
        let short_nonce = Envelope::Sealed {
            ciphertext: ciphertext.clone(),
            nonce: crate::codec::encode(&[0u8; 12]),
        };
        assert!(cipher.decrypt(&short_nonce, conv).await.is_failed());

        // Not even base64.
        let garbage = Envelope::Sealed {
            ciphertext: "!!!".into(),
            nonce,
        };
        let decrypted = cipher.decrypt(&garbage, conv).await;
        assert_eq!(decrypted.display_text(), DECRYPT_FAILED_PLACEHOLDER);
    }

    #[tokio::test]
    async fn wrong_key_yields_the_placeholder() {
        let (_dir_a, cipher_a) = cipher().await;
        let (_dir_b, cipher_b) = cipher().await;
        let conv = ConversationId(5);

        let envelope = cipher_a.encrypt("for a only", conv).await.unwrap();
        assert!(cipher_b.decrypt(&envelope, conv).await.is_failed());
    }

    #[tokio::test]
    async fn clearing_keys_removes_cache_and_persisted_copy() {
        let (_dir, cipher) = cipher().await;
        let conv = ConversationId(6);

        let before = cipher.key_fingerprint(conv).await.unwrap();
        cipher.clear_thread_key(conv).await.unwrap();

        // A new key is generated on next use.
        let after = cipher.key_fingerprint(conv).await.unwrap();
        assert_ne!(before, after, "cleared key must not resurface");

        cipher.encrypt("x", ConversationId(8)).await.unwrap();
        cipher.clear_all_keys().await.unwrap();
        let again = cipher.key_fingerprint(conv).await.unwrap();
        assert_ne!(after, again);
    }

    #[tokio::test]
    async fn nonces_never_repeat_across_calls() {
        let (_dir, cipher) = cipher().await;
        let conv = ConversationId(10);

        let first = cipher.encrypt("same text", conv).await.unwrap();
        let second = cipher.encrypt("same text", conv).await.unwrap();

        match (&first, &second) {
            (
                Envelope::Sealed { ciphertext: c1, nonce: n1 },
                Envelope::Sealed { ciphertext: c2, nonce: n2 },
            ) => {
                assert_ne!(n1, n2, "fresh randomness per call");
                assert_ne!(c1, c2);
            }
            _ => unreachable!("backend is available"),
        }
    }
}
