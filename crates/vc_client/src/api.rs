//! REST client for the backend profile and message endpoints.
//!
//! [`KeyDirectory`] is the seam the key manager talks through; production
//! code uses [`ProfileApi`] over reqwest, tests inject an in-memory
//! directory.

use futures::future::BoxFuture;

use vc_proto::{
    api::{OutgoingMessage, ProfileKeyUpdate, ProfileResponse},
    PeerUserId,
};

use crate::error::ChatError;

/// Backend key directory: where device public keys are published and
/// peers' keys are fetched from.
pub trait KeyDirectory: Send + Sync + 'static {
    /// Fetch a peer's published encryption key. `Ok(None)` means the peer
    /// has never initialised encryption.
    fn fetch_peer_key(&self, peer: PeerUserId) -> BoxFuture<'_, Result<Option<String>, ChatError>>;

    /// Publish this device's public key to the profile record.
    fn publish_key<'a>(&'a self, public_key_b64: &'a str) -> BoxFuture<'a, Result<(), ChatError>>;
}

/// Thin typed wrapper over the backend REST surface this core consumes.
#[derive(Clone)]
pub struct ProfileApi {
    http: reqwest::Client,
    base_url: String,
}

impl ProfileApi {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    /// Persist an encrypted message via REST for thread history. Realtime
    /// delivery goes over the socket.
    pub async fn post_message(&self, message: &OutgoingMessage) -> Result<(), ChatError> {
        self.http
            .post(format!("{}/chat/messages/", self.base_url))
            .json(message)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

impl KeyDirectory for ProfileApi {
    fn fetch_peer_key(&self, peer: PeerUserId) -> BoxFuture<'_, Result<Option<String>, ChatError>> {
        Box::pin(async move {
            let profile: ProfileResponse = self
                .http
                .get(format!("{}/profiles/{}/", self.base_url, peer))
                .send()
                .await?
                .error_for_status()?
                .json()
                .await?;
            Ok(profile.public_encryption_key.filter(|key| !key.is_empty()))
        })
    }

    fn publish_key<'a>(&'a self, public_key_b64: &'a str) -> BoxFuture<'a, Result<(), ChatError>> {
        Box::pin(async move {
            self.http
                .put(format!("{}/profiles/me/", self.base_url))
                .json(&ProfileKeyUpdate {
                    public_encryption_key: public_key_b64.to_owned(),
                })
                .send()
                .await?
                .error_for_status()?;
            Ok(())
        })
    }
}
