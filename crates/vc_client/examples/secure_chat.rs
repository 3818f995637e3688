//! Minimal wiring example: initialise logging, open the local key store,
//! ensure a device identity, and run one secure conversation.
//!
//! `VEILCHAT_API_URL` / `VEILCHAT_WS_HOST` select the backend; the
//! defaults point at a local development server.

use std::path::Path;
use std::sync::Arc;

use vc_client::{
    ChannelCipher, ClientConfig, ConversationSession, KeyManager, ProfileApi, SecureTransport,
};
use vc_proto::{ConversationId, EventKind, PeerUserId};
use vc_store::Store;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "vc_client=info,vc_store=info".into()),
        )
        .init();

    let cfg = ClientConfig::from_env();
    let store = Store::open(Path::new("veilchat-keys.db")).await?;

    let api = ProfileApi::new(cfg.api_base_url.clone());
    let keys = Arc::new(KeyManager::new(store.clone(), Arc::new(api.clone())));
    keys.ensure_identity().await?;

    let session = ConversationSession::new(
        ConversationId(42),
        PeerUserId(7),
        keys,
        Arc::new(ChannelCipher::new(store)),
        SecureTransport::new(cfg),
    )
    .with_history_api(api);

    let _messages = session.transport().on(EventKind::ChatMessage, |event| {
        tracing::info!(?event, "inbound chat frame");
    });

    session.connect();
    // Queued in the outbox until the channel comes up, then replayed.
    session.send_secure("hello from veilchat").await?;

    tokio::signal::ctrl_c().await?;
    session.close().await;
    Ok(())
}
