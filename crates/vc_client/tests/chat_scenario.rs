//! End-to-end scenario against a real in-process WebSocket server:
//! open a conversation, send, receive the echo, survive an abrupt drop,
//! and run the full encrypt -> transport -> decrypt path.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use futures::{SinkExt, StreamExt};
use serde_json::{Map, Value};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};
use tokio_tungstenite::accept_async;

use vc_client::{
    ChannelCipher, ChatError, ClientConfig, ConversationSession, Decrypted, KeyDirectory,
    KeyManager, LinkState, SecureTransport, TransportEvent,
};
use vc_proto::{ConversationId, Envelope, EventKind, MessageKind, PeerUserId, ServerFrame};
use vc_store::Store;

/// Echo server: every text frame comes straight back, except frames
/// containing "force_drop", which kill the connection abruptly.
async fn spawn_echo_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            tokio::spawn(async move {
                let Ok(mut ws) = accept_async(stream).await else {
                    return;
                };
                while let Some(Ok(message)) = ws.next().await {
                    if !message.is_text() {
                        continue;
                    }
                    if message.to_text().map(|t| t.contains("force_drop")).unwrap_or(false) {
                        return; // abrupt close, no handshake
                    }
                    if ws.send(message).await.is_err() {
                        break;
                    }
                }
            });
        }
    });
    addr
}

fn config_for(addr: SocketAddr) -> ClientConfig {
    ClientConfig {
        realtime_host: addr.to_string(),
        realtime_tls: false,
        reconnect_base: Duration::from_millis(50),
        ..ClientConfig::default()
    }
}

/// In-memory stand-in for the profile key endpoints.
#[derive(Default)]
struct DirectoryState {
    keys: Mutex<HashMap<PeerUserId, String>>,
}

struct InMemoryDirectory {
    state: Arc<DirectoryState>,
    me: PeerUserId,
}

impl KeyDirectory for InMemoryDirectory {
    fn fetch_peer_key(&self, peer: PeerUserId) -> BoxFuture<'_, Result<Option<String>, ChatError>> {
        Box::pin(async move { Ok(self.state.keys.lock().unwrap().get(&peer).cloned()) })
    }

    fn publish_key<'a>(&'a self, public_key_b64: &'a str) -> BoxFuture<'a, Result<(), ChatError>> {
        Box::pin(async move {
            self.state
                .keys
                .lock()
                .unwrap()
                .insert(self.me, public_key_b64.to_owned());
            Ok(())
        })
    }
}

async fn key_manager_for(
    state: &Arc<DirectoryState>,
    me: u64,
) -> (tempfile::TempDir, Arc<KeyManager>, Store) {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = Store::open(&dir.path().join("keys.db")).await.expect("open store");
    let manager = Arc::new(KeyManager::new(
        store.clone(),
        Arc::new(InMemoryDirectory {
            state: state.clone(),
            me: PeerUserId(me),
        }),
    ));
    manager.ensure_identity().await.expect("identity");
    (dir, manager, store)
}

#[tokio::test]
async fn open_send_echo_and_recover_from_an_abrupt_drop() {
    let addr = spawn_echo_server().await;
    let transport = SecureTransport::new(config_for(addr));

    let (connected_tx, mut connected_rx) = mpsc::unbounded_channel();
    let _sub_connected = transport.on(EventKind::Connected, move |_| {
        let _ = connected_tx.send(());
    });

    let fired = Arc::new(AtomicU32::new(0));
    let (message_tx, mut message_rx) = mpsc::unbounded_channel();
    let _sub_chat = {
        let fired = fired.clone();
        transport.on(EventKind::ChatMessage, move |event| {
            fired.fetch_add(1, Ordering::SeqCst);
            if let TransportEvent::Frame(ServerFrame::ChatMessage(payload)) = event {
                let _ = message_tx.send(payload.message.clone());
            }
        })
    };

    // Open conversation 42.
    transport.connect(ConversationId(42));
    timeout(Duration::from_secs(5), connected_rx.recv())
        .await
        .expect("connect timed out")
        .expect("connected event");
    assert_eq!(transport.state(), LinkState::Connected);

    // Send "hi"; the server echoes it back as a chat_message frame.
    transport
        .send(Value::from("hi"), MessageKind::Text, Map::new())
        .expect("send");
    let echoed = timeout(Duration::from_secs(5), message_rx.recv())
        .await
        .expect("echo timed out")
        .expect("echoed message");
    assert_eq!(echoed, Value::from("hi"));

    sleep(Duration::from_millis(200)).await;
    assert_eq!(fired.load(Ordering::SeqCst), 1, "subscriber must fire exactly once");

    // Abrupt drop: the server kills the socket without a close handshake.
    let mut metadata = Map::new();
    metadata.insert("force_drop".into(), Value::from(true));
    transport
        .send(Value::from("bye"), MessageKind::Text, metadata)
        .expect("send drop trigger");

    // Automatic reconnect after the base delay.
    timeout(Duration::from_secs(5), connected_rx.recv())
        .await
        .expect("reconnect timed out")
        .expect("reconnected event");
    assert_eq!(transport.state(), LinkState::Connected);
    assert_eq!(transport.reconnect_attempts(), 0, "counter resets after reconnect");

    // The channel still works after recovery.
    transport
        .send(Value::from("back"), MessageKind::Text, Map::new())
        .expect("send after reconnect");
    let after = timeout(Duration::from_secs(5), message_rx.recv())
        .await
        .expect("post-reconnect echo timed out")
        .expect("echoed message");
    assert_eq!(after, Value::from("back"));
}

#[tokio::test]
async fn explicit_disconnect_stays_down() {
    let addr = spawn_echo_server().await;
    let transport = SecureTransport::new(config_for(addr));

    let (connected_tx, mut connected_rx) = mpsc::unbounded_channel();
    let _sub = transport.on(EventKind::Connected, move |_| {
        let _ = connected_tx.send(());
    });

    transport.connect(ConversationId(1));
    timeout(Duration::from_secs(5), connected_rx.recv())
        .await
        .expect("connect timed out")
        .expect("connected event");

    transport.disconnect();
    assert_eq!(transport.state(), LinkState::Disconnected);

    // No automatic reconnection after an explicit disconnect.
    sleep(Duration::from_millis(400)).await;
    assert!(connected_rx.try_recv().is_err());
    assert_eq!(transport.state(), LinkState::Disconnected);
}

#[tokio::test]
async fn session_round_trips_an_encrypted_message_over_the_wire() {
    let addr = spawn_echo_server().await;
    let directory = Arc::new(DirectoryState::default());

    // Two devices, each with its own store and identity.
    let (_tmp_a, alice_keys, alice_store) = key_manager_for(&directory, 1).await;
    let (_tmp_b, bob_keys, bob_store) = key_manager_for(&directory, 2).await;

    let conversation = ConversationId(42);
    let alice = ConversationSession::new(
        conversation,
        PeerUserId(2),
        alice_keys,
        Arc::new(ChannelCipher::new(alice_store)),
        SecureTransport::new(config_for(addr)),
    );
    let bob = ConversationSession::new(
        conversation,
        PeerUserId(1),
        bob_keys,
        Arc::new(ChannelCipher::new(bob_store)),
        SecureTransport::new(config_for(addr)),
    );

    let (connected_tx, mut connected_rx) = mpsc::unbounded_channel();
    let _sub_connected = alice.transport().on(EventKind::Connected, move |_| {
        let _ = connected_tx.send(());
    });
    let (envelope_tx, mut envelope_rx) = mpsc::unbounded_channel();
    let _sub_chat = alice.transport().on(EventKind::ChatMessage, move |event| {
        if let TransportEvent::Frame(ServerFrame::ChatMessage(payload)) = event {
            let _ = envelope_tx.send(payload.message.clone());
        }
    });

    alice.connect();
    timeout(Duration::from_secs(5), connected_rx.recv())
        .await
        .expect("connect timed out")
        .expect("connected event");

    // Canonical scheme: both peers have published keys.
    let scheme = alice.send_secure("the falcon lands at dawn").await.expect("send");
    assert_eq!(scheme, vc_client::SchemeUsed::SharedSecret);

    // The wire carries an opaque envelope, not the plaintext.
    let wire_message = timeout(Duration::from_secs(5), envelope_rx.recv())
        .await
        .expect("echo timed out")
        .expect("envelope");
    let json = serde_json::to_string(&wire_message).unwrap();
    assert!(!json.contains("falcon"), "plaintext must not appear on the wire");

    // Bob's side of the conversation decrypts it.
    let envelope: Envelope = serde_json::from_value(wire_message).expect("typed envelope");
    assert!(envelope.is_confidential());
    assert_eq!(
        bob.decrypt_incoming(&envelope).await,
        Decrypted::Confidential("the falcon lands at dawn".into())
    );

    alice.close().await;
    assert_eq!(alice.transport().state(), LinkState::Disconnected);
}
