//! Reconnecting realtime channel, one instance per open conversation.
//!
//! State machine: `Disconnected -> Connecting -> Connected`. An abnormal
//! close schedules a reconnect after `base * 2^attempt` up to the
//! configured cap; the counter resets on any successful connection.
//! Explicit `disconnect()` (or dropping the transport) cancels any
//! pending retry. Outbound frames sent while the link is down land in a
//! bounded outbox and are replayed in order on the next connect; a full
//! outbox pushes back instead of dropping silently.

pub mod dialer;

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use futures::{SinkExt, StreamExt};
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use vc_proto::{ClientFrame, ConversationId, EventKind, MessageKind, ServerFrame};

use crate::{config::ClientConfig, error::ChatError};

use self::dialer::{Dialer, WsDialer};

/// Connection lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
}

/// Event delivered to subscribers.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    Connected { conversation: ConversationId },
    /// `will_retry` is false once the attempt cap is reached or the
    /// caller disconnected; a new `connect()` is then required.
    Disconnected { will_retry: bool },
    Frame(ServerFrame),
}

impl TransportEvent {
    fn kind(&self) -> EventKind {
        match self {
            TransportEvent::Connected { .. } => EventKind::Connected,
            TransportEvent::Disconnected { .. } => EventKind::Disconnected,
            TransportEvent::Frame(frame) => frame.kind(),
        }
    }
}

type Callback = Arc<dyn Fn(&TransportEvent) + Send + Sync>;

/// Handle returned by [`SecureTransport::on`]; pass to [`SecureTransport::off`]
/// to unsubscribe. Unsubscribing twice is a no-op.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    id: u64,
    kind: EventKind,
}

struct Link {
    state: LinkState,
    conversation: Option<ConversationId>,
    attempts: u32,
    exhausted: bool,
    /// Guards against a stale connection task mutating state after an
    /// explicit disconnect or a conversation switch.
    epoch: u64,
    writer: Option<mpsc::UnboundedSender<String>>,
    task: Option<JoinHandle<()>>,
}

struct Shared {
    cfg: ClientConfig,
    dialer: Arc<dyn Dialer>,
    link: Mutex<Link>,
    subscribers: Mutex<HashMap<EventKind, Vec<(u64, Callback)>>>,
    outbox: Mutex<VecDeque<ClientFrame>>,
    next_subscription: AtomicU64,
}

impl Shared {
    fn lock_link(&self) -> MutexGuard<'_, Link> {
        self.link.lock().unwrap_or_else(|poisoned| {
            warn!("transport link mutex poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn lock_subscribers(&self) -> MutexGuard<'_, HashMap<EventKind, Vec<(u64, Callback)>>> {
        self.subscribers.lock().unwrap_or_else(|poisoned| {
            warn!("transport subscriber mutex poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn lock_outbox(&self) -> MutexGuard<'_, VecDeque<ClientFrame>> {
        self.outbox.lock().unwrap_or_else(|poisoned| {
            warn!("transport outbox mutex poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Abort the connection task (cancelling any pending backoff sleep)
    /// and drop the writer. Callers must not hold the lock across
    /// dispatches.
    fn teardown(link: &mut Link) {
        if let Some(task) = link.task.take() {
            task.abort();
        }
        link.writer = None;
        link.state = LinkState::Disconnected;
    }

    fn dispatch(&self, event: &TransportEvent) {
        let callbacks: Vec<Callback> = {
            let subscribers = self.lock_subscribers();
            subscribers
                .get(&event.kind())
                .map(|list| list.iter().map(|(_, cb)| cb.clone()).collect())
                .unwrap_or_default()
        };
        for callback in callbacks {
            callback(event);
        }
    }
}

/// Resilient realtime delivery channel.
pub struct SecureTransport {
    shared: Arc<Shared>,
}

impl SecureTransport {
    pub fn new(cfg: ClientConfig) -> Self {
        Self::with_dialer(cfg, Arc::new(WsDialer))
    }

    pub fn with_dialer(cfg: ClientConfig, dialer: Arc<dyn Dialer>) -> Self {
        Self {
            shared: Arc::new(Shared {
                cfg,
                dialer,
                link: Mutex::new(Link {
                    state: LinkState::Disconnected,
                    conversation: None,
                    attempts: 0,
                    exhausted: false,
                    epoch: 0,
                    writer: None,
                    task: None,
                }),
                subscribers: Mutex::new(HashMap::new()),
                outbox: Mutex::new(VecDeque::new()),
                next_subscription: AtomicU64::new(1),
            }),
        }
    }

    pub fn state(&self) -> LinkState {
        self.shared.lock_link().state
    }

    pub fn conversation(&self) -> Option<ConversationId> {
        self.shared.lock_link().conversation
    }

    /// Reconnect attempts since the last successful connection.
    pub fn reconnect_attempts(&self) -> u32 {
        self.shared.lock_link().attempts
    }

    /// Open the realtime channel for a conversation. A no-op when already
    /// connected (or connecting) to the same conversation; switching
    /// conversations tears the old link down first.
    pub fn connect(&self, conversation: ConversationId) {
        let mut link = self.shared.lock_link();
        if link.conversation == Some(conversation) && link.state != LinkState::Disconnected {
            return;
        }
        if let Some(task) = link.task.take() {
            task.abort();
        }
        link.writer = None;
        link.conversation = Some(conversation);
        link.state = LinkState::Connecting;
        link.attempts = 0;
        link.exhausted = false;
        link.epoch += 1;
        let epoch = link.epoch;
        link.task = Some(tokio::spawn(run_link(self.shared.clone(), conversation, epoch)));
    }

    /// Close the channel and cancel any pending reconnect. Automatic
    /// retries stop until the next explicit `connect()`.
    pub fn disconnect(&self) {
        {
            let mut link = self.shared.lock_link();
            if link.conversation.is_none() && link.state == LinkState::Disconnected {
                return;
            }
            Shared::teardown(&mut link);
            link.conversation = None;
            link.epoch += 1;
        }
        self.shared.dispatch(&TransportEvent::Disconnected { will_retry: false });
    }

    /// Frame and send a chat message. While disconnected the frame joins
    /// the bounded outbox and is replayed on the next successful connect;
    /// a full outbox rejects the send instead of dropping it.
    pub fn send(
        &self,
        message: Value,
        kind: MessageKind,
        metadata: Map<String, Value>,
    ) -> Result<(), ChatError> {
        self.send_frame(ClientFrame::ChatMessage {
            message,
            message_type: kind,
            metadata,
        })
    }

    /// Send a typing indicator. Never queued: a stale typing signal is
    /// worse than none.
    pub fn send_typing(&self) {
        if let Err(e) = self.try_send_now(ClientFrame::Typing) {
            debug!("typing indicator dropped: {e}");
        }
    }

    pub fn send_read_receipt(&self, message_ids: Vec<u64>) -> Result<(), ChatError> {
        self.send_frame(ClientFrame::ReadReceipt { message_ids })
    }

    /// Send or enqueue a frame (see [`send`](Self::send)).
    pub fn send_frame(&self, frame: ClientFrame) -> Result<(), ChatError> {
        {
            let link = self.shared.lock_link();
            if link.state == LinkState::Connected {
                if let Some(writer) = &link.writer {
                    let text = frame.to_json()?;
                    if writer.send(text).is_ok() {
                        return Ok(());
                    }
                    // Writer task just died; fall through to the outbox.
                }
            }
        }

        let mut outbox = self.shared.lock_outbox();
        if outbox.len() >= self.shared.cfg.outbox_capacity {
            warn!("outbox full, rejecting outbound frame");
            return Err(ChatError::OutboxFull {
                capacity: self.shared.cfg.outbox_capacity,
            });
        }
        outbox.push_back(frame);
        Ok(())
    }

    /// Send only if currently connected; never queues. The strict variant
    /// for callers that prefer an immediate failure over buffering.
    pub fn try_send_now(&self, frame: ClientFrame) -> Result<(), ChatError> {
        let text = frame.to_json()?;
        let link = self.shared.lock_link();
        match (link.state, &link.writer) {
            (LinkState::Connected, Some(writer)) => {
                writer.send(text).map_err(|_| ChatError::TransportUnavailable)
            }
            _ if link.exhausted => Err(ChatError::ReconnectExhausted {
                attempts: link.attempts,
            }),
            _ => Err(ChatError::TransportUnavailable),
        }
    }

    /// Frames waiting for the next successful connect.
    pub fn outbox_len(&self) -> usize {
        self.shared.lock_outbox().len()
    }

    /// Register a callback for an event kind. Multiple subscribers per
    /// kind are supported; callbacks run on the transport's read task and
    /// must not block.
    pub fn on(
        &self,
        kind: EventKind,
        callback: impl Fn(&TransportEvent) + Send + Sync + 'static,
    ) -> Subscription {
        let id = self.shared.next_subscription.fetch_add(1, Ordering::Relaxed);
        self.shared
            .lock_subscribers()
            .entry(kind.clone())
            .or_default()
            .push((id, Arc::new(callback)));
        Subscription { id, kind }
    }

    /// Remove a subscription. Safe to call repeatedly.
    pub fn off(&self, subscription: &Subscription) {
        let mut subscribers = self.shared.lock_subscribers();
        if let Some(list) = subscribers.get_mut(&subscription.kind) {
            list.retain(|(id, _)| *id != subscription.id);
        }
    }
}

impl Drop for SecureTransport {
    fn drop(&mut self) {
        let mut link = self.shared.lock_link();
        Shared::teardown(&mut link);
        link.epoch += 1;
    }
}

/// Connection supervisor: dial, pump, and reconnect with backoff until
/// the epoch moves on or the attempt cap is hit.
async fn run_link(shared: Arc<Shared>, conversation: ConversationId, epoch: u64) {
    let url = shared.cfg.ws_url(conversation);
    loop {
        match shared.dialer.dial(url.clone()).await {
            Ok((mut sink, mut stream)) => {
                let (writer_tx, mut writer_rx) = mpsc::unbounded_channel::<String>();
                {
                    let mut link = shared.lock_link();
                    if link.epoch != epoch {
                        return;
                    }
                    link.state = LinkState::Connected;
                    link.attempts = 0;
                    link.exhausted = false;
                    link.writer = Some(writer_tx);
                }
                info!(%conversation, "realtime channel connected");
                shared.dispatch(&TransportEvent::Connected { conversation });

                replay_outbox(&shared, &mut sink).await;

                loop {
                    tokio::select! {
                        outbound = writer_rx.recv() => {
                            match outbound {
                                Some(text) => {
                                    if let Err(e) = sink.send(text).await {
                                        warn!("socket write failed: {e}");
                                        break;
                                    }
                                }
                                None => break,
                            }
                        }
                        inbound = stream.next() => {
                            match inbound {
                                Some(Ok(text)) => handle_frame(&shared, &text),
                                Some(Err(e)) => {
                                    warn!("socket read failed: {e}");
                                    break;
                                }
                                None => {
                                    info!(%conversation, "server closed the connection");
                                    break;
                                }
                            }
                        }
                    }
                }
            }
            Err(e) => {
                warn!(%conversation, "connect failed: {e}");
            }
        }

        // The session is over; decide whether to retry.
        let delay = {
            let mut link = shared.lock_link();
            if link.epoch != epoch {
                return;
            }
            link.writer = None;
            link.state = LinkState::Disconnected;
            if link.attempts >= shared.cfg.max_reconnect_attempts {
                link.exhausted = true;
                let attempts = link.attempts;
                drop(link);
                warn!(%conversation, attempts, "reconnect attempts exhausted, staying disconnected");
                shared.dispatch(&TransportEvent::Disconnected { will_retry: false });
                return;
            }
            let delay = shared.cfg.reconnect_base * 2u32.saturating_pow(link.attempts);
            link.attempts += 1;
            delay
        };

        shared.dispatch(&TransportEvent::Disconnected { will_retry: true });
        debug!(%conversation, ?delay, "scheduling reconnect");
        tokio::time::sleep(delay).await;

        {
            let mut link = shared.lock_link();
            if link.epoch != epoch {
                return;
            }
            link.state = LinkState::Connecting;
        }
    }
}

/// Replay queued frames in order. Frames that cannot be written (the
/// connection died again) go back to the front of the outbox.
async fn replay_outbox(shared: &Shared, sink: &mut dialer::FrameSink) {
    let mut pending: VecDeque<ClientFrame> = {
        let mut outbox = shared.lock_outbox();
        outbox.drain(..).collect()
    };
    if pending.is_empty() {
        return;
    }
    debug!(count = pending.len(), "replaying outbox");

    while let Some(frame) = pending.pop_front() {
        let text = match frame.to_json() {
            Ok(text) => text,
            Err(e) => {
                warn!("dropping unserialisable outbox frame: {e}");
                continue;
            }
        };
        if let Err(e) = sink.send(text).await {
            warn!("outbox replay interrupted: {e}");
            pending.push_front(frame);
            break;
        }
    }

    if !pending.is_empty() {
        let mut outbox = shared.lock_outbox();
        while let Some(frame) = pending.pop_back() {
            outbox.push_front(frame);
        }
    }
}

fn handle_frame(shared: &Shared, text: &str) {
    match ServerFrame::parse(text) {
        Ok(frame) => shared.dispatch(&TransportEvent::Frame(frame)),
        Err(e) => warn!("dropping malformed frame: {e}"),
    }
}
