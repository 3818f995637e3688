//! Client configuration.

use std::time::Duration;

use vc_proto::ConversationId;

/// Connection and tuning knobs for the messaging core.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// REST base, e.g. "https://api.example.net/api".
    pub api_base_url: String,
    /// Realtime host (no scheme), e.g. "api.example.net".
    pub realtime_host: String,
    /// wss:// when true, ws:// for local development.
    pub realtime_tls: bool,
    /// First reconnect delay; doubles per attempt.
    pub reconnect_base: Duration,
    /// Automatic reconnect attempts before giving up.
    pub max_reconnect_attempts: u32,
    /// Outbound frames buffered while disconnected.
    pub outbox_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:8000/api".into(),
            realtime_host: "localhost:8000".into(),
            realtime_tls: false,
            reconnect_base: Duration::from_secs(1),
            max_reconnect_attempts: 5,
            outbox_capacity: 32,
        }
    }
}

impl ClientConfig {
    /// Read overrides from the environment, falling back to defaults.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Ok(url) = std::env::var("VEILCHAT_API_URL") {
            cfg.api_base_url = url;
        }
        if let Ok(host) = std::env::var("VEILCHAT_WS_HOST") {
            cfg.realtime_host = host;
        }
        if let Ok(tls) = std::env::var("VEILCHAT_WS_TLS") {
            cfg.realtime_tls = tls != "0";
        }
        if let Some(ms) = env_parse::<u64>("VEILCHAT_RECONNECT_BASE_MS") {
            cfg.reconnect_base = Duration::from_millis(ms);
        }
        if let Some(attempts) = env_parse("VEILCHAT_RECONNECT_ATTEMPTS") {
            cfg.max_reconnect_attempts = attempts;
        }
        if let Some(capacity) = env_parse("VEILCHAT_OUTBOX_CAPACITY") {
            cfg.outbox_capacity = capacity;
        }
        cfg
    }

    /// Realtime endpoint for one conversation.
    pub fn ws_url(&self, conversation: ConversationId) -> String {
        let scheme = if self.realtime_tls { "wss" } else { "ws" };
        format!("{}://{}/ws/chat/{}/", scheme, self.realtime_host, conversation)
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}
