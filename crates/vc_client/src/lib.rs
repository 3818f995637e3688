//! vc_client — the Veilchat secure realtime messaging core
//!
//! Three components, bottom-up:
//! - [`KeyManager`] — device identity lifecycle and pairwise ECDH
//!   conversation secrets
//! - [`ChannelCipher`] — per-conversation symmetric keys with an
//!   explicitly marked version-0 fallback
//! - [`SecureTransport`] — reconnecting realtime channel with exponential
//!   backoff, a bounded outbox, and typed event dispatch
//!
//! [`ConversationSession`] wires the three together for one open
//! conversation. Rendering, REST CRUD for the rest of the platform, and
//! the backend services live elsewhere; this crate only owns the secure
//! messaging path.

pub mod api;
pub mod channel_cipher;
pub mod config;
pub mod error;
pub mod key_manager;
pub mod session;
pub mod transport;

mod codec;

pub use api::{KeyDirectory, ProfileApi};
pub use channel_cipher::{ChannelCipher, CryptoAvailability, Decrypted, DECRYPT_FAILED_PLACEHOLDER};
pub use config::ClientConfig;
pub use error::ChatError;
pub use key_manager::KeyManager;
pub use session::{ConversationSession, SchemeUsed};
pub use transport::{LinkState, SecureTransport, Subscription, TransportEvent};
