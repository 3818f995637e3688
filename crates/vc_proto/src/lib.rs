//! vc_proto — wire types, envelopes, and serialisation for Veilchat
//!
//! All on-wire types are JSON and versioned or type-tagged so the format
//! can evolve without breaking older peers.
//!
//! # Modules
//! - `envelope` — versioned encrypted message envelope
//! - `frame`    — realtime frames exchanged over the chat socket
//! - `api`      — REST request/response bodies shared with the backend
//! - `ids`      — identifier newtypes

pub mod api;
pub mod envelope;
pub mod frame;
pub mod ids;

mod error;

pub use envelope::{Envelope, WireEnvelope};
pub use error::ProtoError;
pub use frame::{ClientFrame, EventKind, MessageKind, ServerFrame};
pub use ids::{ConversationId, PeerUserId};
