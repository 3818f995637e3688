//! vc_store — durable local key storage for Veilchat
//!
//! Two logically separate namespaces, both scoped to the device profile
//! and never synced off-device by this core:
//! - `device_identity` — the long-term identity key pair (one row)
//! - `thread_keys`     — per-conversation symmetric keys
//!
//! Values are stored base64-encoded. At-rest protection is the device
//! profile boundary (the store path lives inside the per-user data
//! directory), matching the browser-profile scoping of the original
//! storage layer.
//!
//! # Migration
//! SQLx migrations in `migrations/` are run on open.

pub mod db;
pub mod error;
pub mod models;

pub use db::Store;
pub use error::StoreError;
