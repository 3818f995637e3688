//! Row types.

use sqlx::FromRow;

/// The device's long-term identity as persisted locally.
///
/// `published` records whether the public half reached the backend;
/// a false value triggers a lazy re-publish on next use.
#[derive(Debug, Clone, FromRow)]
pub struct IdentityRecord {
    pub secret_key: String,
    pub public_key: String,
    pub published: bool,
}
