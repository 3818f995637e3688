//! Database access over SQLite via sqlx.

use std::path::Path;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool};
use tracing::debug;

use vc_proto::ConversationId;

use crate::{error::StoreError, models::IdentityRecord};

/// Central store handle. Cheap to clone (the pool is Arc internally).
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Open (or create) the SQLite database at `db_path` and run pending
    /// migrations.
    ///
    /// WAL journal mode and foreign-key enforcement are configured at
    /// connection time here, not inside a migration: SQLite forbids
    /// changing `journal_mode` inside a transaction and sqlx wraps every
    /// migration in one.
    pub async fn open(db_path: &Path) -> Result<Self, StoreError> {
        let opts = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true);

        let pool = SqlitePool::connect_with(opts).await?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| StoreError::Migration(e.to_string()))?;

        debug!(path = %db_path.display(), "key store opened");
        Ok(Self { pool })
    }

    // ── Device identity ──────────────────────────────────────────────────────

    pub async fn load_identity(&self) -> Result<Option<IdentityRecord>, StoreError> {
        let row = sqlx::query_as::<_, IdentityRecord>(
            "SELECT secret_key, public_key, published FROM device_identity WHERE id = 1",
        )
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    /// Persist a freshly generated identity. If another writer got there
    /// first the existing row wins and is returned, so concurrent
    /// first-run initialisation converges on a single key pair.
    pub async fn insert_identity(
        &self,
        secret_key: &str,
        public_key: &str,
        published: bool,
    ) -> Result<IdentityRecord, StoreError> {
        sqlx::query(
            "INSERT INTO device_identity (id, secret_key, public_key, published) \
             VALUES (1, ?, ?, ?) ON CONFLICT(id) DO NOTHING",
        )
        .bind(secret_key)
        .bind(public_key)
        .bind(published)
        .execute(&self.pool)
        .await?;

        self.load_identity()
            .await?
            .ok_or_else(|| StoreError::Corrupt("identity row missing after insert".into()))
    }

    pub async fn mark_identity_published(&self) -> Result<(), StoreError> {
        sqlx::query("UPDATE device_identity SET published = 1 WHERE id = 1")
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Device reset: drop the identity key pair.
    pub async fn delete_identity(&self) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM device_identity")
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // ── Thread keys ──────────────────────────────────────────────────────────

    pub async fn load_thread_key(
        &self,
        conversation: ConversationId,
    ) -> Result<Option<String>, StoreError> {
        let key = sqlx::query_scalar::<_, String>(
            "SELECT key_material FROM thread_keys WHERE conversation_id = ?",
        )
        .bind(conversation.0 as i64)
        .fetch_optional(&self.pool)
        .await?;
        Ok(key)
    }

    /// Persist a thread key unless one already exists; returns whichever
    /// key ends up stored. Racing first-use writers both observe the same
    /// winning key, never two divergent persisted keys.
    pub async fn insert_thread_key(
        &self,
        conversation: ConversationId,
        key_b64: &str,
    ) -> Result<String, StoreError> {
        sqlx::query(
            "INSERT INTO thread_keys (conversation_id, key_material) \
             VALUES (?, ?) ON CONFLICT(conversation_id) DO NOTHING",
        )
        .bind(conversation.0 as i64)
        .bind(key_b64)
        .execute(&self.pool)
        .await?;

        self.load_thread_key(conversation).await?.ok_or_else(|| {
            StoreError::Corrupt(format!("thread key missing after insert for {conversation}"))
        })
    }

    pub async fn delete_thread_key(&self, conversation: ConversationId) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM thread_keys WHERE conversation_id = ?")
            .bind(conversation.0 as i64)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn delete_all_thread_keys(&self) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM thread_keys")
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn thread_key_count(&self) -> Result<i64, StoreError> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM thread_keys")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn open_temp() -> (tempfile::TempDir, Store) {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = Store::open(&dir.path().join("keys.db")).await.expect("open store");
        (dir, store)
    }

    #[tokio::test]
    async fn identity_insert_keeps_the_first_writer() {
        let (_dir, store) = open_temp().await;

        assert!(store.load_identity().await.unwrap().is_none());

        let first = store.insert_identity("sec-a", "pub-a", false).await.unwrap();
        let second = store.insert_identity("sec-b", "pub-b", true).await.unwrap();

        assert_eq!(first.secret_key, "sec-a");
        assert_eq!(second.secret_key, "sec-a", "existing identity must never be replaced");
        assert!(!second.published);
    }

    #[tokio::test]
    async fn identity_publish_flag_round_trips() {
        let (_dir, store) = open_temp().await;

        store.insert_identity("sec", "pub", false).await.unwrap();
        store.mark_identity_published().await.unwrap();

        let record = store.load_identity().await.unwrap().unwrap();
        assert!(record.published);
    }

    #[tokio::test]
    async fn thread_key_insert_converges_on_one_key() {
        let (_dir, store) = open_temp().await;
        let conv = ConversationId(7);

        let a = store.insert_thread_key(conv, "key-a").await.unwrap();
        let b = store.insert_thread_key(conv, "key-b").await.unwrap();

        assert_eq!(a, "key-a");
        assert_eq!(b, "key-a", "second writer must observe the winning key");
        assert_eq!(store.thread_key_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn thread_keys_are_independent_per_conversation() {
        let (_dir, store) = open_temp().await;

        store.insert_thread_key(ConversationId(1), "one").await.unwrap();
        store.insert_thread_key(ConversationId(2), "two").await.unwrap();

        assert_eq!(store.load_thread_key(ConversationId(1)).await.unwrap().as_deref(), Some("one"));
        assert_eq!(store.load_thread_key(ConversationId(2)).await.unwrap().as_deref(), Some("two"));

        store.delete_thread_key(ConversationId(1)).await.unwrap();
        assert!(store.load_thread_key(ConversationId(1)).await.unwrap().is_none());
        assert_eq!(store.thread_key_count().await.unwrap(), 1);

        store.delete_all_thread_keys().await.unwrap();
        assert_eq!(store.thread_key_count().await.unwrap(), 0);
    }
}
