//! SQLite mailbox backend.
//!
//! Expiry is stored as absolute wall-clock milliseconds, so entries keep
//! their deadline across gateway restarts and every process sharing the
//! database file sees the same state. Reads filter on the deadline;
//! [`MailboxStore::purge_expired`] reclaims the rows.

use std::future::Future;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use checkout_common::helpers::now_ms;
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use tracing::info;

use super::{MailboxKey, MailboxStore, StoreError, StoreResult};

pub struct SqliteStore {
    pool: SqlitePool,
    op_timeout: Duration,
}

fn ttl_ms(ttl: Duration) -> i64 {
    i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX)
}

fn parse_value(key: &MailboxKey, raw: &str) -> StoreResult<Value> {
    serde_json::from_str(raw).map_err(|e| StoreError::corrupt(key, e))
}

fn pool_options(database_url: &str) -> SqlitePoolOptions {
    if database_url.contains(":memory:") {
        // Every connection to `sqlite::memory:` opens its own database, so the
        // single connection must never be recycled.
        SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
    } else {
        SqlitePoolOptions::new().max_connections(5)
    }
}

impl SqliteStore {
    /// Connect, creating the database file if needed, and run migrations.
    pub async fn connect(database_url: &str, op_timeout: Duration) -> StoreResult<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = pool_options(database_url).connect_with(options).await?;

        sqlx::migrate!("./migrations").run(&pool).await?;
        info!("connected to mailbox database");

        Ok(Self { pool, op_timeout })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn timed<T, F>(&self, fut: F) -> StoreResult<T>
    where
        F: Future<Output = Result<T, sqlx::Error>>,
    {
        match tokio::time::timeout(self.op_timeout, fut).await {
            Ok(result) => result.map_err(StoreError::from),
            Err(_) => Err(StoreError::Timeout(self.op_timeout)),
        }
    }

    async fn delete_all(&self, key: String) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM mailbox_values WHERE key = ?")
            .bind(&key)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM mailbox_lists WHERE key = ?")
            .bind(&key)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM mailbox_list_meta WHERE key = ?")
            .bind(&key)
            .execute(&mut *tx)
            .await?;
        tx.commit().await
    }

    async fn append_inner(
        &self,
        key: String,
        raw: String,
        expires_at_ms: Option<i64>,
        now: i64,
    ) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        // An expired list must not be revived by a late append.
        sqlx::query(
            "DELETE FROM mailbox_lists WHERE key = ?1 AND EXISTS (
                SELECT 1 FROM mailbox_list_meta
                WHERE key = ?1 AND expires_at_ms IS NOT NULL AND expires_at_ms <= ?2)",
        )
        .bind(&key)
        .bind(now)
        .execute(&mut *tx)
        .await?;
        sqlx::query(
            "DELETE FROM mailbox_list_meta
             WHERE key = ? AND expires_at_ms IS NOT NULL AND expires_at_ms <= ?",
        )
        .bind(&key)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        sqlx::query("INSERT INTO mailbox_lists (key, value) VALUES (?, ?)")
            .bind(&key)
            .bind(&raw)
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            "INSERT INTO mailbox_list_meta (key, expires_at_ms) VALUES (?, ?)
             ON CONFLICT(key) DO UPDATE SET
                expires_at_ms = COALESCE(excluded.expires_at_ms, mailbox_list_meta.expires_at_ms)",
        )
        .bind(&key)
        .bind(expires_at_ms)
        .execute(&mut *tx)
        .await?;

        tx.commit().await
    }

    async fn purge_inner(&self, now: i64) -> Result<usize, sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        let values = sqlx::query("DELETE FROM mailbox_values WHERE expires_at_ms <= ?")
            .bind(now)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        sqlx::query(
            "DELETE FROM mailbox_lists WHERE key IN (
                SELECT key FROM mailbox_list_meta
                WHERE expires_at_ms IS NOT NULL AND expires_at_ms <= ?)",
        )
        .bind(now)
        .execute(&mut *tx)
        .await?;
        let lists = sqlx::query(
            "DELETE FROM mailbox_list_meta WHERE expires_at_ms IS NOT NULL AND expires_at_ms <= ?",
        )
        .bind(now)
        .execute(&mut *tx)
        .await?
        .rows_affected();
        tx.commit().await?;
        Ok((values + lists) as usize)
    }
}

#[async_trait]
impl MailboxStore for SqliteStore {
    async fn put(&self, key: &MailboxKey, value: Value, ttl: Duration) -> StoreResult<()> {
        let raw = serde_json::to_string(&value)?;
        let expires_at_ms = now_ms().saturating_add(ttl_ms(ttl));
        self.timed(
            sqlx::query(
                "INSERT INTO mailbox_values (key, value, expires_at_ms) VALUES (?, ?, ?)
                 ON CONFLICT(key) DO UPDATE SET
                    value = excluded.value,
                    expires_at_ms = excluded.expires_at_ms",
            )
            .bind(key.storage_key())
            .bind(raw)
            .bind(expires_at_ms)
            .execute(&self.pool),
        )
        .await?;
        Ok(())
    }

    async fn get(&self, key: &MailboxKey) -> StoreResult<Option<Value>> {
        let raw: Option<String> = self
            .timed(
                sqlx::query_scalar::<_, String>(
                    "SELECT value FROM mailbox_values WHERE key = ? AND expires_at_ms > ?",
                )
                .bind(key.storage_key())
                .bind(now_ms())
                .fetch_optional(&self.pool),
            )
            .await?;
        raw.map(|raw| parse_value(key, &raw)).transpose()
    }

    async fn take(&self, key: &MailboxKey) -> StoreResult<Option<Value>> {
        // DELETE .. RETURNING keeps the read and the removal in one statement.
        let raw: Option<String> = self
            .timed(
                sqlx::query_scalar::<_, String>(
                    "DELETE FROM mailbox_values WHERE key = ? AND expires_at_ms > ? RETURNING value",
                )
                .bind(key.storage_key())
                .bind(now_ms())
                .fetch_optional(&self.pool),
            )
            .await?;
        raw.map(|raw| parse_value(key, &raw)).transpose()
    }

    async fn delete(&self, key: &MailboxKey) -> StoreResult<()> {
        self.timed(self.delete_all(key.storage_key())).await
    }

    async fn append_list(
        &self,
        key: &MailboxKey,
        value: Value,
        ttl: Option<Duration>,
    ) -> StoreResult<()> {
        let raw = serde_json::to_string(&value)?;
        let now = now_ms();
        let expires_at_ms = ttl.map(|ttl| now.saturating_add(ttl_ms(ttl)));
        self.timed(self.append_inner(key.storage_key(), raw, expires_at_ms, now))
            .await
    }

    async fn read_list(&self, key: &MailboxKey) -> StoreResult<Vec<Value>> {
        let rows: Vec<String> = self
            .timed(
                sqlx::query_scalar::<_, String>(
                    "SELECT l.value FROM mailbox_lists l
                     JOIN mailbox_list_meta m ON m.key = l.key
                     WHERE l.key = ? AND (m.expires_at_ms IS NULL OR m.expires_at_ms > ?)
                     ORDER BY l.seq ASC",
                )
                .bind(key.storage_key())
                .bind(now_ms())
                .fetch_all(&self.pool),
            )
            .await?;
        rows.iter().map(|raw| parse_value(key, raw)).collect()
    }

    async fn purge_expired(&self) -> StoreResult<usize> {
        self.timed(self.purge_inner(now_ms())).await
    }

    fn backend_name(&self) -> &'static str {
        "sqlite"
    }
}
