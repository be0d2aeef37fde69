//! Session mailbox store: a TTL-bounded key-value store with list append.
//!
//! Every signaling and relay artifact lives here. Entries expire on their
//! own, which stands in for an explicit "session closed" signal when a
//! phone walks away without cleaning up.
//!
//! Backends must make `put`, `take` and `append_list` atomic per key; the
//! relays never do a client-side read-modify-write.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use checkout_common::Role;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Mailbox namespaces. Each session owns at most one key per namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Namespace {
    Offer,
    Answer,
    Ice(Role),
    Barcode,
    VideoFrame,
    /// Phone has joined the session.
    Peer,
    /// Session was torn down explicitly.
    Closed,
}

impl Namespace {
    /// Namespaces removed when a session is torn down.
    pub const SESSION_SCOPED: [Namespace; 7] = [
        Namespace::Offer,
        Namespace::Answer,
        Namespace::Ice(Role::Web),
        Namespace::Ice(Role::Phone),
        Namespace::Barcode,
        Namespace::VideoFrame,
        Namespace::Peer,
    ];
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Namespace::Offer => f.write_str("offer"),
            Namespace::Answer => f.write_str("answer"),
            Namespace::Ice(role) => write!(f, "ice:{role}"),
            Namespace::Barcode => f.write_str("barcode"),
            Namespace::VideoFrame => f.write_str("video-frame"),
            Namespace::Peer => f.write_str("peer"),
            Namespace::Closed => f.write_str("closed"),
        }
    }
}

/// `(namespace, session)` pair; rendered as `namespace:session` in storage.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MailboxKey {
    namespace: Namespace,
    session_id: String,
}

impl MailboxKey {
    pub fn new(namespace: Namespace, session_id: impl Into<String>) -> Self {
        Self {
            namespace,
            session_id: session_id.into(),
        }
    }

    pub fn namespace(&self) -> Namespace {
        self.namespace
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn storage_key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for MailboxKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.namespace, self.session_id)
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("store operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("failed to serialize value: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("corrupt value at {key}: {reason}")]
    Corrupt { key: String, reason: String },
}

impl StoreError {
    /// Backend faults that a polling reader may retry on its next tick.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Unavailable(_) | StoreError::Timeout(_))
    }

    pub(crate) fn corrupt(key: &MailboxKey, reason: impl fmt::Display) -> Self {
        StoreError::Corrupt {
            key: key.storage_key(),
            reason: reason.to_string(),
        }
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::Unavailable(err.to_string())
    }
}

impl From<sqlx::migrate::MigrateError> for StoreError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        StoreError::Unavailable(format!("migration failed: {err}"))
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait MailboxStore: Send + Sync + 'static {
    /// Store `value`, replacing whatever was at `key`, expiring after `ttl`.
    async fn put(&self, key: &MailboxKey, value: Value, ttl: Duration) -> StoreResult<()>;

    /// Current value, or `None` when missing or expired.
    async fn get(&self, key: &MailboxKey) -> StoreResult<Option<Value>>;

    /// Atomically read and remove a single value.
    async fn take(&self, key: &MailboxKey) -> StoreResult<Option<Value>>;

    /// Remove a value or list immediately.
    async fn delete(&self, key: &MailboxKey) -> StoreResult<()>;

    /// Append to the list at `key`. A `ttl` re-arms the expiry of the
    /// whole list, not just the new element.
    async fn append_list(
        &self,
        key: &MailboxKey,
        value: Value,
        ttl: Option<Duration>,
    ) -> StoreResult<()>;

    /// Every live element in append order; empty when the key is absent.
    async fn read_list(&self, key: &MailboxKey) -> StoreResult<Vec<Value>>;

    /// Drop expired entries. Returns how many were removed.
    async fn purge_expired(&self) -> StoreResult<usize>;

    fn backend_name(&self) -> &'static str;
}

pub type SharedStore = Arc<dyn MailboxStore>;

fn decode<T: DeserializeOwned>(key: &MailboxKey, value: Value) -> StoreResult<T> {
    serde_json::from_value(value).map_err(|e| StoreError::corrupt(key, e))
}

pub async fn put_json<T: Serialize + ?Sized>(
    store: &dyn MailboxStore,
    key: &MailboxKey,
    value: &T,
    ttl: Duration,
) -> StoreResult<()> {
    let value = serde_json::to_value(value)?;
    store.put(key, value, ttl).await
}

pub async fn get_json<T: DeserializeOwned>(
    store: &dyn MailboxStore,
    key: &MailboxKey,
) -> StoreResult<Option<T>> {
    store
        .get(key)
        .await?
        .map(|value| decode(key, value))
        .transpose()
}

pub async fn take_json<T: DeserializeOwned>(
    store: &dyn MailboxStore,
    key: &MailboxKey,
) -> StoreResult<Option<T>> {
    store
        .take(key)
        .await?
        .map(|value| decode(key, value))
        .transpose()
}

pub async fn append_json<T: Serialize + ?Sized>(
    store: &dyn MailboxStore,
    key: &MailboxKey,
    value: &T,
    ttl: Option<Duration>,
) -> StoreResult<()> {
    let value = serde_json::to_value(value)?;
    store.append_list(key, value, ttl).await
}

pub async fn read_list_json<T: DeserializeOwned>(
    store: &dyn MailboxStore,
    key: &MailboxKey,
) -> StoreResult<Vec<T>> {
    store
        .read_list(key)
        .await?
        .into_iter()
        .map(|value| decode(key, value))
        .collect()
}
