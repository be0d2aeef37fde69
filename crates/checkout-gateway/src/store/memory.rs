//! In-process mailbox backend for tests and single-node development.
//!
//! State does not survive a restart; use [`super::SqliteStore`] when the
//! gateway must keep mailboxes across restarts.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;
use tokio::time::Instant;

use super::{MailboxKey, MailboxStore, StoreError, StoreResult};

#[derive(Debug)]
enum Slot {
    Value(Value),
    List(Vec<Value>),
}

#[derive(Debug)]
struct Entry {
    slot: Slot,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |deadline| now < deadline)
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, Entry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .read()
            .await
            .values()
            .filter(|entry| entry.is_live(now))
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl MailboxStore for MemoryStore {
    async fn put(&self, key: &MailboxKey, value: Value, ttl: Duration) -> StoreResult<()> {
        let entry = Entry {
            slot: Slot::Value(value),
            expires_at: Some(Instant::now() + ttl),
        };
        self.entries.write().await.insert(key.storage_key(), entry);
        Ok(())
    }

    async fn get(&self, key: &MailboxKey) -> StoreResult<Option<Value>> {
        let now = Instant::now();
        let guard = self.entries.read().await;
        match guard.get(&key.storage_key()) {
            Some(entry) if entry.is_live(now) => match &entry.slot {
                Slot::Value(value) => Ok(Some(value.clone())),
                Slot::List(_) => Err(StoreError::corrupt(key, "expected a value, found a list")),
            },
            _ => Ok(None),
        }
    }

    async fn take(&self, key: &MailboxKey) -> StoreResult<Option<Value>> {
        let now = Instant::now();
        let mut guard = self.entries.write().await;
        let storage_key = key.storage_key();
        match guard.get(&storage_key) {
            None => return Ok(None),
            Some(entry) if !entry.is_live(now) => {
                guard.remove(&storage_key);
                return Ok(None);
            }
            Some(Entry {
                slot: Slot::List(_),
                ..
            }) => return Err(StoreError::corrupt(key, "expected a value, found a list")),
            Some(_) => {}
        }
        match guard.remove(&storage_key) {
            Some(Entry {
                slot: Slot::Value(value),
                ..
            }) => Ok(Some(value)),
            _ => Ok(None),
        }
    }

    async fn delete(&self, key: &MailboxKey) -> StoreResult<()> {
        self.entries.write().await.remove(&key.storage_key());
        Ok(())
    }

    async fn append_list(
        &self,
        key: &MailboxKey,
        value: Value,
        ttl: Option<Duration>,
    ) -> StoreResult<()> {
        let now = Instant::now();
        let mut guard = self.entries.write().await;
        let storage_key = key.storage_key();

        if guard.get(&storage_key).is_some_and(|entry| !entry.is_live(now)) {
            guard.remove(&storage_key);
        }

        let entry = guard.entry(storage_key).or_insert_with(|| Entry {
            slot: Slot::List(Vec::new()),
            expires_at: None,
        });
        match &mut entry.slot {
            Slot::List(items) => items.push(value),
            Slot::Value(_) => return Err(StoreError::corrupt(key, "expected a list, found a value")),
        }
        if let Some(ttl) = ttl {
            entry.expires_at = Some(now + ttl);
        }
        Ok(())
    }

    async fn read_list(&self, key: &MailboxKey) -> StoreResult<Vec<Value>> {
        let now = Instant::now();
        let guard = self.entries.read().await;
        match guard.get(&key.storage_key()) {
            Some(entry) if entry.is_live(now) => match &entry.slot {
                Slot::List(items) => Ok(items.clone()),
                Slot::Value(_) => Err(StoreError::corrupt(key, "expected a list, found a value")),
            },
            _ => Ok(Vec::new()),
        }
    }

    async fn purge_expired(&self) -> StoreResult<usize> {
        let now = Instant::now();
        let mut guard = self.entries.write().await;
        let before = guard.len();
        guard.retain(|_, entry| entry.is_live(now));
        Ok(before - guard.len())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
