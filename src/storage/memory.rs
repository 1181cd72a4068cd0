//! This module provides an in-process `LogStore`, used in tests and when the
//! console runs without durable storage.
use super::{select_page, LogStore, StoreError, StoreResult};
use crate::types::{LogEntry, LogsFilter, Paging};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::RwLock;

/// A `LogStore` implementation keeping every entry in memory.
#[derive(Default)]
pub struct MemoryLogStore {
    entries: RwLock<BTreeMap<u64, LogEntry>>,
}

impl MemoryLogStore {
    /// Creates an empty `MemoryLogStore`.
    pub fn new() -> Self {
        Self::default()
    }

    fn poisoned() -> StoreError {
        StoreError::Unavailable("in-memory log store lock poisoned".to_string())
    }
}

#[async_trait]
impl LogStore for MemoryLogStore {
    async fn insert(&self, entry: LogEntry) -> StoreResult<bool> {
        let mut entries = self.entries.write().map_err(|_| Self::poisoned())?;
        if entries.contains_key(&entry.entry_id) {
            return Ok(false);
        }
        entries.insert(entry.entry_id, entry);
        Ok(true)
    }

    async fn query(&self, filter: &LogsFilter, paging: Paging) -> StoreResult<Vec<LogEntry>> {
        let entries = self.entries.read().map_err(|_| Self::poisoned())?;
        Ok(select_page(entries.values().cloned(), filter, paging))
    }

    async fn get_by_id(&self, entry_id: u64) -> StoreResult<Option<LogEntry>> {
        let entries = self.entries.read().map_err(|_| Self::poisoned())?;
        Ok(entries.get(&entry_id).cloned())
    }

    async fn last_entry_id(&self) -> StoreResult<u64> {
        let entries = self.entries.read().map_err(|_| Self::poisoned())?;
        Ok(entries.keys().next_back().copied().unwrap_or(0))
    }
}
