//! This module provides a `LogStore` backed by an embedded `sled` database.
use super::{select_page, LogStore, StoreError, StoreResult};
use crate::types::{LogEntry, LogsFilter, Paging};
use async_trait::async_trait;
use sled::Db;

/// A `LogStore` implementation using `sled` for storage.
///
/// Entries are keyed by the big-endian bytes of their `entry_id`, so the tree's
/// natural order is allocation order.
pub struct SledLogStore {
    tree: sled::Tree,
}

impl SledLogStore {
    /// Creates a new `SledLogStore`.
    ///
    /// # Arguments
    ///
    /// * `db` - The `sled::Db` instance to use for storage.
    ///
    /// # Errors
    ///
    /// This function will return an error if the `log_entries` tree cannot be opened.
    pub fn new(db: Db) -> StoreResult<Self> {
        let tree = db.open_tree("log_entries")?;
        Ok(Self { tree })
    }

    fn decode_key(key: &[u8]) -> StoreResult<u64> {
        let bytes: [u8; 8] = key
            .try_into()
            .map_err(|_| StoreError::Corrupt(format!("log key of {} bytes", key.len())))?;
        Ok(u64::from_be_bytes(bytes))
    }
}

#[async_trait]
impl LogStore for SledLogStore {
    async fn insert(&self, entry: LogEntry) -> StoreResult<bool> {
        let key = entry.entry_id.to_be_bytes();
        let value = serde_json::to_vec(&entry)?;

        // Only succeeds if the key is absent, so a stored record is never replaced.
        let swapped = self
            .tree
            .compare_and_swap(key, None::<&[u8]>, Some(value))?;
        if swapped.is_err() {
            return Ok(false);
        }

        self.tree.flush_async().await?;
        Ok(true)
    }

    async fn query(&self, filter: &LogsFilter, paging: Paging) -> StoreResult<Vec<LogEntry>> {
        let tree = self.tree.clone();
        let filter = filter.clone();

        tokio::task::spawn_blocking(move || -> StoreResult<Vec<LogEntry>> {
            let mut collected = Vec::new();
            for result in tree.iter() {
                let (_key, value) = result?;
                let entry: LogEntry = serde_json::from_slice(&value)?;
                if filter.matches(&entry) {
                    collected.push(entry);
                }
            }
            Ok(select_page(collected, &filter, paging))
        })
        .await?
    }

    async fn get_by_id(&self, entry_id: u64) -> StoreResult<Option<LogEntry>> {
        let tree = self.tree.clone();
        tokio::task::spawn_blocking(move || -> StoreResult<Option<LogEntry>> {
            match tree.get(entry_id.to_be_bytes())? {
                Some(value) => Ok(Some(serde_json::from_slice(&value)?)),
                None => Ok(None),
            }
        })
        .await?
    }

    async fn last_entry_id(&self) -> StoreResult<u64> {
        let tree = self.tree.clone();
        tokio::task::spawn_blocking(move || -> StoreResult<u64> {
            match tree.last()? {
                Some((key, _value)) => Self::decode_key(&key),
                None => Ok(0),
            }
        })
        .await?
    }
}
