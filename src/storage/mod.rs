//! This module defines the audit-log storage interface and its backends.
//!
//! Every backend implements `LogStore`; which one the console uses is chosen by
//! `StorageBackend` in the configuration.
pub mod jsonl;
pub mod memory;
pub mod sled_store;
pub mod sqlite;

pub use jsonl::JsonLinesLogStore;
pub use memory::MemoryLogStore;
pub use sled_store::SledLogStore;
pub use sqlite::SqliteLogStore;

use crate::config::{StorageBackend, StorageConfig};
use crate::types::{LogEntry, LogsFilter, Paging};
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

/// Failures of a storage backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage unavailable: {0}")]
    Unavailable(String),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("corrupt record: {0}")]
    Corrupt(String),
}

impl From<tokio::task::JoinError> for StoreError {
    fn from(err: tokio::task::JoinError) -> Self {
        StoreError::Unavailable(format!("storage task failed: {}", err))
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// A trait for persisting and querying the audit trail.
///
/// Records are append-only: there is no update or delete.
#[async_trait]
pub trait LogStore: Send + Sync {
    /// Persists an entry.
    ///
    /// Inserting an `entry_id` that is already stored leaves the stored record
    /// untouched.
    ///
    /// # Returns
    ///
    /// `true` if the entry was written, `false` if its id was already present.
    ///
    /// # Errors
    ///
    /// This function will return an error if the backend cannot be written.
    async fn insert(&self, entry: LogEntry) -> StoreResult<bool>;

    /// Retrieves the entries matching `filter`.
    ///
    /// Entries are ordered newest first (timestamp descending, then
    /// `entry_id` descending) and windowed by `paging`. A page past the end of
    /// the results yields an empty `Vec`.
    ///
    /// # Errors
    ///
    /// This function will return an error if the backend cannot be read.
    async fn query(&self, filter: &LogsFilter, paging: Paging) -> StoreResult<Vec<LogEntry>>;

    /// Retrieves an entry by its id.
    ///
    /// # Returns
    ///
    /// An `Option` containing the `LogEntry` if found, otherwise `None`.
    ///
    /// # Errors
    ///
    /// This function will return an error if the backend cannot be read.
    async fn get_by_id(&self, entry_id: u64) -> StoreResult<Option<LogEntry>>;

    /// Returns the highest stored `entry_id`, or 0 for an empty store.
    ///
    /// Used to seed the id allocator so reopened stores never reuse an id.
    ///
    /// # Errors
    ///
    /// This function will return an error if the backend cannot be read.
    async fn last_entry_id(&self) -> StoreResult<u64>;
}

/// Orders `entries` newest first and cuts out the requested page.
///
/// Shared by the backends that filter in process rather than in a query engine.
pub(crate) fn select_page<I>(entries: I, filter: &LogsFilter, paging: Paging) -> Vec<LogEntry>
where
    I: IntoIterator<Item = LogEntry>,
{
    let mut matching: Vec<LogEntry> = entries
        .into_iter()
        .filter(|entry| filter.matches(entry))
        .collect();

    matching.sort_by(|a, b| {
        b.timestamp
            .cmp(&a.timestamp)
            .then_with(|| b.entry_id.cmp(&a.entry_id))
    });

    let offset = usize::try_from(paging.offset()).unwrap_or(usize::MAX);
    matching
        .into_iter()
        .skip(offset)
        .take(paging.page_size() as usize)
        .collect()
}

/// Opens the backend described by `config`, rooting relative paths at
/// `data_dir`.
///
/// # Errors
///
/// This function will return an error if the backend cannot be opened.
pub fn open_store(config: &StorageConfig, data_dir: &Path) -> StoreResult<Arc<dyn LogStore>> {
    let path = data_dir.join(config.path_or_default());

    let store: Arc<dyn LogStore> = match config.backend {
        StorageBackend::Memory => Arc::new(MemoryLogStore::new()),
        StorageBackend::JsonLines => Arc::new(JsonLinesLogStore::open(&path)?),
        StorageBackend::Sled => Arc::new(SledLogStore::new(sled::open(&path)?)?),
        StorageBackend::Sqlite => Arc::new(SqliteLogStore::open(&path)?),
    };

    Ok(store)
}


#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn open_store_roots_paths_in_the_data_dir() {
        let dir = TempDir::new().expect("failed to create temp directory");

        for backend in [
            StorageBackend::JsonLines,
            StorageBackend::Sled,
            StorageBackend::Sqlite,
        ] {
            let config = StorageConfig {
                backend,
                path: None,
            };
            let store = open_store(&config, dir.path()).unwrap();
            assert!(store.insert(conformance::entry_at(1, 1)).await.unwrap());
            assert_eq!(store.last_entry_id().await.unwrap(), 1);
            assert!(dir.path().join(config.path_or_default()).exists());
        }
    }

    #[tokio::test]
    async fn memory_backend_starts_empty() {
        let dir = TempDir::new().unwrap();
        let config = StorageConfig {
            backend: StorageBackend::Memory,
            path: None,
        };
        let store = open_store(&config, dir.path()).unwrap();
        assert_eq!(store.last_entry_id().await.unwrap(), 0);
    }
}
