//! This module provides a file-backed `LogStore` that appends one JSON object
//! per line.
//!
//! Each line carries exactly the fields `timestamp`, `entry_id`, `severity`,
//! `trace_id`, `message` and `command_info`. The file is only ever appended to;
//! an index of its contents is rebuilt in memory when the store is opened.
use super::{select_page, LogStore, StoreError, StoreResult};
use crate::types::{LogEntry, LogsFilter, Paging};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, warn};

struct JsonLinesInner {
    file: File,
    index: BTreeMap<u64, LogEntry>,
    /// A failed append left a fragment that could not be cut off.
    torn: bool,
}

/// File operations an append needs, so a failing file can be substituted in
/// tests.
trait AppendTarget: Write {
    fn end(&mut self) -> io::Result<u64>;
    fn truncate_to(&mut self, len: u64) -> io::Result<()>;
    fn sync(&mut self) -> io::Result<()>;
}

impl AppendTarget for File {
    fn end(&mut self) -> io::Result<u64> {
        Ok(self.metadata()?.len())
    }

    fn truncate_to(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len)
    }

    fn sync(&mut self) -> io::Result<()> {
        self.sync_data()
    }
}

/// Appends one complete line and syncs it to disk.
///
/// On failure the partial line is cut off again. If that is impossible too,
/// `torn` is set and the next append starts on a fresh line, so the fragment
/// never swallows a later record.
fn append_line<T: AppendTarget>(target: &mut T, torn: &mut bool, line: &[u8]) -> io::Result<()> {
    if *torn {
        target.write_all(b"\n")?;
        *torn = false;
    }

    let start = target.end()?;
    if let Err(e) = target.write_all(line).and_then(|_| target.sync()) {
        if target.truncate_to(start).is_err() {
            *torn = true;
        }
        return Err(e);
    }
    Ok(())
}

/// A `LogStore` implementation appending JSON lines to a single file.
pub struct JsonLinesLogStore {
    path: PathBuf,
    inner: Arc<Mutex<JsonLinesInner>>,
}

impl JsonLinesLogStore {
    /// Opens (or creates) the log file at `path` and indexes its entries.
    ///
    /// Lines that cannot be parsed are skipped with a warning, so a torn final
    /// line left by a crash does not prevent the store from opening.
    ///
    /// # Errors
    ///
    /// This function will return an error if the file cannot be read or opened
    /// for appending.
    pub fn open(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let index = Self::load_index(path)?;
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        Self::terminate_torn_line(path, &mut file)?;

        debug!(path = %path.display(), entries = index.len(), "Opened JSON-lines log store");

        Ok(Self {
            path: path.to_path_buf(),
            inner: Arc::new(Mutex::new(JsonLinesInner {
                file,
                index,
                torn: false,
            })),
        })
    }

    /// The file this store appends to.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load_index(path: &Path) -> StoreResult<BTreeMap<u64, LogEntry>> {
        let mut index = BTreeMap::new();
        let file = match File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(index),
            Err(e) => return Err(e.into()),
        };

        for (line_no, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<LogEntry>(&line) {
                Ok(entry) => {
                    // First occurrence wins, matching insert semantics.
                    index.entry(entry.entry_id).or_insert(entry);
                }
                Err(e) => warn!(
                    path = %path.display(),
                    line = line_no + 1,
                    "Skipping unreadable log line: {}",
                    e
                ),
            }
        }

        Ok(index)
    }

    /// Appends a newline if the file ends mid-line, so the next record starts
    /// on a line of its own.
    fn terminate_torn_line(path: &Path, file: &mut File) -> StoreResult<()> {
        let mut reader = File::open(path)?;
        if reader.metadata()?.len() == 0 {
            return Ok(());
        }
        let mut last = [0u8; 1];
        reader.seek(SeekFrom::End(-1))?;
        reader.read_exact(&mut last)?;
        if last[0] != b'\n' {
            file.write_all(b"\n")?;
            file.sync_data()?;
        }
        Ok(())
    }

    fn lock(inner: &Mutex<JsonLinesInner>) -> StoreResult<MutexGuard<'_, JsonLinesInner>> {
        inner
            .lock()
            .map_err(|_| StoreError::Unavailable("log file lock poisoned".to_string()))
    }

    /// Runs `f` against the locked state on the blocking thread pool.
    async fn with_inner<T, F>(&self, f: F) -> StoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut JsonLinesInner) -> StoreResult<T> + Send + 'static,
    {
        let inner = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = Self::lock(&inner)?;
            f(&mut guard)
        })
        .await?
    }
}

#[async_trait]
impl LogStore for JsonLinesLogStore {
    async fn insert(&self, entry: LogEntry) -> StoreResult<bool> {
        self.with_inner(move |inner| {
            if inner.index.contains_key(&entry.entry_id) {
                return Ok(false);
            }

            let mut line = serde_json::to_vec(&entry)?;
            line.push(b'\n');
            append_line(&mut inner.file, &mut inner.torn, &line)?;

            // Only indexed once the whole line is on disk.
            inner.index.insert(entry.entry_id, entry);
            Ok(true)
        })
        .await
    }

    async fn query(&self, filter: &LogsFilter, paging: Paging) -> StoreResult<Vec<LogEntry>> {
        let filter = filter.clone();
        self.with_inner(move |inner| {
            Ok(select_page(inner.index.values().cloned(), &filter, paging))
        })
        .await
    }

    async fn get_by_id(&self, entry_id: u64) -> StoreResult<Option<LogEntry>> {
        self.with_inner(move |inner| Ok(inner.index.get(&entry_id).cloned()))
            .await
    }

    async fn last_entry_id(&self) -> StoreResult<u64> {
        self.with_inner(|inner| Ok(inner.index.keys().next_back().copied().unwrap_or(0)))
            .await
    }
}
