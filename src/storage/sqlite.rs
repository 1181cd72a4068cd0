//! This module provides a relational `LogStore` backed by SQLite.
//!
//! Schema:
//! - `log_entries`: (`entry_id` INTEGER PRIMARY KEY, `timestamp` TEXT,
//!   `severity` TEXT, `trace_id` TEXT, `message` TEXT, `command_info` TEXT NULL)
//!
//! Timestamps are stored as fixed-width RFC 3339 UTC strings, so text order is
//! chronological order and sorting happens in SQL.
use super::{LogStore, StoreError, StoreResult};
use crate::types::{CommandInfo, LogEntry, LogsFilter, Paging, Severity};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

const SELECT_COLUMNS: &str =
    "SELECT entry_id, timestamp, severity, trace_id, message, command_info FROM log_entries";

/// Columns of one row, before conversion into a `LogEntry`.
type RawRow = (i64, String, String, String, String, Option<String>);

/// A `LogStore` implementation using SQLite.
#[derive(Clone)]
pub struct SqliteLogStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteLogStore {
    /// Opens (or creates) the database at `path` and ensures the schema exists.
    ///
    /// # Errors
    ///
    /// This function will return an error if the database cannot be opened or
    /// the schema cannot be created.
    pub fn open(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "FULL")?;
        Self::with_connection(conn)
    }

    /// Creates a private in-memory database.
    ///
    /// # Errors
    ///
    /// This function will return an error if the schema cannot be created.
    pub fn open_in_memory() -> StoreResult<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> StoreResult<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS log_entries (
                entry_id INTEGER PRIMARY KEY,
                timestamp TEXT NOT NULL,
                severity TEXT NOT NULL,
                trace_id TEXT NOT NULL,
                message TEXT NOT NULL,
                command_info TEXT
            );
            CREATE INDEX IF NOT EXISTS log_entries_by_time
                ON log_entries (timestamp DESC, entry_id DESC);
            CREATE INDEX IF NOT EXISTS log_entries_by_trace
                ON log_entries (trace_id);",
        )?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(conn: &Mutex<Connection>) -> StoreResult<MutexGuard<'_, Connection>> {
        conn.lock()
            .map_err(|_| StoreError::Unavailable("sqlite connection lock poisoned".to_string()))
    }

    /// Runs `f` against the connection on the blocking thread pool.
    async fn with_conn<T, F>(&self, f: F) -> StoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> StoreResult<T> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let guard = Self::lock(&conn)?;
            f(&guard)
        })
        .await?
    }

    fn format_timestamp(timestamp: &DateTime<Utc>) -> String {
        timestamp.to_rfc3339_opts(SecondsFormat::Nanos, true)
    }

    fn into_entry(row: RawRow) -> StoreResult<LogEntry> {
        let (entry_id, timestamp, severity, trace_id, message, command_info) = row;

        let entry_id = u64::try_from(entry_id)
            .map_err(|_| StoreError::Corrupt(format!("negative entry id {}", entry_id)))?;
        let timestamp = DateTime::parse_from_rfc3339(&timestamp)
            .map_err(|e| StoreError::Corrupt(format!("timestamp '{}': {}", timestamp, e)))?
            .with_timezone(&Utc);
        let severity: Severity = severity
            .parse()
            .map_err(|e| StoreError::Corrupt(format!("{}", e)))?;
        let trace_id = Uuid::parse_str(&trace_id)
            .map_err(|e| StoreError::Corrupt(format!("trace id '{}': {}", trace_id, e)))?;
        let command_info = command_info
            .map(|json| serde_json::from_str::<CommandInfo>(&json))
            .transpose()?;

        Ok(LogEntry {
            timestamp,
            entry_id,
            severity,
            trace_id,
            message,
            command_info,
        })
    }

    fn read_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawRow> {
        Ok((
            row.get(0)?,
            row.get(1)?,
            row.get(2)?,
            row.get(3)?,
            row.get(4)?,
            row.get(5)?,
        ))
    }

    /// Builds the `WHERE` clause and its bound values for `filter`.
    fn where_clause(filter: &LogsFilter) -> (String, Vec<Value>) {
        let mut clauses = Vec::new();
        let mut values = Vec::new();

        if let Some(trace_id) = filter.trace_id {
            clauses.push("trace_id = ?".to_string());
            values.push(Value::Text(trace_id.to_string()));
        }
        if filter.commands_only {
            clauses.push("command_info IS NOT NULL".to_string());
        }
        if !filter.severity.is_empty() {
            let placeholders = vec!["?"; filter.severity.len()].join(", ");
            clauses.push(format!("severity IN ({})", placeholders));
            values.extend(
                filter
                    .severity
                    .iter()
                    .map(|s| Value::Text(s.as_str().to_string())),
            );
        }

        if clauses.is_empty() {
            (String::new(), values)
        } else {
            (format!(" WHERE {}", clauses.join(" AND ")), values)
        }
    }
}

#[async_trait]
impl LogStore for SqliteLogStore {
    async fn insert(&self, entry: LogEntry) -> StoreResult<bool> {
        let entry_id = i64::try_from(entry.entry_id)
            .map_err(|_| StoreError::Corrupt(format!("entry id {} out of range", entry.entry_id)))?;
        let command_info = entry
            .command_info
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        self.with_conn(move |conn| {
            let changed = conn.execute(
                "INSERT OR IGNORE INTO log_entries
                    (entry_id, timestamp, severity, trace_id, message, command_info)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    entry_id,
                    Self::format_timestamp(&entry.timestamp),
                    entry.severity.as_str(),
                    entry.trace_id.to_string(),
                    entry.message,
                    command_info,
                ],
            )?;
            Ok(changed == 1)
        })
        .await
    }

    async fn query(&self, filter: &LogsFilter, paging: Paging) -> StoreResult<Vec<LogEntry>> {
        let (where_clause, mut values) = Self::where_clause(filter);
        values.push(Value::Integer(paging.page_size() as i64));
        values.push(Value::Integer(
            i64::try_from(paging.offset()).unwrap_or(i64::MAX),
        ));
        let sql = format!(
            "{}{} ORDER BY timestamp DESC, entry_id DESC LIMIT ? OFFSET ?",
            SELECT_COLUMNS, where_clause
        );

        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params_from_iter(values), Self::read_row)?
                .collect::<Result<Vec<_>, _>>()?;
            rows.into_iter().map(Self::into_entry).collect()
        })
        .await
    }

    async fn get_by_id(&self, entry_id: u64) -> StoreResult<Option<LogEntry>> {
        let Ok(entry_id) = i64::try_from(entry_id) else {
            return Ok(None);
        };

        self.with_conn(move |conn| {
            let row = conn
                .query_row(
                    &format!("{} WHERE entry_id = ?1", SELECT_COLUMNS),
                    params![entry_id],
                    Self::read_row,
                )
                .optional()?;
            row.map(Self::into_entry).transpose()
        })
        .await
    }

    async fn last_entry_id(&self) -> StoreResult<u64> {
        self.with_conn(|conn| {
            let max: Option<i64> =
                conn.query_row("SELECT MAX(entry_id) FROM log_entries", [], |row| row.get(0))?;
            Ok(max.map(|id| id.max(0) as u64).unwrap_or(0))
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::conformance;
    use tempfile::TempDir;

    fn memory_store() -> SqliteLogStore {
        SqliteLogStore::open_in_memory().unwrap()
    }

    #[tokio::test]
    async fn paging_is_newest_first() {
        conformance::paging_is_newest_first(&memory_store()).await;
    }

    #[tokio::test]
    async fn duplicate_insert_is_ignored() {
        conformance::duplicate_insert_is_ignored(&memory_store()).await;
    }

    #[tokio::test]
    async fn commands_only_filter() {
        conformance::commands_only_filter(&memory_store()).await;
    }

    #[tokio::test]
    async fn severity_and_trace_filters() {
        conformance::severity_and_trace_filters(&memory_store()).await;
    }

    #[tokio::test]
    async fn timestamp_ties_break_on_entry_id() {
        conformance::timestamp_ties_break_on_entry_id(&memory_store()).await;
    }

    #[tokio::test]
    async fn missing_id_is_none() {
        conformance::missing_id_is_none(&memory_store()).await;
    }

    #[tokio::test]
    async fn entries_survive_reopen() {
        let dir = TempDir::new().expect("failed to create temp directory");
        let path = dir.path().join("audit.db");
        {
            let store = SqliteLogStore::open(&path).unwrap();
            store.insert(conformance::entry_at(9, 9)).await.unwrap();
        }

        let reopened = SqliteLogStore::open(&path).unwrap();
        assert_eq!(reopened.last_entry_id().await.unwrap(), 9);
        assert_eq!(
            reopened.get_by_id(9).await.unwrap(),
            Some(conformance::entry_at(9, 9))
        );
    }

    #[test]
    fn empty_filter_has_no_where_clause() {
        let (clause, values) = SqliteLogStore::where_clause(&LogsFilter::default());
        assert!(clause.is_empty());
        assert!(values.is_empty());
    }

    #[test]
    fn severity_filter_binds_each_member() {
        let filter = LogsFilter {
            commands_only: true,
            severity: [Severity::Info, Severity::Error].into_iter().collect(),
            ..Default::default()
        };
        let (clause, values) = SqliteLogStore::where_clause(&filter);
        assert_eq!(
            clause,
            " WHERE command_info IS NOT NULL AND severity IN (?, ?)"
        );
        assert_eq!(values.len(), 2);
    }
}
