//! This module provides `Logger`, the facade business logic uses to write and
//! read the audit trail.
use super::ids::IdAllocator;
use crate::storage::{LogStore, StoreError};
use crate::trace;
use crate::types::{CommandInfo, LogEntry, LogsFilter, Paging, Severity, ValidationError};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{warn, Level};
use uuid::Uuid;

/// Target of the operational-stream lines mirroring audit entries.
pub const AUDIT_TARGET: &str = "audit";

/// Failures surfaced by the read side of the audit trail.
#[derive(Debug, Error)]
pub enum LogError {
    #[error("invalid query: {0}")]
    Validation(#[from] ValidationError),
    #[error("audit storage unavailable: {0}")]
    StorageUnavailable(#[from] StoreError),
}

/// Writes audit entries and reads them back.
///
/// Every entry goes to the operational stream (`tracing`, target `audit`) and
/// to the durable `LogStore`. A store that fails or does not answer within
/// `write_timeout` never fails the caller: the entry is kept in the operational
/// stream only and a warning is emitted there.
#[derive(Clone)]
pub struct Logger {
    store: Arc<dyn LogStore>,
    ids: Arc<IdAllocator>,
    write_timeout: Duration,
}

impl Logger {
    pub fn new(store: Arc<dyn LogStore>, ids: Arc<IdAllocator>, write_timeout: Duration) -> Self {
        Self {
            store,
            ids,
            write_timeout,
        }
    }

    /// Creates a `Logger` whose allocator continues after the highest id
    /// already in `store`.
    ///
    /// # Errors
    ///
    /// This function will return an error if the store cannot report its last id.
    pub async fn open(store: Arc<dyn LogStore>, write_timeout: Duration) -> Result<Self, StoreError> {
        let last = store.last_entry_id().await?;
        Ok(Self::new(
            store,
            Arc::new(IdAllocator::starting_after(last)),
            write_timeout,
        ))
    }

    /// Records an entry under the current correlation id (nil outside a scope).
    ///
    /// Always returns the allocated entry id, even when the durable write failed.
    pub async fn log(
        &self,
        severity: Severity,
        message: impl Into<String>,
        command_info: Option<CommandInfo>,
    ) -> u64 {
        let trace_id = trace::current_or_nil();
        self.log_with_trace(severity, message, trace_id, command_info)
            .await
    }

    /// Records an entry under an explicit correlation id.
    pub async fn log_with_trace(
        &self,
        severity: Severity,
        message: impl Into<String>,
        trace_id: Uuid,
        command_info: Option<CommandInfo>,
    ) -> u64 {
        let entry = LogEntry {
            timestamp: Utc::now(),
            entry_id: self.ids.next(),
            severity,
            trace_id,
            message: message.into(),
            command_info,
        };
        let entry_id = entry.entry_id;

        emit(&entry);

        match tokio::time::timeout(self.write_timeout, self.store.insert(entry)).await {
            Ok(Ok(true)) => {}
            Ok(Ok(false)) => warn!(
                target: AUDIT_TARGET,
                entry_id,
                "Audit store already held this entry id; kept the stored record"
            ),
            Ok(Err(e)) => warn!(
                target: AUDIT_TARGET,
                entry_id,
                "Audit store write failed, entry kept in operational log only: {}",
                e
            ),
            Err(_) => warn!(
                target: AUDIT_TARGET,
                entry_id,
                timeout_ms = self.write_timeout.as_millis() as u64,
                "Audit store write timed out, entry kept in operational log only"
            ),
        }

        entry_id
    }

    /// Retrieves a page of entries matching `filter`, newest first.
    ///
    /// # Errors
    ///
    /// Returns `LogError::StorageUnavailable` if the store cannot be read.
    pub async fn get_logs(&self, filter: &LogsFilter, paging: Paging) -> Result<Vec<LogEntry>, LogError> {
        Ok(self.store.query(filter, paging).await?)
    }

    /// Retrieves a single entry; `Ok(None)` means it does not exist.
    ///
    /// # Errors
    ///
    /// Returns `LogError::StorageUnavailable` if the store cannot be read.
    pub async fn get_log_entry(&self, entry_id: u64) -> Result<Option<LogEntry>, LogError> {
        Ok(self.store.get_by_id(entry_id).await?)
    }
}

/// Writes the human-readable line for `entry` to the operational stream.
fn emit(entry: &LogEntry) {
    let command = entry.command_info.as_ref().map(|c| c.command.as_str());
    let exit_code = entry.command_info.as_ref().map(|c| c.exit_code);

    macro_rules! audit_event {
        ($level:expr) => {
            tracing::event!(
                target: AUDIT_TARGET,
                $level,
                entry_id = entry.entry_id,
                trace_id = %entry.trace_id,
                command = ?command,
                exit_code = ?exit_code,
                "{}",
                entry.message
            )
        };
    }

    match entry.severity {
        Severity::Debug => audit_event!(Level::DEBUG),
        Severity::Info => audit_event!(Level::INFO),
        Severity::Warn => audit_event!(Level::WARN),
        Severity::Error => audit_event!(Level::ERROR),
    }
}
