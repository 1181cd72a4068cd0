//! This module defines the audit-trail record types and the query types used to
//! read them back.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// Importance of a log entry, ordered `Debug < Info < Warn < Error`.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Debug,
    Info,
    Warn,
    Error,
}

impl Severity {
    pub const ALL: [Severity; 4] = [
        Severity::Debug,
        Severity::Info,
        Severity::Warn,
        Severity::Error,
    ];

    /// The enum name as persisted and shown to operators.
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Debug => "DEBUG",
            Severity::Info => "INFO",
            Severity::Warn => "WARN",
            Severity::Error => "ERROR",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "DEBUG" => Ok(Severity::Debug),
            "INFO" => Ok(Severity::Info),
            "WARN" | "WARNING" => Ok(Severity::Warn),
            "ERROR" => Ok(Severity::Error),
            _ => Err(ValidationError::UnknownSeverity(s.to_string())),
        }
    }
}

/// One invocation of the CA command-line tool.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct CommandInfo {
    pub command: String,
    pub output: String,
    pub exit_code: i32,
    pub action: String,
}

/// A single audit-trail record. Never mutated once persisted.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub entry_id: u64,
    pub severity: Severity,
    pub trace_id: Uuid,
    pub message: String,
    pub command_info: Option<CommandInfo>,
}

/// Restricts which entries a query returns.
///
/// An empty `severity` set places no restriction on severity.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LogsFilter {
    pub trace_id: Option<Uuid>,
    pub commands_only: bool,
    pub severity: BTreeSet<Severity>,
}

impl LogsFilter {
    /// Returns `true` if the entry passes every restriction of this filter.
    pub fn matches(&self, entry: &LogEntry) -> bool {
        if let Some(trace_id) = self.trace_id {
            if entry.trace_id != trace_id {
                return false;
            }
        }
        if self.commands_only && entry.command_info.is_none() {
            return false;
        }
        self.severity.is_empty() || self.severity.contains(&entry.severity)
    }
}

/// A 1-based page window over a sorted result set.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Paging {
    page: u32,
    page_size: u32,
}

impl Paging {
    /// Creates a page window, rejecting a zero page or page size.
    pub fn new(page: u32, page_size: u32) -> Result<Self, ValidationError> {
        if page == 0 {
            return Err(ValidationError::InvalidPage(page));
        }
        if page_size == 0 {
            return Err(ValidationError::InvalidPageSize(page_size));
        }
        Ok(Self { page, page_size })
    }

    pub fn page(&self) -> u32 {
        self.page
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    /// Number of matching entries skipped before this page starts.
    pub fn offset(&self) -> u64 {
        (self.page as u64 - 1) * self.page_size as u64
    }
}

/// Malformed query input.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("page must be at least 1, got {0}")]
    InvalidPage(u32),
    #[error("page size must be at least 1, got {0}")]
    InvalidPageSize(u32),
    #[error("page size {requested} exceeds the maximum of {max}")]
    PageSizeTooLarge { requested: u32, max: u32 },
    #[error("unknown severity '{0}'")]
    UnknownSeverity(String),
    #[error("invalid trace id '{0}'")]
    InvalidTraceId(String),
    #[error("{field} must be a non-negative integer, got '{value}'")]
    InvalidNumber { field: &'static str, value: String },
}
