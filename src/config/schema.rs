//! Configuration schema definitions.
//!
//! All types derive Serde traits for deserialization from the TOML config file.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration for the console.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ConsoleConfig {
    /// HTTP listener settings.
    pub server: ServerConfig,

    /// Audit-trail storage backend.
    pub storage: StorageConfig,

    /// Operational log settings.
    pub logging: LoggingConfig,

    /// Audit write and query limits.
    pub audit: AuditConfig,

    /// The certificate authority command-line tool.
    pub ca: CaConfig,
}

/// HTTP listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind (e.g., "127.0.0.1").
    pub bind_address: String,

    /// Port to listen on.
    pub port: u16,

    /// Bearer token required on every request, when set.
    pub api_key: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1".to_string(),
            port: 5000,
            api_key: None,
        }
    }
}

/// Which `LogStore` implementation holds the audit trail.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    /// Kept in process memory; lost on exit.
    Memory,
    /// One JSON object per line in a plain file.
    #[default]
    #[serde(alias = "jsonl")]
    #[value(alias = "jsonl")]
    JsonLines,
    /// Embedded `sled` database.
    Sled,
    /// SQLite database.
    Sqlite,
}

/// Storage configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,

    /// File or directory of the store, relative to the data directory.
    pub path: Option<PathBuf>,
}

impl StorageConfig {
    /// The configured path, or the backend's default file name.
    pub fn path_or_default(&self) -> PathBuf {
        if let Some(path) = &self.path {
            return path.clone();
        }
        PathBuf::from(match self.backend {
            StorageBackend::Memory => "",
            StorageBackend::JsonLines => "audit.jsonl",
            StorageBackend::Sled => "audit.sled",
            StorageBackend::Sqlite => "audit.db",
        })
    }
}

/// Operational log configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directives, overridden by `RUST_LOG`.
    pub level: String,

    /// Directory for the dated log file; console only when unset.
    pub directory: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info,step_ca_console=debug".to_string(),
            directory: None,
        }
    }
}

/// Audit write and query limits.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AuditConfig {
    /// Longest a log call waits for the store before falling back to the
    /// operational log only.
    pub write_timeout_ms: u64,

    /// Page size used when a listing request does not give one.
    pub default_page_size: u32,

    /// Largest page size a listing request may ask for.
    pub max_page_size: u32,
}

impl AuditConfig {
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            write_timeout_ms: 2_000,
            default_page_size: 20,
            max_page_size: 500,
        }
    }
}

/// Certificate authority tool configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CaConfig {
    /// Path or name of the `step-ca` executable.
    pub step_ca_path: String,
}

impl Default for CaConfig {
    fn default() -> Self {
        Self {
            step_ca_path: "step-ca".to_string(),
        }
    }
}
