//! Configuration management.
//!
//! # Data Flow
//! ```text
//! config file (TOML, optional)
//!     → loader.rs (parse & deserialize, semantic checks)
//!     → command-line overrides (app/args.rs)
//!     → ConsoleConfig (validated, immutable)
//! ```
//!
//! Every field has a default, so the console runs without a config file.

pub mod loader;
pub mod schema;

pub use loader::{load_config, validate_config, ConfigError, ValidationIssue};
pub use schema::{
    AuditConfig, CaConfig, ConsoleConfig, LoggingConfig, ServerConfig, StorageBackend,
    StorageConfig,
};
