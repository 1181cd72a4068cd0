//! Configuration loading from disk, plus semantic validation.
//!
//! Serde handles syntax; `validate_config` checks value ranges and reports
//! every problem at once rather than stopping at the first.

use crate::config::schema::ConsoleConfig;
use std::fmt;
use std::fs;
use std::path::Path;
use thiserror::Error;

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationIssue {
    pub field: &'static str,
    pub message: String,
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Validation failed: {}", join_issues(.0))]
    Validation(Vec<ValidationIssue>),
}

fn join_issues(issues: &[ValidationIssue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<ConsoleConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    let config: ConsoleConfig = toml::from_str(&content)?;

    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

/// Checks value ranges that serde cannot express.
pub fn validate_config(config: &ConsoleConfig) -> Result<(), Vec<ValidationIssue>> {
    let mut issues = Vec::new();
    let mut check = |ok: bool, field: &'static str, message: &str| {
        if !ok {
            issues.push(ValidationIssue {
                field,
                message: message.to_string(),
            });
        }
    };

    check(
        !config.server.bind_address.trim().is_empty(),
        "server.bind_address",
        "must not be empty",
    );
    check(
        config.server.api_key.as_deref().map_or(true, |k| !k.is_empty()),
        "server.api_key",
        "must not be empty when set",
    );
    check(
        config.audit.write_timeout_ms > 0,
        "audit.write_timeout_ms",
        "must be greater than 0",
    );
    check(
        config.audit.default_page_size > 0,
        "audit.default_page_size",
        "must be greater than 0",
    );
    check(
        config.audit.default_page_size <= config.audit.max_page_size,
        "audit.max_page_size",
        "must not be smaller than audit.default_page_size",
    );
    check(
        !config.ca.step_ca_path.trim().is_empty(),
        "ca.step_ca_path",
        "must not be empty",
    );

    if issues.is_empty() {
        Ok(())
    } else {
        Err(issues)
    }
}
