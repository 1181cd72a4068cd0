//! This module handles the initial setup of the application.
use super::args::AppArgs;
use crate::config::{self, ConsoleConfig, StorageBackend};
use crate::logging::{self, Logger};
use crate::storage;
use anyhow::{Context, Result};
use tracing::info;

/// Everything the console needs once setup has finished.
pub struct PreparedApp {
    /// The effective configuration, file values with CLI overrides applied.
    pub config: ConsoleConfig,
    /// The audit logger, continuing after the highest stored entry id.
    pub logger: Logger,
}

/// Prepares the application for running.
///
/// This function performs the following steps:
/// 1. Loads the config file, if one was given.
/// 2. Applies command-line overrides and validates the result.
/// 3. Configures logging.
/// 4. Prints a start banner.
/// 5. Creates the data directory and opens the audit store.
///
/// # Errors
///
/// This function will return an error if any of the setup steps fail.
pub async fn prepare(args: AppArgs) -> Result<PreparedApp> {
    let mut config = match &args.config {
        Some(path) => config::load_config(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => ConsoleConfig::default(),
    };
    apply_overrides(&mut config, &args);
    config::validate_config(&config).map_err(config::ConfigError::Validation)?;

    let log_file = logging::init_subscriber(&config.logging)?;
    print_start_banner(&args, &config);
    if let Some(path) = log_file {
        println!("Log file: {}", path.display());
    }

    std::fs::create_dir_all(&args.data_dir)
        .with_context(|| format!("creating data directory {}", args.data_dir.display()))?;

    let store = storage::open_store(&config.storage, &args.data_dir)
        .context("opening the audit store")?;
    let logger = Logger::open(store, config.audit.write_timeout())
        .await
        .context("reading the last audit entry id")?;

    info!(backend = ?config.storage.backend, "Audit store opened");

    Ok(PreparedApp { config, logger })
}

/// Overwrites config values with any given on the command line.
fn apply_overrides(config: &mut ConsoleConfig, args: &AppArgs) {
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(backend) = args.storage {
        config.storage.backend = backend;
    }
    if let Some(path) = &args.step_ca_path {
        config.ca.step_ca_path = path.clone();
    }
    if let Some(dir) = &args.log_dir {
        config.logging.directory = Some(dir.clone());
    }
}

/// Prints a banner with startup information.
fn print_start_banner(args: &AppArgs, config: &ConsoleConfig) {
    println!("🔐 Starting step-ca console");
    println!(
        "Web UI: http://{}:{}",
        config.server.bind_address, config.server.port
    );
    println!("Data directory: {}", args.data_dir.display());
    match config.storage.backend {
        StorageBackend::Memory => println!("Audit storage: memory (not persisted)"),
        backend => println!(
            "Audit storage: {:?} at {}",
            backend,
            args.data_dir.join(config.storage.path_or_default()).display()
        ),
    }
    println!("step-ca binary: {}", config.ca.step_ca_path);
    if config.server.api_key.is_some() {
        println!("API key required on every request");
    }
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::path::PathBuf;

    #[test]
    fn cli_values_override_file_values() {
        let mut config = ConsoleConfig::default();
        config.server.port = 7000;
        config.ca.step_ca_path = "/opt/step-ca".to_string();

        let args = AppArgs::try_parse_from([
            "step-ca-console",
            "--port",
            "9000",
            "--storage",
            "sqlite",
            "--log-dir",
            "/var/log/console",
        ])
        .unwrap();
        apply_overrides(&mut config, &args);

        assert_eq!(config.server.port, 9000);
        assert_eq!(config.storage.backend, StorageBackend::Sqlite);
        assert_eq!(config.ca.step_ca_path, "/opt/step-ca");
        assert_eq!(
            config.logging.directory,
            Some(PathBuf::from("/var/log/console"))
        );
    }
}
