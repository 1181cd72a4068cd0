//! This module sets up the operational stream: the global `tracing`
//! subscriber writing to the console and, optionally, a dated log file.
use crate::config::LoggingConfig;
use anyhow::{Context, Result};
use chrono::Local;
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Name of the operational log file for the day the console started.
pub fn log_file_name() -> String {
    format!("step-ca-console-{}.log", Local::now().format("%Y-%m-%d"))
}

/// Initializes the global `tracing` subscriber.
///
/// `RUST_LOG` takes precedence over `config.level`.
///
/// # Returns
///
/// The path of the log file, if one is written.
///
/// # Errors
///
/// This function will return an error if the log file cannot be opened or a
/// global subscriber is already installed.
pub fn init_subscriber(config: &LoggingConfig) -> Result<Option<PathBuf>> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.level));

    let file_path = match &config.directory {
        Some(directory) => {
            std::fs::create_dir_all(directory)
                .with_context(|| format!("creating log directory {}", directory.display()))?;
            Some(directory.join(log_file_name()))
        }
        None => None,
    };

    let file_layer = match &file_path {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("opening log file {}", path.display()))?;
            Some(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(file_layer)
        .try_init()
        .context("installing the global tracing subscriber")?;

    Ok(file_path)
}
