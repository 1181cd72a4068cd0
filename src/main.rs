//! The main entry point for the step-ca console.
mod app;
mod ca;
mod config;
mod logging;
mod storage;
mod trace;
mod types;
mod web;

use anyhow::Result;

/// The main function of the application.
///
/// Parses the command line, prepares the audit trail and serves the web
/// console until interrupted.
///
/// # Errors
///
/// Returns an error if setup fails or the web server cannot be started.
#[tokio::main]
async fn main() -> Result<()> {
    app::launch().await
}
