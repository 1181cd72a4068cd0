pub mod args;
mod setup;

pub use args::AppArgs;

use crate::ca::{CertificateManager, ShellRunner};
use crate::types::Severity;
use crate::web::{self, ConsoleState};
use anyhow::Result;
use std::sync::Arc;

pub async fn launch() -> Result<()> {
    launch_with_args(AppArgs::from_cli()).await
}

pub async fn launch_with_args(args: AppArgs) -> Result<()> {
    let setup::PreparedApp { config, logger } = setup::prepare(args).await?;

    logger
        .log(Severity::Info, "step-ca console started", None)
        .await;

    let certificates = CertificateManager::new(
        logger.clone(),
        Arc::new(ShellRunner),
        &config.ca.step_ca_path,
    );

    let state = Arc::new(ConsoleState {
        logger,
        certificates,
        audit: config.audit.clone(),
        api_key: config.server.api_key.clone(),
    });

    web::start_server(state, &config.server).await
}
