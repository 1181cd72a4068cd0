//! The HTTP interface of the console.
mod api;
mod middleware;

pub use middleware::TRACE_ID_HEADER;

use crate::ca::CertificateManager;
use crate::config::{AuditConfig, ServerConfig};
use crate::logging::Logger;
use anyhow::Result;
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Shared state handed to every handler.
pub struct ConsoleState {
    pub logger: Logger,
    pub certificates: CertificateManager,
    pub audit: AuditConfig,
    pub api_key: Option<String>,
}

/// Builds the console's routes and middleware stack.
pub fn build_router(state: Arc<ConsoleState>) -> Router {
    Router::new()
        .route("/certificates", get(api::list_certificates))
        .route("/certificates/generate", post(api::generate_certificate))
        .route("/certificates/renew", post(api::renew_certificate))
        .route("/certificates/revoke", post(api::revoke_certificate))
        .route("/logs", get(api::get_logs))
        .route("/logs/single", get(api::get_log_entry))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::require_api_key,
        ))
        .layer(axum::middleware::from_fn(middleware::correlate))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serves the console until Ctrl-C is received.
///
/// # Errors
///
/// This function will return an error if the listener cannot be bound.
pub async fn start_server(state: Arc<ConsoleState>, config: &ServerConfig) -> Result<()> {
    let app = build_router(state);

    let addr = format!("{}:{}", config.bind_address, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!("Web server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down web server");
        })
        .await?;

    Ok(())
}
