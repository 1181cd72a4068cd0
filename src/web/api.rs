//! This module defines the HTTP API endpoints of the console.
use super::ConsoleState;
use crate::ca::{CaError, KeyType};
use crate::logging::LogError;
use crate::types::{CommandInfo, LogEntry, LogsFilter, Paging, Severity, ValidationError};
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Error responses of the API, rendered as `{"error": "..."}`.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(&'static str),
    Unavailable(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            ApiError::NotFound(message) => (StatusCode::NOT_FOUND, message.to_string()),
            ApiError::Unavailable(message) => (StatusCode::SERVICE_UNAVAILABLE, message),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

impl From<ValidationError> for ApiError {
    fn from(e: ValidationError) -> Self {
        ApiError::BadRequest(e.to_string())
    }
}

impl From<CaError> for ApiError {
    fn from(e: CaError) -> Self {
        ApiError::BadRequest(e.to_string())
    }
}

impl From<LogError> for ApiError {
    fn from(e: LogError) -> Self {
        match e {
            LogError::Validation(e) => e.into(),
            LogError::StorageUnavailable(e) => {
                warn!("Audit read failed: {}", e);
                ApiError::Unavailable("Audit log storage is unavailable".to_string())
            }
        }
    }
}

/// Response body of a `?preview=true` request.
#[derive(Serialize)]
pub struct CommandPreview {
    command: String,
}

/// An audit entry as returned by the API.
#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct LogEntryResponse {
    entry_id: u64,
    timestamp: DateTime<Utc>,
    severity: Severity,
    message: String,
    trace_id: Uuid,
    command_info: Option<CommandInfoResponse>,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct CommandInfoResponse {
    command: String,
    output: String,
    exit_code: i32,
    action: String,
}

impl From<CommandInfo> for CommandInfoResponse {
    fn from(info: CommandInfo) -> Self {
        Self {
            command: info.command,
            output: info.output,
            exit_code: info.exit_code,
            action: info.action,
        }
    }
}

impl From<LogEntry> for LogEntryResponse {
    fn from(entry: LogEntry) -> Self {
        Self {
            entry_id: entry.entry_id,
            timestamp: entry.timestamp,
            severity: entry.severity,
            message: entry.message,
            trace_id: entry.trace_id,
            command_info: entry.command_info.map(Into::into),
        }
    }
}

#[derive(Deserialize)]
pub struct PreviewQuery {
    #[serde(default)]
    preview: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateRequest {
    key_name: String,
    key_type: KeyType,
    duration: u64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenewQuery {
    cert_id: String,
    duration: u64,
    #[serde(default)]
    preview: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevokeQuery {
    cert_id: String,
    #[serde(default)]
    preview: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogIdQuery {
    log_id: u64,
}

fn preview(command: String) -> Response {
    Json(CommandPreview { command }).into_response()
}

/// Lists the authority's certificates.
#[axum::debug_handler]
pub async fn list_certificates(
    State(state): State<Arc<ConsoleState>>,
    Query(query): Query<PreviewQuery>,
) -> Response {
    if query.preview {
        return preview(state.certificates.preview_list_certificates());
    }
    Json(state.certificates.list_certificates().await).into_response()
}

/// Generates a new certificate and key pair.
#[axum::debug_handler]
pub async fn generate_certificate(
    State(state): State<Arc<ConsoleState>>,
    Query(query): Query<PreviewQuery>,
    Json(req): Json<GenerateRequest>,
) -> Result<Response, ApiError> {
    if query.preview {
        let command =
            state
                .certificates
                .preview_generate_certificate(&req.key_name, req.key_type, req.duration)?;
        return Ok(preview(command));
    }

    info!(key_name = %req.key_name, key_type = %req.key_type, "Generating certificate");
    let result = state
        .certificates
        .generate_certificate(&req.key_name, req.key_type, req.duration)
        .await?;
    Ok(Json(result).into_response())
}

/// Renews an existing certificate.
#[axum::debug_handler]
pub async fn renew_certificate(
    State(state): State<Arc<ConsoleState>>,
    Query(query): Query<RenewQuery>,
) -> Result<Response, ApiError> {
    if query.preview {
        let command = state
            .certificates
            .preview_renew_certificate(&query.cert_id, query.duration)?;
        return Ok(preview(command));
    }

    info!(cert_id = %query.cert_id, "Renewing certificate");
    let result = state
        .certificates
        .renew_certificate(&query.cert_id, query.duration)
        .await?;
    Ok(Json(result).into_response())
}

/// Revokes a certificate.
#[axum::debug_handler]
pub async fn revoke_certificate(
    State(state): State<Arc<ConsoleState>>,
    Query(query): Query<RevokeQuery>,
) -> Result<Response, ApiError> {
    if query.preview {
        return Ok(preview(
            state.certificates.preview_revoke_certificate(&query.cert_id)?,
        ));
    }

    info!(cert_id = %query.cert_id, "Revoking certificate");
    let result = state.certificates.revoke_certificate(&query.cert_id).await?;
    Ok(Json(result).into_response())
}

/// Retrieves a page of audit entries, newest first.
///
/// The query is read as raw pairs because `severity` may repeat.
#[axum::debug_handler]
pub async fn get_logs(
    State(state): State<Arc<ConsoleState>>,
    Query(pairs): Query<Vec<(String, String)>>,
) -> Result<Json<Vec<LogEntryResponse>>, ApiError> {
    let (filter, paging) = parse_logs_query(
        &pairs,
        state.audit.default_page_size,
        state.audit.max_page_size,
    )?;
    let entries = state.logger.get_logs(&filter, paging).await?;
    Ok(Json(entries.into_iter().map(Into::into).collect()))
}

/// Retrieves a single audit entry by id.
#[axum::debug_handler]
pub async fn get_log_entry(
    State(state): State<Arc<ConsoleState>>,
    Query(query): Query<LogIdQuery>,
) -> Result<Json<LogEntryResponse>, ApiError> {
    match state.logger.get_log_entry(query.log_id).await? {
        Some(entry) => Ok(Json(entry.into())),
        None => Err(ApiError::NotFound("Log entry not found")),
    }
}

fn parse_number(field: &'static str, value: &str) -> Result<u32, ValidationError> {
    value.trim().parse().map_err(|_| ValidationError::InvalidNumber {
        field,
        value: value.to_string(),
    })
}

/// Builds the filter and page window of a `GET /logs` request.
///
/// Unknown parameters are ignored. `page` defaults to 1 and `pageSize` to
/// `default_page_size`.
pub fn parse_logs_query(
    pairs: &[(String, String)],
    default_page_size: u32,
    max_page_size: u32,
) -> Result<(LogsFilter, Paging), ValidationError> {
    let mut filter = LogsFilter::default();
    let mut page = 1;
    let mut page_size = default_page_size;

    for (key, value) in pairs {
        match key.as_str() {
            "severity" => {
                filter.severity.insert(value.parse()?);
            }
            "traceId" if !value.is_empty() => {
                let trace_id = Uuid::parse_str(value)
                    .map_err(|_| ValidationError::InvalidTraceId(value.clone()))?;
                filter.trace_id = Some(trace_id);
            }
            "commandsOnly" => filter.commands_only = value.eq_ignore_ascii_case("true"),
            "page" => page = parse_number("page", value)?,
            "pageSize" => page_size = parse_number("pageSize", value)?,
            _ => {}
        }
    }

    if page_size > max_page_size {
        return Err(ValidationError::PageSizeTooLarge {
            requested: page_size,
            max: max_page_size,
        });
    }

    Ok((filter, Paging::new(page, page_size)?))
}
