//! This module implements the certificate operations offered by the console.
//!
//! Each completed operation runs exactly one `step-ca` command and writes
//! exactly one audit entry: `INFO` when the command exits with 0, `ERROR`
//! otherwise, always carrying the command, its output and its exit code.
use super::cli::{shell_quote, CommandOutput, CommandRunner};
use crate::logging::Logger;
use crate::types::{CommandInfo, Severity};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

pub const ACTION_GENERATE: &str = "GENERATE_CERT";
pub const ACTION_RENEW: &str = "RENEW_CERT";
pub const ACTION_REVOKE: &str = "REVOKE_CERT";
pub const ACTION_LIST: &str = "LIST_CERTS";

/// Key algorithm for a new certificate.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeyType {
    #[serde(rename = "RSA")]
    Rsa,
    #[serde(rename = "EC")]
    Ec,
    #[serde(rename = "OKP")]
    Okp,
}

impl KeyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyType::Rsa => "RSA",
            KeyType::Ec => "EC",
            KeyType::Okp => "OKP",
        }
    }
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rejected certificate request.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CaError {
    #[error("key name '{0}' may only contain letters, digits, '-' and '_'")]
    InvalidKeyName(String),
    #[error("duration must be greater than 0 seconds")]
    InvalidDuration,
    #[error("certificate id must not be empty")]
    EmptyCertificateId,
}

/// A certificate known to the authority.
#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Certificate {
    pub id: String,
    pub name: String,
    pub status: String,
    pub expiration_date: DateTime<Utc>,
}

/// Outcome of a generate, renew or revoke operation.
#[derive(Serialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CertificateResult {
    pub success: bool,
    pub message: String,
    pub log_entry_id: u64,
    pub certificate_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub certificate_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expiration_date: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_expiration_date: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revocation_date: Option<DateTime<Utc>>,
}

impl CertificateResult {
    fn new(success: bool, message: &str, log_entry_id: u64, certificate_id: &str) -> Self {
        Self {
            success,
            message: message.to_string(),
            log_entry_id,
            certificate_id: certificate_id.to_string(),
            certificate_name: None,
            expiration_date: None,
            new_expiration_date: None,
            revocation_date: None,
        }
    }
}

/// Outcome of listing certificates.
#[derive(Serialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CertificateListing {
    pub success: bool,
    pub log_entry_id: u64,
    pub certificates: Vec<Certificate>,
}

/// Runs certificate operations through the CA tool and audits them.
pub struct CertificateManager {
    logger: Logger,
    runner: Arc<dyn CommandRunner>,
    step_ca_path: String,
}

impl CertificateManager {
    pub fn new(logger: Logger, runner: Arc<dyn CommandRunner>, step_ca_path: &str) -> Self {
        Self {
            logger,
            runner,
            step_ca_path: shell_quote(step_ca_path),
        }
    }

    pub fn preview_list_certificates(&self) -> String {
        format!("{} list certificates", self.step_ca_path)
    }

    pub fn preview_generate_certificate(
        &self,
        key_name: &str,
        key_type: KeyType,
        duration_secs: u64,
    ) -> Result<String, CaError> {
        validate_key_name(key_name)?;
        validate_duration(duration_secs)?;
        Ok(format!(
            "{step} certificate {name} {name}.crt {name}.key --key-type {kty} --not-after {duration}",
            step = self.step_ca_path,
            name = key_name,
            kty = key_type,
            duration = duration_secs,
        ))
    }

    pub fn preview_renew_certificate(
        &self,
        cert_id: &str,
        duration_secs: u64,
    ) -> Result<String, CaError> {
        let cert_id = quote_cert_id(cert_id)?;
        validate_duration(duration_secs)?;
        Ok(format!(
            "{} renew {id}.crt {id}.key --force --expires-in {}s",
            self.step_ca_path,
            duration_secs,
            id = cert_id,
        ))
    }

    pub fn preview_revoke_certificate(&self, cert_id: &str) -> Result<String, CaError> {
        let cert_id = quote_cert_id(cert_id)?;
        Ok(format!("{} revoke {}.crt", self.step_ca_path, cert_id))
    }

    /// Lists the authority's certificates.
    ///
    /// Output lines that do not parse as `id name status expiration` are
    /// ignored.
    pub async fn list_certificates(&self) -> CertificateListing {
        let command = self.preview_list_certificates();
        let (out, log_entry_id) = self
            .execute(
                &command,
                ACTION_LIST,
                "Certificates listed successfully",
                "Failed to list certificates",
            )
            .await;

        let certificates = if out.success() {
            parse_certificate_list(&out.output)
        } else {
            Vec::new()
        };

        CertificateListing {
            success: out.success(),
            log_entry_id,
            certificates,
        }
    }

    pub async fn generate_certificate(
        &self,
        key_name: &str,
        key_type: KeyType,
        duration_secs: u64,
    ) -> Result<CertificateResult, CaError> {
        let command = self.preview_generate_certificate(key_name, key_type, duration_secs)?;
        let (out, log_entry_id) = self
            .execute(
                &command,
                ACTION_GENERATE,
                "Certificate generated successfully",
                "Failed to generate certificate",
            )
            .await;

        let message = if out.success() {
            "Certificate generated successfully"
        } else {
            "Failed to generate certificate"
        };
        let mut result = CertificateResult::new(out.success(), message, log_entry_id, key_name);
        result.certificate_name = Some(key_name.to_string());
        if out.success() {
            result.expiration_date = Some(expires_in(duration_secs));
        }
        Ok(result)
    }

    pub async fn renew_certificate(
        &self,
        cert_id: &str,
        duration_secs: u64,
    ) -> Result<CertificateResult, CaError> {
        let command = self.preview_renew_certificate(cert_id, duration_secs)?;
        let (out, log_entry_id) = self
            .execute(
                &command,
                ACTION_RENEW,
                "Certificate renewed successfully",
                "Failed to renew certificate",
            )
            .await;

        let message = if out.success() {
            "Certificate renewed successfully"
        } else {
            "Failed to renew certificate"
        };
        let mut result = CertificateResult::new(out.success(), message, log_entry_id, cert_id);
        if out.success() {
            result.new_expiration_date = Some(expires_in(duration_secs));
        }
        Ok(result)
    }

    pub async fn revoke_certificate(&self, cert_id: &str) -> Result<CertificateResult, CaError> {
        let command = self.preview_revoke_certificate(cert_id)?;
        let (out, log_entry_id) = self
            .execute(
                &command,
                ACTION_REVOKE,
                "Certificate revoked successfully",
                "Failed to revoke certificate",
            )
            .await;

        let message = if out.success() {
            "Certificate revoked successfully"
        } else {
            "Failed to revoke certificate"
        };
        let mut result = CertificateResult::new(out.success(), message, log_entry_id, cert_id);
        if out.success() {
            result.revocation_date = Some(Utc::now());
        }
        Ok(result)
    }

    /// Runs `command` and writes its single audit entry.
    async fn execute(
        &self,
        command: &str,
        action: &str,
        success_message: &str,
        failure_message: &str,
    ) -> (CommandOutput, u64) {
        let out = self.runner.run(command).await;

        let (severity, message) = if out.success() {
            (Severity::Info, success_message)
        } else {
            (Severity::Error, failure_message)
        };
        let command_info = CommandInfo {
            command: command.to_string(),
            output: out.output.clone(),
            exit_code: out.exit_code,
            action: action.to_string(),
        };
        let log_entry_id = self.logger.log(severity, message, Some(command_info)).await;

        (out, log_entry_id)
    }
}

fn validate_key_name(key_name: &str) -> Result<(), CaError> {
    let valid = !key_name.is_empty()
        && key_name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(CaError::InvalidKeyName(key_name.to_string()))
    }
}

fn validate_duration(duration_secs: u64) -> Result<(), CaError> {
    if duration_secs == 0 {
        return Err(CaError::InvalidDuration);
    }
    Ok(())
}

fn quote_cert_id(cert_id: &str) -> Result<String, CaError> {
    if cert_id.trim().is_empty() {
        return Err(CaError::EmptyCertificateId);
    }
    Ok(shell_quote(cert_id))
}

fn expires_in(duration_secs: u64) -> DateTime<Utc> {
    let secs = i64::try_from(duration_secs).unwrap_or(i64::MAX);
    Duration::try_seconds(secs)
        .and_then(|d| Utc::now().checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

fn parse_certificate_list(output: &str) -> Vec<Certificate> {
    output
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let id = fields.next()?;
            let name = fields.next()?;
            let status = fields.next()?;
            let expiration = DateTime::parse_from_rfc3339(fields.next()?).ok()?;
            Some(Certificate {
                id: id.to_string(),
                name: name.to_string(),
                status: status.to_string(),
                expiration_date: expiration.with_timezone(&Utc),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::IdAllocator;
    use crate::storage::MemoryLogStore;
    use crate::trace;
    use crate::types::{LogsFilter, Paging};
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Answers every command with a fixed result and remembers what it ran.
    struct ScriptedRunner {
        output: CommandOutput,
        ran: Mutex<Vec<String>>,
    }

    impl ScriptedRunner {
        fn new(output: &str, exit_code: i32) -> Arc<Self> {
            Arc::new(Self {
                output: CommandOutput {
                    output: output.to_string(),
                    exit_code,
                },
                ran: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl CommandRunner for ScriptedRunner {
        async fn run(&self, command: &str) -> CommandOutput {
            self.ran.lock().unwrap().push(command.to_string());
            self.output.clone()
        }
    }

    fn manager(runner: Arc<ScriptedRunner>) -> (CertificateManager, Logger) {
        let logger = Logger::new(
            Arc::new(MemoryLogStore::new()),
            Arc::new(IdAllocator::default()),
            std::time::Duration::from_secs(1),
        );
        (
            CertificateManager::new(logger.clone(), runner, "step-ca"),
            logger,
        )
    }

    async fn all_entries(logger: &Logger) -> Vec<crate::types::LogEntry> {
        logger
            .get_logs(&LogsFilter::default(), Paging::new(1, 100).unwrap())
            .await
            .unwrap()
    }

    #[test]
    fn previews_match_tool_syntax() {
        let (manager, _) = manager(ScriptedRunner::new("", 0));
        assert_eq!(
            manager
                .preview_generate_certificate("a", KeyType::Rsa, 3600)
                .unwrap(),
            "step-ca certificate a a.crt a.key --key-type RSA --not-after 3600"
        );
        assert_eq!(
            manager.preview_renew_certificate("web", 60).unwrap(),
            "step-ca renew web.crt web.key --force --expires-in 60s"
        );
        assert_eq!(
            manager.preview_revoke_certificate("my cert").unwrap(),
            "step-ca revoke 'my cert'.crt"
        );
        assert_eq!(manager.preview_list_certificates(), "step-ca list certificates");
    }

    #[test]
    fn invalid_requests_are_rejected() {
        let (manager, _) = manager(ScriptedRunner::new("", 0));
        assert_eq!(
            manager.preview_generate_certificate("a;b", KeyType::Ec, 10),
            Err(CaError::InvalidKeyName("a;b".to_string()))
        );
        assert_eq!(
            manager.preview_renew_certificate("a", 0),
            Err(CaError::InvalidDuration)
        );
        assert_eq!(
            manager.preview_revoke_certificate("  "),
            Err(CaError::EmptyCertificateId)
        );
    }

    #[tokio::test]
    async fn generate_logs_one_info_entry_under_the_request_trace() {
        let runner = ScriptedRunner::new("", 0);
        let (manager, logger) = manager(runner.clone());
        let trace_id = uuid::Uuid::new_v4();

        let result = trace::scope_with(trace_id, async {
            manager.generate_certificate("a", KeyType::Rsa, 3600).await
        })
        .await
        .unwrap();

        assert!(result.success);
        assert!(result.expiration_date.is_some());

        let entries = all_entries(&logger).await;
        assert_eq!(entries.len(), 1);
        let entry = &entries[0];
        assert_eq!(entry.entry_id, result.log_entry_id);
        assert_eq!(entry.trace_id, trace_id);
        assert_eq!(entry.severity, Severity::Info);
        let info = entry.command_info.as_ref().unwrap();
        assert_eq!(
            info.command,
            "step-ca certificate a a.crt a.key --key-type RSA --not-after 3600"
        );
        assert_eq!(info.exit_code, 0);
        assert_eq!(info.action, ACTION_GENERATE);
        assert_eq!(runner.ran.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn failed_revoke_logs_error_with_output() {
        let (manager, logger) = manager(ScriptedRunner::new("certificate not found\n", 1));

        let result = manager.revoke_certificate("gone").await.unwrap();
        assert!(!result.success);
        assert_eq!(result.message, "Failed to revoke certificate");
        assert!(result.revocation_date.is_none());

        let entry = logger.get_log_entry(result.log_entry_id).await.unwrap().unwrap();
        assert_eq!(entry.severity, Severity::Error);
        let info = entry.command_info.unwrap();
        assert_eq!(info.output, "certificate not found\n");
        assert_eq!(info.exit_code, 1);
        assert_eq!(info.action, ACTION_REVOKE);
    }

    #[tokio::test]
    async fn rejected_request_runs_and_logs_nothing() {
        let runner = ScriptedRunner::new("", 0);
        let (manager, logger) = manager(runner.clone());

        assert!(manager.renew_certificate("a", 0).await.is_err());
        assert!(runner.ran.lock().unwrap().is_empty());
        assert!(all_entries(&logger).await.is_empty());
    }

    #[tokio::test]
    async fn list_parses_output_and_logs_once() {
        let output = "\
ID NAME STATUS EXPIRES
1f web active 2030-01-01T00:00:00Z
2a mail revoked 2029-06-30T12:00:00Z
";
        let (manager, logger) = manager(ScriptedRunner::new(output, 0));

        let listing = manager.list_certificates().await;
        assert!(listing.success);
        assert_eq!(listing.certificates.len(), 2);
        assert_eq!(listing.certificates[1].name, "mail");
        assert_eq!(listing.certificates[1].status, "revoked");

        let entries = all_entries(&logger).await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].command_info.as_ref().unwrap().action, ACTION_LIST);
    }
}
