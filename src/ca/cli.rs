//! This module runs shell commands and captures their output.
use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};

/// What a finished command printed and how it exited.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub output: String,
    pub exit_code: i32,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// A trait for executing a command line.
///
/// Running never fails from the caller's point of view: a command that cannot
/// be started is reported as exit code -1 with the error text as output.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, command: &str) -> CommandOutput;
}

/// A `CommandRunner` that hands the command line to `sh -c`.
#[derive(Debug, Default, Clone)]
pub struct ShellRunner;

#[async_trait]
impl CommandRunner for ShellRunner {
    async fn run(&self, command: &str) -> CommandOutput {
        debug!(command, "Running command");

        match Command::new("sh").arg("-c").arg(command).output().await {
            Ok(out) => {
                let mut output = String::from_utf8_lossy(&out.stdout).into_owned();
                let stderr = String::from_utf8_lossy(&out.stderr);
                if !stderr.trim().is_empty() {
                    output.push_str(&stderr);
                }
                CommandOutput {
                    output,
                    // Killed by a signal.
                    exit_code: out.status.code().unwrap_or(-1),
                }
            }
            Err(e) => {
                warn!(command, "Failed to start command: {}", e);
                CommandOutput {
                    output: format!("failed to start command: {}", e),
                    exit_code: -1,
                }
            }
        }
    }
}

/// Quotes `input` for safe use as a single POSIX shell word.
///
/// Words made only of characters the shell never interprets are returned as is.
pub fn shell_quote(input: &str) -> String {
    let is_safe = |c: char| c.is_ascii_alphanumeric() || "@%+=:,./_-".contains(c);

    if !input.is_empty() && input.chars().all(is_safe) {
        return input.to_string();
    }
    format!("'{}'", input.replace('\'', r#"'"'"'"#))
}
