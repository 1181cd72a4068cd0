//! This module drives the certificate authority's command-line tool and records
//! every action it takes in the audit trail.
pub mod cli;
pub mod manager;

pub use cli::{CommandOutput, CommandRunner, ShellRunner};
pub use manager::{CaError, CertificateManager, KeyType};
