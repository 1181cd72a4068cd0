use crate::config::StorageBackend;
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[command(name = "step-ca-console")]
#[command(about = "Web console for a step-ca certificate authority, with a correlated audit log")]
pub struct AppArgs {
    #[arg(long, help = "Config file path (TOML)")]
    pub config: Option<PathBuf>,

    #[arg(long, help = "Port to listen on (overrides server.port)")]
    pub port: Option<u16>,

    #[arg(long, default_value = "data", help = "Data directory")]
    pub data_dir: PathBuf,

    #[arg(long, value_enum, help = "Audit storage backend (overrides storage.backend)")]
    pub storage: Option<StorageBackend>,

    #[arg(
        long = "step-ca-path",
        env = "STEP_CA_PATH",
        help = "Path of the step-ca executable (overrides ca.step_ca_path)"
    )]
    pub step_ca_path: Option<String>,

    #[arg(long, help = "Directory for the operational log file (overrides logging.directory)")]
    pub log_dir: Option<PathBuf>,
}

impl AppArgs {
    pub fn from_cli() -> Self {
        <Self as Parser>::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_overrides() {
        let args = AppArgs::try_parse_from([
            "step-ca-console",
            "--port",
            "8443",
            "--storage",
            "jsonl",
            "--step-ca-path",
            "/usr/bin/step-ca",
        ])
        .unwrap();

        assert_eq!(args.port, Some(8443));
        assert_eq!(args.storage, Some(StorageBackend::JsonLines));
        assert_eq!(args.step_ca_path.as_deref(), Some("/usr/bin/step-ca"));
        assert_eq!(args.data_dir, PathBuf::from("data"));
    }
}
