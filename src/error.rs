use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Ledger error: {0}")]
    Ledger(String),

    #[error("Report error: {0}")]
    Report(#[from] csv::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Another run is already active (lock file: {})", .0.display())]
    LockContention(PathBuf),

    #[error("Not a valid workspace: {}", .0.display())]
    InvalidWorkspace(PathBuf),

    #[error("{0}")]
    Other(String),
}
