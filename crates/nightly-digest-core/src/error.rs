use std::path::PathBuf;
use thiserror::Error;

/// Run-level failures. Anything scoped to a single input file is a
/// [`crate::source::FileFailure`] instead and never aborts the batch.
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Path not found: {}", .0.display())]
    PathNotFound(PathBuf),

    #[error("Delivery failed: {0}")]
    Delivery(String),
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::Delivery(err.to_string())
    }
}
