//! Common error types for medeval

use std::path::PathBuf;
use thiserror::Error;

/// Common result type for medeval operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across medeval services
#[derive(Error, Debug)]
pub enum Error {
    /// A configuration file exists but cannot be read
    #[error("Cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Configuration parsing or validation error
    #[error("Configuration error: {0}")]
    Config(String),
}
