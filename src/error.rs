//! Error types for snapm

use thiserror::Error;

/// Result type alias for snapm operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during snapm operations
///
/// Every variant is a reason an operation failed; callers that only care
/// about success or failure can treat them uniformly.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Command failed: {command}\nstderr: {stderr}")]
    Callout { command: String, stderr: String },

    #[error("Insufficient space: {0}")]
    NoSpace(String),

    #[error("No snapshot provider: {0}")]
    NoProvider(String),

    #[error("Already exists: {0}")]
    Exists(String),

    #[error("Invalid path: {0}")]
    Path(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Snapm(String),
}
