//! Error types for live view operations.

use thiserror::Error;

/// Errors surfaced by live views and the registry.
#[derive(Error, Debug)]
pub enum LiveError {
    #[error("View bootstrap failed: {0}")]
    BootstrapFailed(String),

    #[error("View is stopped")]
    Stopped,

    #[error("Source error: {0}")]
    Source(#[from] streamsight_source::SourceError),
}

/// Result type for live view operations.
pub type Result<T> = std::result::Result<T, LiveError>;
