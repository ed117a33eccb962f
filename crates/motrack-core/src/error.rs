//! Error types for motrack.

use thiserror::Error;

/// Main error type for motrack operations.
#[derive(Error, Debug)]
pub enum MotrackError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Frame {0} is not available")]
    FrameUnavailable(i32),

    #[error("{0}")]
    Precondition(String),

    #[error("Tracking failed: {0}")]
    TrackingFailed(String),

    #[error("Solver error: {0}")]
    Solver(String),

    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for motrack operations.
pub type Result<T> = std::result::Result<T, MotrackError>;
