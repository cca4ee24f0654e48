//! Error types for the trajectory cache

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while serving trajectory frames
///
/// The enum is `Clone` because a single fetch failure is delivered to every
/// caller waiting on the same in-flight chunk.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// Frame index outside `[0, frame_count)`
    #[error("Frame index {index} out of range (frame count {frame_count})")]
    Range { index: u64, frame_count: u64 },

    /// Malformed or undersized wire buffer
    #[error("Malformed frame data: {0}")]
    Format(String),

    /// Remote source failure
    #[error("Frame source error: {0}")]
    Source(String),

    /// Persistent tier failure
    #[error("Persistent tier error: {0}")]
    Storage(String),

    /// Operation issued before a successful `init()`
    #[error("Trajectory cache proxy is not initialized")]
    NotInitialized,

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    // =========================================================================
    // Compression Errors
    // =========================================================================
    /// Compression failed
    #[error("Compression with {algorithm} failed: {reason}")]
    CompressionFailed { algorithm: String, reason: String },

    /// Decompression failed
    #[error("Decompression with {algorithm} failed: {reason}")]
    DecompressionFailed { algorithm: String, reason: String },

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether a later attempt of the same call may succeed.
    ///
    /// Nothing in the crate retries on its own; this only informs callers.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Source(_) | Error::Storage(_))
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Storage(err.to_string())
    }
}
