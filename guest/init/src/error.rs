use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while bootstrapping the guest.
///
/// Everything except [`InitError::Handoff`] is recovered from inside the
/// boot sequence; only a failed handoff ends the agent.
#[derive(Debug, Error)]
pub enum InitError {
    /// Metadata request could not be completed (connect, timeout, body read).
    #[error("Metadata request failed: {url}: {source}")]
    Metadata {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// Metadata service answered with a non-success status.
    #[error("Metadata request failed: {url} -> {status}")]
    Status { url: String, status: u16 },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The real init could not be executed.
    #[error("Failed to execute {path}: {source}", path = .path.display())]
    Handoff {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Result type alias for guest init operations.
pub type Result<T> = std::result::Result<T, InitError>;
