//! Error types for face operations.

use thiserror::Error;

/// Errors surfaced by a face or keychain.
#[derive(Debug, Error)]
pub enum FaceError {
    /// The face can no longer send packets.
    #[error("face closed: {0}")]
    Closed(String),

    /// Sending a data packet failed.
    #[error("put failed: {0}")]
    Put(String),

    /// Signing a data packet failed.
    #[error("signing failed: {0}")]
    Signing(String),
}

/// Result type for face operations.
pub type Result<T> = std::result::Result<T, FaceError>;
