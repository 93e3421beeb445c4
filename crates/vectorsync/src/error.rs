//! Error types for the sync engine.

use thiserror::Error;
use vectorsync_face::FaceError;

/// Errors that can occur inside the sync engine.
///
/// None of these are fatal to the participant: the protocol is
/// best-effort per packet and relies on periodic re-expression for
/// convergence, so the engine logs and continues in every case.
#[derive(Debug, Error)]
pub enum SyncError {
    /// A sync payload could not be decoded.
    #[error("payload decode failed: {0}")]
    Decode(#[from] prost::DecodeError),

    /// Signing or sending a data packet failed.
    #[error("face error: {0}")]
    Face(#[from] FaceError),

    /// The sequence number did not advance as expected during
    /// bootstrap; the engine aborts bootstrap.
    #[error("sequence number did not advance as expected: expected {expected}, got {got}")]
    SequenceMismatch { expected: i64, got: i64 },
}

/// Result type for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;
