//! Error types for SectorKV
//!
//! Provides a unified error type for all store operations. Each variant maps
//! to one failure class a caller can act on; flash-level failures are carried
//! through unchanged as [`FlashError`].

use thiserror::Error;

use crate::flash::FlashError;

/// Result type alias using KvError
pub type Result<T> = std::result::Result<T, KvError>;

/// Unified error type for SectorKV operations
#[derive(Debug, Error)]
pub enum KvError {
    // -------------------------------------------------------------------------
    // Caller Errors
    // -------------------------------------------------------------------------
    /// Oversized key or value, empty key, or malformed configuration.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Get/Delete on a key that is absent or deleted.
    #[error("Key not found")]
    NotFound,

    /// Operation issued before a successful `init`.
    #[error("Failed precondition: {0}")]
    FailedPrecondition(String),

    // -------------------------------------------------------------------------
    // Capacity Errors
    // -------------------------------------------------------------------------
    /// No key directory slot, or no space reclaimable even after GC.
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    // -------------------------------------------------------------------------
    // Integrity Errors
    // -------------------------------------------------------------------------
    /// Checksum mismatch on an entry the key directory points at.
    #[error("Data loss: {0}")]
    DataLoss(String),

    /// Init found sector contents that are inconsistent beyond truncation.
    #[error("Corrupt storage: {0}")]
    Corrupt(String),

    // -------------------------------------------------------------------------
    // Flash Errors
    // -------------------------------------------------------------------------
    #[error("Flash I/O error: {0}")]
    Io(#[from] FlashError),
}

impl KvError {
    /// Returns true for failures caused by the partition rather than the caller
    pub fn is_io(&self) -> bool {
        matches!(self, KvError::Io(_))
    }
}
