//! Error types for the core crate.

use thiserror::Error;

/// Core error type.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Block numbers start at 1.
    #[error("Invalid block number: {0} (must be >= 1)")]
    InvalidBlockNumber(u64),

    /// Program id is not valid base58.
    #[error("Invalid program id: {0}")]
    InvalidProgramId(String),

    /// Program id decoded to the wrong length.
    #[error("Invalid program id length: {0} bytes (expected 32)")]
    InvalidProgramIdLength(usize),
}

/// Result type alias for CoreError.
pub type Result<T> = std::result::Result<T, CoreError>;
