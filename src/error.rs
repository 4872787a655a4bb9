//! Error types for the disk cache

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while operating the disk cache
///
/// Degraded-but-recoverable conditions (cache miss, edit refused) are not
/// errors; they surface as `Ok(None)`. Everything here is either an I/O
/// failure the caller has to see or a misuse of the API.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Key does not match `[a-z0-9_-]{1,120}`
    #[error("keys must match regex [a-z0-9_-]{{1,120}}: \"{0}\"")]
    InvalidKey(String),

    /// Operation on a closed cache
    #[error("cache is closed")]
    Closed,

    /// Use of an editor or snapshot after it was completed or closed
    #[error("{0} is closed")]
    HandleClosed(&'static str),

    /// Slot index outside the configured value count
    #[error("slot index {index} out of range (value count {value_count})")]
    InvalidSlot { index: usize, value_count: usize },

    // =========================================================================
    // Construction / Recovery Errors
    // =========================================================================
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Structural journal corruption
    #[error("corrupt journal: {0}")]
    CorruptJournal(String),
}

impl Error {
    /// Returns true for errors caused by journal corruption, which the
    /// engine recovers from by wiping the cache directory.
    pub fn is_corruption(&self) -> bool {
        matches!(self, Error::CorruptJournal(_))
    }
}
