//! Error types for Arbor core operations.
//!
//! Recoverable authentication outcomes (wrong username or password at login,
//! wrong current password at change-password) are *not* errors: they are
//! returned as structured results from the credential lifecycle. The variants
//! here cover everything the caller cannot fix by asking the user again.

use thiserror::Error;

/// Result type alias for Arbor operations.
pub type Result<T> = std::result::Result<T, ArborError>;

/// Core error type for Arbor operations.
#[derive(Debug, Error)]
pub enum ArborError {
    /// No credential record exists yet; setup has not been run
    #[error("Installation is not initialized")]
    NotInitialized,

    /// Setup was attempted on an installation that already has credentials
    #[error("Installation is already initialized")]
    AlreadyInitialized,

    /// Envelope digest mismatch during data key unwrap.
    ///
    /// Unwrap is only attempted with a secret already validated against the
    /// verification hash, so this indicates corruption or a defect, never a
    /// plain wrong password.
    #[error("Data key envelope failed its integrity check")]
    Integrity,

    /// Key derivation or cipher setup error
    #[error("Crypto error: {0}")]
    Crypto(String),

    /// Invalid user input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Storage backend error (generic)
    #[error("Storage error: {0}")]
    Storage(String),

    /// SQLite-specific storage error
    #[error("SQLite error: {source}")]
    Sqlite {
        #[from]
        source: rusqlite::Error,
    },

    /// Note not found by ID
    #[error("Note not found: {0}")]
    NoteNotFound(String),

    /// I/O error
    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },
}
