//! Error types and exit codes for semfora-search

use std::process::ExitCode;
use thiserror::Error;

/// Main error type for semfora-search operations
#[derive(Error, Debug)]
pub enum SearchError {
    #[error("Search binary '{binary}' is unavailable: {message}")]
    BinaryUnavailable { binary: String, message: String },

    #[error("Failed to spawn '{binary}': {message}")]
    Spawn { binary: String, message: String },

    #[error("Search for '{pattern}' timed out after {elapsed_ms}ms")]
    Timeout { pattern: String, elapsed_ms: u64 },

    #[error("Search failed: {message}")]
    Search { message: String },

    #[error("Process pool has been destroyed")]
    PoolClosed,

    #[error("Invalid search pattern: {message}")]
    InvalidPattern { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Watch error: {message}")]
    Watch { message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SearchError {
    /// Convert error to appropriate exit code:
    /// - 0: Success
    /// - 1: IO error
    /// - 2: Configuration error (binary missing, bad config)
    /// - 3: Search failure
    /// - 4: Timeout
    pub fn exit_code(&self) -> ExitCode {
        match self {
            Self::Io(_) | Self::Watch { .. } => ExitCode::from(1),
            Self::BinaryUnavailable { .. } | Self::Config { .. } => ExitCode::from(2),
            Self::Spawn { .. }
            | Self::Search { .. }
            | Self::PoolClosed
            | Self::InvalidPattern { .. } => ExitCode::from(3),
            Self::Timeout { .. } => ExitCode::from(4),
        }
    }

    /// Errors a single strategy may hit without the whole query failing.
    ///
    /// Configuration errors are not transient: a missing binary will fail
    /// every strategy the same way.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. } | Self::Search { .. } | Self::Io(_) | Self::Spawn { .. }
        )
    }
}

/// Result type alias for semfora-search operations
pub type Result<T> = std::result::Result<T, SearchError>;
