//! Error types for the runner binary.

use keepsake_state::{ConfigError, StateError};

/// Top-level error for the runner.
///
/// Wraps every failure `main` can propagate with `?`.
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    /// Configuration loading failed.
    #[error("config error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: ConfigError,
    },

    /// A state store operation failed.
    #[error("state error: {source}")]
    State {
        /// The underlying store error.
        #[from]
        source: StateError,
    },

    /// The async host could not be set up or torn down.
    #[error("runtime error: {message}")]
    Runtime {
        /// Description of the failure.
        message: String,
    },
}
