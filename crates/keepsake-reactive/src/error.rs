//! Error types for observable collections.

/// Errors returned by positional collection operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ReactiveError {
    /// An index was outside the collection's bounds. Nothing changed.
    #[error("index {index} out of bounds for collection of length {len}")]
    IndexOutOfBounds {
        /// The requested index.
        index: usize,
        /// The collection length at the time of the call.
        len: usize,
    },
}
