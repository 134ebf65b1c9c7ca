//! Error types for the state store.
//!
//! [`StateError`] is what callers see. Storage failures inside async loads
//! and saves never reach them; those are logged and recovered in place.

use std::path::PathBuf;

use serde_json::Value;

/// Errors returned by store and manager operations.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    /// An entity type's declared schema is unusable.
    #[error("invalid schema for {type_name}: {reason}")]
    Configuration {
        /// Rust type name of the entity.
        type_name: &'static str,
        /// What is wrong with the schema.
        reason: String,
    },

    /// The entity type was used before being registered.
    #[error("state type not registered: {type_name}")]
    NotRegistered {
        /// Rust type name of the entity.
        type_name: &'static str,
    },

    /// The key cannot name an entity of this type.
    #[error("invalid key {key:?}: {reason}")]
    InvalidKey {
        /// The rejected key.
        key: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A blocking storage operation failed.
    #[error("storage error: {source}")]
    Storage {
        /// The underlying storage error.
        #[from]
        source: StorageError,
    },
}

/// Errors raised by [`DocumentStore`](crate::DocumentStore) implementations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Filesystem access failed.
    #[error("I/O error at {}: {source}", .path.display())]
    Io {
        /// The file or directory involved.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// A YAML document could not be encoded or decoded.
    #[error("YAML error: {source}")]
    Yaml {
        /// The underlying YAML error.
        #[from]
        source: serde_yml::Error,
    },

    /// A JSON document could not be encoded or decoded.
    #[error("JSON error: {source}")]
    Json {
        /// The underlying JSON error.
        #[from]
        source: serde_json::Error,
    },

    /// A key or namespace would escape its storage directory.
    #[error("invalid storage key {key:?}")]
    InvalidKey {
        /// The rejected key.
        key: String,
    },
}

/// A stored value that cannot be converted to a field's declared type.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("expected {expected}, found {found}")]
pub struct CoercionError {
    /// The declared type.
    pub expected: &'static str,
    /// A rendering of the stored value.
    pub found: String,
}

impl CoercionError {
    /// Build an error for `found` not converting to `expected`.
    pub fn new(expected: &'static str, found: &Value) -> Self {
        let mut rendered = found.to_string();
        if rendered.len() > 64 {
            let cut = (0..=64)
                .rev()
                .find(|index| rendered.is_char_boundary(*index))
                .unwrap_or(0);
            rendered.truncate(cut);
            rendered.push_str("...");
        }
        Self {
            expected,
            found: rendered,
        }
    }
}

/// A document field that was left at its default during deserialization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedField {
    /// Field name.
    pub field: &'static str,
    /// Why the stored value was rejected.
    pub error: CoercionError,
}
