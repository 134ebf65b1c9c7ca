//! Durable per-entity state for Keepsake.
//!
//! Entities are plain structs whose fields are observable values
//! ([`Reactive`](keepsake_reactive::Reactive),
//! [`ReactiveList`](keepsake_reactive::ReactiveList),
//! [`ReactiveMap`](keepsake_reactive::ReactiveMap)) or plain values, plus one
//! identity field. The store caches them per type, loads and saves them off
//! the main context, and decides what to write by comparing each entity's
//! aggregate field version against the one recorded at its last save.
//!
//! # Modules
//!
//! - [`document`] -- the flat field-name to value map written to storage.
//! - [`codec`] -- conversions between field types and document values,
//!   including lenient coercion of stored values.
//! - [`field`] -- [`StateField`], the per-field capture/restore contract.
//! - [`entity`] -- [`StateEntity`], [`StateSchema`] and the
//!   [`state_entity!`] macro that implements them.
//! - [`serializer`] -- entity to document and back, identity, versions.
//! - [`storage`] -- the [`DocumentStore`] boundary with file and in-memory
//!   back ends.
//! - [`manager`] -- [`StateManager<E>`], the cache and persistence engine
//!   for one entity type.
//! - [`store`] -- [`StateStore`], the registry handed to callers.
//! - [`config`] -- [`StoreConfig`] loaded from `keepsake-config.yaml`.
//! - [`error`] -- error types.

pub mod codec;
pub mod config;
pub mod document;
pub mod entity;
pub mod error;
pub mod field;
mod lane;
pub mod manager;
pub mod serializer;
pub mod storage;
pub mod store;

pub use codec::{FieldCodec, KeyCodec};
pub use config::{ConfigError, StoreConfig};
pub use document::Document;
pub use entity::{DEFAULT_AUTOSAVE, StateEntity, StateSchema};
pub use error::{CoercionError, SkippedField, StateError, StorageError};
pub use field::StateField;
pub use manager::{ManagerStats, StateManager};
pub use serde_json::Value;
pub use storage::{Backend, DocumentStore, FileStore, MemoryStore};
pub use store::{GLOBAL_KEY, OwnerId, StateStore};

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock a mutex, recovering the data if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
