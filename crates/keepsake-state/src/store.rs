//! The store facade: one [`StateManager`] per registered entity type.
//!
//! [`StateStore`] is an ordinary value. Hosts build one at startup, share
//! it (usually in an `Arc`) and call [`StateStore::shutdown`] on the way
//! out. Typed operations look the manager up by `TypeId` and fail with
//! [`StateError::NotRegistered`] for types nobody registered.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use keepsake_sched::Scheduler;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::StoreConfig;
use crate::entity::StateEntity;
use crate::error::StateError;
use crate::lock;
use crate::manager::{ManagerStats, StateManager};
use crate::storage::{DocumentStore, FileStore};

/// Key of the single instance of a global entity type.
pub const GLOBAL_KEY: &str = "__global__";

/// Identifies whoever registered an entity type, so that one component can
/// shut down its own types without touching anyone else's.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OwnerId(Uuid);

impl OwnerId {
    /// A new, unique owner.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// The underlying UUID.
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for OwnerId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for OwnerId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Type-erased view of a manager, for operations that span every type.
trait ManagedType: Send + Sync {
    fn namespace(&self) -> &'static str;
    fn unload_if_cached(&self, key: &str) -> bool;
    fn shutdown(&self);
}

impl<E: StateEntity> ManagedType for Arc<StateManager<E>> {
    fn namespace(&self) -> &'static str {
        E::SCHEMA.namespace
    }

    fn unload_if_cached(&self, key: &str) -> bool {
        self.unload(key)
    }

    fn shutdown(&self) {
        StateManager::shutdown(self);
    }
}

struct Registration {
    owner: OwnerId,
    type_name: &'static str,
    erased: Arc<dyn ManagedType>,
    typed: Arc<dyn Any + Send + Sync>,
}

/// Registry of entity types and entry point for every state operation.
pub struct StateStore {
    scheduler: Arc<dyn Scheduler>,
    storage: Arc<dyn DocumentStore>,
    config: StoreConfig,
    registry: Mutex<HashMap<TypeId, Registration>>,
}

impl StateStore {
    /// A store persisting to `storage`.
    pub fn new(scheduler: Arc<dyn Scheduler>, storage: Arc<dyn DocumentStore>, config: StoreConfig) -> Self {
        Self {
            scheduler,
            storage,
            config,
            registry: Mutex::new(HashMap::new()),
        }
    }

    /// A store persisting to files under `config.storage.root`.
    pub fn with_file_storage(scheduler: Arc<dyn Scheduler>, config: StoreConfig) -> Self {
        let storage: Arc<dyn DocumentStore> = Arc::new(FileStore::new(config.storage.root.clone()));
        Self::new(scheduler, storage, config)
    }

    /// The configuration managers are built with.
    pub const fn config(&self) -> &StoreConfig {
        &self.config
    }

    // =========================================================================
    // Registration
    // =========================================================================

    /// Build the manager for `E`. Returns `false` when `E` was already
    /// registered, by anyone.
    ///
    /// # Errors
    ///
    /// [`StateError::Configuration`] when the schema is invalid or its
    /// namespace is taken by another type.
    pub fn register<E: StateEntity>(&self, owner: OwnerId) -> Result<bool, StateError> {
        let type_name = std::any::type_name::<E>();
        let mut registry = lock(&self.registry);
        if registry.contains_key(&TypeId::of::<E>()) {
            return Ok(false);
        }
        if let Some(other) = registry
            .values()
            .find(|registration| registration.erased.namespace() == E::SCHEMA.namespace)
        {
            return Err(StateError::Configuration {
                type_name,
                reason: format!(
                    "namespace {:?} already used by {}",
                    E::SCHEMA.namespace,
                    other.type_name
                ),
            });
        }

        let manager = StateManager::<E>::new(
            Arc::clone(&self.scheduler),
            Arc::clone(&self.storage),
            &self.config,
        )?;
        registry.insert(
            TypeId::of::<E>(),
            Registration {
                owner,
                type_name,
                erased: Arc::new(Arc::clone(&manager)),
                typed: manager,
            },
        );
        tracing::info!(
            type_name,
            namespace = E::SCHEMA.namespace,
            %owner,
            "state type registered"
        );
        Ok(true)
    }

    /// Whether `E` has a manager.
    pub fn is_registered<E: StateEntity>(&self) -> bool {
        lock(&self.registry).contains_key(&TypeId::of::<E>())
    }

    /// The manager for `E`.
    pub fn manager<E: StateEntity>(&self) -> Result<Arc<StateManager<E>>, StateError> {
        let typed = lock(&self.registry)
            .get(&TypeId::of::<E>())
            .map(|registration| Arc::clone(&registration.typed));
        typed
            .and_then(|typed| typed.downcast::<StateManager<E>>().ok())
            .ok_or_else(|| StateError::NotRegistered {
                type_name: std::any::type_name::<E>(),
            })
    }

    /// `(type name, namespace)` of every registered type, sorted by
    /// namespace.
    pub fn registered_types(&self) -> Vec<(&'static str, &'static str)> {
        let mut types: Vec<_> = lock(&self.registry)
            .values()
            .map(|registration| (registration.type_name, registration.erased.namespace()))
            .collect();
        types.sort_unstable_by_key(|(_, namespace)| *namespace);
        types
    }

    // =========================================================================
    // Typed operations
    // =========================================================================

    /// See [`StateManager::get_or_create`].
    pub fn get_or_create<E: StateEntity>(&self, key: &str) -> Result<Arc<E>, StateError> {
        self.manager::<E>()?.get_or_create(key)
    }

    /// See [`StateManager::get`].
    pub fn get<E: StateEntity>(&self, key: &str) -> Result<Option<Arc<E>>, StateError> {
        Ok(self.manager::<E>()?.get(key))
    }

    /// See [`StateManager::load`].
    pub fn load<E: StateEntity>(
        &self,
        key: &str,
        callback: impl FnOnce(Arc<E>) + Send + 'static,
    ) -> Result<(), StateError> {
        self.manager::<E>()?.load(key, callback)
    }

    /// See [`StateManager::load_sync`].
    pub fn load_sync<E: StateEntity>(&self, key: &str) -> Result<Arc<E>, StateError> {
        self.manager::<E>()?.load_sync(key)
    }

    /// See [`StateManager::save`].
    pub fn save<E: StateEntity>(&self, key: &str) -> Result<bool, StateError> {
        Ok(self.manager::<E>()?.save(key))
    }

    /// See [`StateManager::save_sync`].
    pub fn save_sync<E: StateEntity>(&self, key: &str) -> Result<bool, StateError> {
        self.manager::<E>()?.save_sync(key)
    }

    /// See [`StateManager::unload`].
    pub fn unload<E: StateEntity>(&self, key: &str) -> Result<bool, StateError> {
        Ok(self.manager::<E>()?.unload(key))
    }

    /// See [`StateManager::delete`].
    pub fn delete<E: StateEntity>(&self, key: &str) -> Result<(), StateError> {
        self.manager::<E>()?.delete(key)
    }

    /// See [`StateManager::exists`].
    pub fn exists<E: StateEntity>(&self, key: &str) -> Result<bool, StateError> {
        Ok(self.manager::<E>()?.exists(key))
    }

    /// See [`StateManager::save_all_dirty`].
    pub fn save_all_dirty<E: StateEntity>(&self) -> Result<usize, StateError> {
        Ok(self.manager::<E>()?.save_all_dirty())
    }

    /// See [`StateManager::save_all`].
    pub fn save_all<E: StateEntity>(&self) -> Result<usize, StateError> {
        Ok(self.manager::<E>()?.save_all())
    }

    /// See [`StateManager::stats`].
    pub fn stats<E: StateEntity>(&self) -> Result<ManagerStats, StateError> {
        Ok(self.manager::<E>()?.stats())
    }

    /// Unload `key` from every type that has it resident. Returns how many
    /// types did.
    pub fn unload_all(&self, key: &str) -> usize {
        let managers: Vec<Arc<dyn ManagedType>> = lock(&self.registry)
            .values()
            .map(|registration| Arc::clone(&registration.erased))
            .collect();
        managers
            .iter()
            .filter(|manager| manager.unload_if_cached(key))
            .count()
    }

    // =========================================================================
    // Global entities
    // =========================================================================

    /// The single instance of `E`, stored under [`GLOBAL_KEY`]. Registers
    /// `E` for `owner` when needed. `E`'s identity must accept that key.
    pub fn global<E: StateEntity>(&self, owner: OwnerId) -> Result<Arc<E>, StateError> {
        self.register::<E>(owner)?;
        self.get_or_create::<E>(GLOBAL_KEY)
    }

    /// Load the single instance of `E`, registering `E` for `owner` when
    /// needed.
    pub fn load_global<E: StateEntity>(
        &self,
        owner: OwnerId,
        callback: impl FnOnce(Arc<E>) + Send + 'static,
    ) -> Result<(), StateError> {
        self.register::<E>(owner)?;
        self.load::<E>(GLOBAL_KEY, callback)
    }

    /// Queue a write of the single instance of `E`.
    pub fn save_global<E: StateEntity>(&self) -> Result<bool, StateError> {
        self.save::<E>(GLOBAL_KEY)
    }

    // =========================================================================
    // Shutdown
    // =========================================================================

    /// Shut down every manager and forget every registration.
    pub fn shutdown(&self) {
        let managers = self.take(|_| true);
        for manager in &managers {
            manager.shutdown();
        }
        tracing::info!(types = managers.len(), "state store shut down");
    }

    /// Shut down and forget the managers `owner` registered. Returns how
    /// many there were.
    pub fn shutdown_owner(&self, owner: OwnerId) -> usize {
        let managers = self.take(|registration| registration.owner == owner);
        for manager in &managers {
            manager.shutdown();
        }
        tracing::info!(%owner, types = managers.len(), "owner's state types shut down");
        managers.len()
    }

    fn take(&self, select: impl Fn(&Registration) -> bool) -> Vec<Arc<dyn ManagedType>> {
        let mut registry = lock(&self.registry);
        let ids: Vec<TypeId> = registry
            .iter()
            .filter(|(_, registration)| select(registration))
            .map(|(id, _)| *id)
            .collect();
        ids.iter()
            .filter_map(|id| registry.remove(id))
            .map(|registration| registration.erased)
            .collect()
    }
}

impl fmt::Debug for StateStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateStore")
            .field("config", &self.config)
            .field("types", &self.registered_types())
            .finish_non_exhaustive()
    }
}
