//! Cache and persistence engine for one entity type.
//!
//! A [`StateManager<E>`] owns the resident instances of `E`, keyed by their
//! identity string, together with the aggregate version recorded at each
//! entity's last save. An entity is dirty when its current aggregate
//! version differs from the recorded one, or when it was created and never
//! saved.
//!
//! Storage work goes through a per-manager [`IoLane`] so that writes reach
//! storage in the order they were issued. Asynchronous completions come back
//! to the main context through [`Scheduler::run_now`].

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use keepsake_sched::{Scheduler, TaskHandle};
use serde::Serialize;

use crate::config::StoreConfig;
use crate::document::Document;
use crate::entity::StateEntity;
use crate::error::{StateError, StorageError};
use crate::lane::IoLane;
use crate::lock;
use crate::serializer::{aggregate_version, assign_identity, deserialize, serialize, teardown};
use crate::storage::{DocumentStore, validate_key};

struct CacheEntry<E> {
    entity: Arc<E>,
    /// Aggregate version at the last save or load; `None` until the entity
    /// has been saved once.
    saved_version: Option<u64>,
}

impl<E: StateEntity> CacheEntry<E> {
    fn is_dirty(&self) -> bool {
        self.saved_version != Some(aggregate_version(self.entity.as_ref()))
    }
}

/// Point-in-time counters for one manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ManagerStats {
    /// The entity type's namespace.
    pub namespace: &'static str,
    /// Resident entities.
    pub cached: usize,
    /// Resident entities with unsaved changes.
    pub dirty: usize,
    /// Storage jobs waiting on the I/O lane.
    pub pending_io: usize,
    /// When the last autosave pass ran.
    pub last_autosave: Option<DateTime<Utc>>,
}

/// Cache and persistence for entities of type `E`.
pub struct StateManager<E: StateEntity> {
    scheduler: Arc<dyn Scheduler>,
    store: Arc<dyn DocumentStore>,
    lane: Arc<IoLane>,
    cache: Mutex<HashMap<String, CacheEntry<E>>>,
    autosave: Mutex<Option<TaskHandle>>,
    last_autosave: Mutex<Option<DateTime<Utc>>>,
    shutdown_timeout: Duration,
    shut_down: AtomicBool,
}

impl<E: StateEntity> StateManager<E> {
    /// Build a manager and start its autosave timer.
    ///
    /// Autosave runs every `E::SCHEMA.autosave` unless the interval is zero
    /// or `config.autosave.enabled` is false.
    ///
    /// # Errors
    ///
    /// [`StateError::Configuration`] when the schema's namespace cannot name
    /// a storage directory.
    pub fn new(
        scheduler: Arc<dyn Scheduler>,
        store: Arc<dyn DocumentStore>,
        config: &StoreConfig,
    ) -> Result<Arc<Self>, StateError> {
        E::SCHEMA
            .validate()
            .map_err(|reason| StateError::Configuration {
                type_name: std::any::type_name::<E>(),
                reason,
            })?;

        let manager = Arc::new(Self {
            lane: IoLane::new(Arc::clone(&scheduler)),
            scheduler,
            store,
            cache: Mutex::new(HashMap::new()),
            autosave: Mutex::new(None),
            last_autosave: Mutex::new(None),
            shutdown_timeout: config.shutdown_timeout(),
            shut_down: AtomicBool::new(false),
        });

        let interval = if config.autosave.enabled {
            E::SCHEMA.autosave
        } else {
            Duration::ZERO
        };
        if !interval.is_zero() {
            let weak = Arc::downgrade(&manager);
            let handle = manager.scheduler.run_periodic(
                interval,
                interval,
                Box::new(move || {
                    if let Some(manager) = weak.upgrade() {
                        manager.autosave_pass();
                    }
                }),
            );
            *lock(&manager.autosave) = Some(handle);
        }

        tracing::debug!(
            namespace = E::SCHEMA.namespace,
            backend = E::SCHEMA.backend.extension(),
            autosave_secs = interval.as_secs(),
            "state manager ready"
        );
        Ok(manager)
    }

    /// The entity type's namespace.
    pub const fn namespace(&self) -> &'static str {
        E::SCHEMA.namespace
    }

    // =========================================================================
    // Cache access
    // =========================================================================

    /// The resident instance for `key`, or a fresh default one with its
    /// identity set. A fresh instance is dirty until first saved. No I/O.
    ///
    /// After [`shutdown`](Self::shutdown) the fresh instance is handed back
    /// without being cached; nothing would ever save it.
    pub fn get_or_create(&self, key: &str) -> Result<Arc<E>, StateError> {
        let mut cache = lock(&self.cache);
        if let Some(entry) = cache.get(key) {
            return Ok(Arc::clone(&entry.entity));
        }
        let entity = Arc::new(instantiate::<E>(key)?);
        if self.is_shut_down() {
            return Ok(entity);
        }
        cache.insert(
            key.to_owned(),
            CacheEntry {
                entity: Arc::clone(&entity),
                saved_version: None,
            },
        );
        Ok(entity)
    }

    /// The resident instance for `key`, if any. No I/O.
    pub fn get(&self, key: &str) -> Option<Arc<E>> {
        lock(&self.cache)
            .get(key)
            .map(|entry| Arc::clone(&entry.entity))
    }

    /// Keys of every resident entity, sorted.
    pub fn cached_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = lock(&self.cache).keys().cloned().collect();
        keys.sort_unstable();
        keys
    }

    /// Whether `key` is resident or stored. A storage error counts as
    /// absent.
    pub fn exists(&self, key: &str) -> bool {
        if lock(&self.cache).contains_key(key) {
            return true;
        }
        match self
            .store
            .exists(E::SCHEMA.namespace, key, E::SCHEMA.backend)
        {
            Ok(found) => found,
            Err(err) => {
                tracing::warn!(namespace = E::SCHEMA.namespace, key, error = %err, "existence check failed");
                false
            }
        }
    }

    /// Every key that is resident or stored.
    pub fn stored_keys(&self) -> Result<BTreeSet<String>, StateError> {
        let mut keys: BTreeSet<String> = lock(&self.cache).keys().cloned().collect();
        keys.extend(self.store.keys(E::SCHEMA.namespace)?);
        Ok(keys)
    }

    // =========================================================================
    // Loading
    // =========================================================================

    /// Load `key` and hand it to `callback` on the main context.
    ///
    /// A resident entity is handed over immediately, on the caller's
    /// context. Otherwise the read runs on the I/O lane. A missing or
    /// unreadable document yields defaults. If the key became resident
    /// while the read was in flight, the resident instance wins.
    pub fn load(
        self: &Arc<Self>,
        key: &str,
        callback: impl FnOnce(Arc<E>) + Send + 'static,
    ) -> Result<(), StateError> {
        if let Some(entity) = self.get(key) {
            callback(entity);
            return Ok(());
        }
        let fresh = instantiate::<E>(key)?;

        let manager = Arc::clone(self);
        let key = key.to_owned();
        self.lane.submit(Box::new(move || {
            let read = manager.read(&key);
            let scheduler = Arc::clone(&manager.scheduler);
            scheduler.run_now(Box::new(move || {
                let entity = manager.admit(fresh, &key, read);
                callback(entity);
            }));
        }));
        Ok(())
    }

    /// Blocking [`load`](Self::load). Call from a background context only.
    pub fn load_sync(&self, key: &str) -> Result<Arc<E>, StateError> {
        if let Some(entity) = self.get(key) {
            return Ok(entity);
        }
        let fresh = instantiate::<E>(key)?;
        let read = self.lane.run_exclusive(|| self.read(key));
        Ok(self.admit(fresh, key, read))
    }

    fn read(&self, key: &str) -> Result<Option<Document>, StorageError> {
        self.store
            .read(E::SCHEMA.namespace, key, E::SCHEMA.backend)
    }

    /// Apply a read result to `fresh` and make it resident, unless another
    /// instance got there first.
    fn admit(&self, mut fresh: E, key: &str, read: Result<Option<Document>, StorageError>) -> Arc<E> {
        match read {
            Ok(Some(document)) => {
                let skipped = deserialize(&mut fresh, &document);
                tracing::debug!(
                    namespace = E::SCHEMA.namespace,
                    key,
                    fields = document.len(),
                    skipped = skipped.len(),
                    "entity loaded"
                );
            }
            Ok(None) => {
                tracing::debug!(namespace = E::SCHEMA.namespace, key, "no stored document, using defaults");
            }
            Err(err) => {
                tracing::warn!(
                    namespace = E::SCHEMA.namespace,
                    key,
                    error = %err,
                    "load failed, using defaults"
                );
            }
        }

        let mut cache = lock(&self.cache);
        if self.is_shut_down() {
            return Arc::new(fresh);
        }
        if let Some(resident) = cache.get(key) {
            tracing::debug!(namespace = E::SCHEMA.namespace, key, "resident instance wins over load");
            return Arc::clone(&resident.entity);
        }
        let version = aggregate_version(&fresh);
        let entity = Arc::new(fresh);
        cache.insert(
            key.to_owned(),
            CacheEntry {
                entity: Arc::clone(&entity),
                saved_version: Some(version),
            },
        );
        entity
    }

    // =========================================================================
    // Saving
    // =========================================================================

    /// Queue a write of `key`. Returns `false` when it is not resident.
    ///
    /// The current aggregate version is recorded as saved before the write
    /// is queued; a failed write is logged and not retried.
    pub fn save(self: &Arc<Self>, key: &str) -> bool {
        let Some(document) = self.capture(key) else {
            return false;
        };
        self.queue_write(key.to_owned(), document);
        true
    }

    /// Write `key` now, after any queued storage work. Returns `false` when
    /// it is not resident. Call from a background context only.
    pub fn save_sync(&self, key: &str) -> Result<bool, StateError> {
        let Some(document) = self.capture(key) else {
            return Ok(false);
        };
        self.lane.run_exclusive(|| self.write(key, &document))?;
        Ok(true)
    }

    /// Queue a write of every resident entity with unsaved changes.
    /// Returns how many were queued.
    pub fn save_all_dirty(self: &Arc<Self>) -> usize {
        let dirty: Vec<String> = lock(&self.cache)
            .iter()
            .filter(|(_, entry)| entry.is_dirty())
            .map(|(key, _)| key.clone())
            .collect();
        dirty.iter().filter(|key| self.save(key)).count()
    }

    /// Queue a write of every resident entity. Returns how many were
    /// queued.
    pub fn save_all(self: &Arc<Self>) -> usize {
        self.cached_keys()
            .iter()
            .filter(|key| self.save(key))
            .count()
    }

    fn autosave_pass(self: &Arc<Self>) {
        let saved = self.save_all_dirty();
        *lock(&self.last_autosave) = Some(Utc::now());
        if saved > 0 {
            tracing::debug!(namespace = E::SCHEMA.namespace, saved, "autosave");
        }
    }

    /// Serialize `key` and record its version as saved.
    fn capture(&self, key: &str) -> Option<Document> {
        let mut cache = lock(&self.cache);
        let entry = cache.get_mut(key)?;
        let version = aggregate_version(entry.entity.as_ref());
        let document = serialize(entry.entity.as_ref());
        entry.saved_version = Some(version);
        Some(document)
    }

    fn queue_write(self: &Arc<Self>, key: String, document: Document) {
        let manager = Arc::clone(self);
        self.lane.submit(Box::new(move || {
            if let Err(err) = manager.write(&key, &document) {
                tracing::warn!(
                    namespace = E::SCHEMA.namespace,
                    key = key.as_str(),
                    error = %err,
                    "save failed"
                );
            }
        }));
    }

    fn write(&self, key: &str, document: &Document) -> Result<(), StorageError> {
        write_document::<E>(self.store.as_ref(), key, document)
    }

    // =========================================================================
    // Eviction
    // =========================================================================

    /// Queue a save, evict and release the entity's observers. Returns
    /// `false` when `key` was not resident.
    pub fn unload(self: &Arc<Self>, key: &str) -> bool {
        if !self.save(key) {
            return false;
        }
        let evicted = lock(&self.cache).remove(key);
        if let Some(entry) = evicted {
            teardown(entry.entity.as_ref());
            tracing::debug!(namespace = E::SCHEMA.namespace, key, "entity unloaded");
        }
        true
    }

    /// Evict `key` without saving and remove its stored document. The
    /// removal is queued behind any pending write of this manager.
    pub fn delete(self: &Arc<Self>, key: &str) -> Result<(), StateError> {
        validate_key(key).map_err(|err| StateError::InvalidKey {
            key: key.to_owned(),
            reason: err.to_string(),
        })?;
        let evicted = lock(&self.cache).remove(key);
        if let Some(entry) = evicted {
            teardown(entry.entity.as_ref());
        }

        let manager = Arc::clone(self);
        let key = key.to_owned();
        self.lane.submit(Box::new(move || {
            match manager
                .store
                .remove(E::SCHEMA.namespace, &key, E::SCHEMA.backend)
            {
                Ok(existed) => {
                    tracing::debug!(namespace = E::SCHEMA.namespace, key = key.as_str(), existed, "entity deleted");
                }
                Err(err) => {
                    tracing::warn!(namespace = E::SCHEMA.namespace, key = key.as_str(), error = %err, "delete failed");
                }
            }
        }));
        Ok(())
    }

    // =========================================================================
    // Introspection and shutdown
    // =========================================================================

    /// Current counters.
    pub fn stats(&self) -> ManagerStats {
        let (cached, dirty) = {
            let cache = lock(&self.cache);
            (cache.len(), cache.values().filter(|entry| entry.is_dirty()).count())
        };
        ManagerStats {
            namespace: E::SCHEMA.namespace,
            cached,
            dirty,
            pending_io: self.lane.pending(),
            last_autosave: *lock(&self.last_autosave),
        }
    }

    /// Whether [`shutdown`](Self::shutdown) has run.
    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    /// Stop autosave and queue a final write of every resident entity
    /// behind whatever the lane already holds, then empty the cache.
    /// Idempotent.
    ///
    /// Waits at most `io.shutdown_timeout_ms` for the final writes. Past
    /// that they stay queued and still land after every earlier write.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(handle) = lock(&self.autosave).take() {
            handle.cancel();
        }

        let entries: Vec<(String, CacheEntry<E>)> = lock(&self.cache).drain().collect();
        let documents: Vec<(String, Document)> = entries
            .iter()
            .map(|(key, entry)| (key.clone(), serialize(entry.entity.as_ref())))
            .collect();
        let total = documents.len();

        let store = Arc::clone(&self.store);
        let flush = move || {
            documents
                .iter()
                .filter(|(key, document)| match write_document::<E>(store.as_ref(), key, document) {
                    Ok(()) => true,
                    Err(err) => {
                        tracing::warn!(
                            namespace = E::SCHEMA.namespace,
                            key = key.as_str(),
                            error = %err,
                            "final save failed"
                        );
                        false
                    }
                })
                .count()
        };
        match self.lane.run_queued_within(self.shutdown_timeout, flush) {
            Some(written) => tracing::info!(
                namespace = E::SCHEMA.namespace,
                written,
                total,
                "state manager shut down"
            ),
            None => tracing::warn!(
                namespace = E::SCHEMA.namespace,
                pending = total,
                timeout = ?self.shutdown_timeout,
                "state manager shut down with final writes still queued on the I/O lane"
            ),
        }

        for (_, entry) in &entries {
            teardown(entry.entity.as_ref());
        }
    }
}

impl<E: StateEntity> Drop for StateManager<E> {
    fn drop(&mut self) {
        if let Some(handle) = lock(&self.autosave).take() {
            handle.cancel();
        }
    }
}

fn write_document<E: StateEntity>(
    store: &dyn DocumentStore,
    key: &str,
    document: &Document,
) -> Result<(), StorageError> {
    store.write(E::SCHEMA.namespace, key, E::SCHEMA.backend, document)?;
    tracing::debug!(namespace = E::SCHEMA.namespace, key, fields = document.len(), "entity saved");
    Ok(())
}

/// A default entity with its identity parsed from `key`.
fn instantiate<E: StateEntity>(key: &str) -> Result<E, StateError> {
    validate_key(key).map_err(|err| StateError::InvalidKey {
        key: key.to_owned(),
        reason: err.to_string(),
    })?;
    let mut entity = E::default();
    assign_identity(&mut entity, key)?;
    Ok(entity)
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use std::sync::mpsc::{self, Receiver, Sender};
    use std::thread;

    use keepsake_reactive::{Reactive, ReactiveList};
    use keepsake_sched::ManualScheduler;
    use serde_json::json;

    use super::*;
    use crate::entity::StateSchema;
    use crate::storage::{Backend, MemoryStore};

    #[derive(Default)]
    struct Counter {
        name: String,
        hits: Reactive<u64>,
        log: ReactiveList<String>,
    }

    crate::state_entity!(
        Counter,
        schema: StateSchema::new("counters").autosave(Duration::from_secs(10)),
        identity: name,
        fields: [hits, log],
    );

    struct Rig {
        manual: Arc<ManualScheduler>,
        store: Arc<MemoryStore>,
        manager: Arc<StateManager<Counter>>,
    }

    fn rig(config: &StoreConfig) -> Rig {
        let manual = Arc::new(ManualScheduler::new());
        let store = Arc::new(MemoryStore::new());
        let scheduler: Arc<dyn Scheduler> = Arc::clone(&manual) as Arc<dyn Scheduler>;
        let storage: Arc<dyn DocumentStore> = Arc::clone(&store) as Arc<dyn DocumentStore>;
        let manager = StateManager::new(scheduler, storage, config).expect("manager");
        Rig {
            manual,
            store,
            manager,
        }
    }

    fn stored_hits(store: &MemoryStore, key: &str) -> Option<serde_json::Value> {
        store
            .document("counters", key, Backend::Yaml)
            .and_then(|doc| doc.get("hits").cloned())
    }

    #[test]
    fn get_or_create_is_dirty_until_saved() {
        let rig = rig(&StoreConfig::default());
        let first = rig.manager.get_or_create("a").expect("create");
        let again = rig.manager.get_or_create("a").expect("create");
        assert!(Arc::ptr_eq(&first, &again));
        assert_eq!(first.name, "a");
        assert_eq!(rig.manager.stats().dirty, 1);

        assert_eq!(rig.manager.save_all_dirty(), 1);
        rig.manual.run_pending();
        assert_eq!(rig.store.writes(), 1);
        assert_eq!(rig.manager.stats().dirty, 0);
    }

    #[test]
    fn async_load_applies_document_on_main_context() {
        let rig = rig(&StoreConfig::default());
        let mut doc = Document::new();
        doc.insert("hits", json!(41));
        rig.store
            .write("counters", "k", Backend::Yaml, &doc)
            .expect("seed");

        let seen = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&seen);
        rig.manager
            .load("k", move |entity| *lock(&slot) = Some(entity.hits.get()))
            .expect("load");
        assert!(lock(&seen).is_none());

        rig.manual.run_pending();

        assert_eq!(*lock(&seen), Some(41));
        assert_eq!(rig.manager.stats().dirty, 0);
        assert_eq!(rig.manager.save_all_dirty(), 0);
    }

    #[test]
    fn resident_instance_wins_over_in_flight_load() {
        let rig = rig(&StoreConfig::default());
        let loaded = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&loaded);
        rig.manager
            .load("k", move |entity| *lock(&slot) = Some(entity))
            .expect("load");
        let resident = rig.manager.get_or_create("k").expect("create");

        rig.manual.run_pending();

        let loaded = lock(&loaded).take().expect("callback ran");
        assert!(Arc::ptr_eq(&loaded, &resident));
    }

    #[test]
    fn failed_read_falls_back_to_defaults() {
        let rig = rig(&StoreConfig::default());
        rig.store.set_failing(true);

        let entity = rig.manager.load_sync("k").expect("load");

        assert_eq!(entity.hits.get(), 0);
        assert_eq!(rig.manager.cached_keys(), ["k"]);
    }

    #[test]
    fn failed_async_save_keeps_recorded_version() {
        let rig = rig(&StoreConfig::default());
        let entity = rig.manager.get_or_create("k").expect("create");
        entity.hits.set(3);
        rig.store.set_failing(true);

        assert!(rig.manager.save("k"));
        rig.manual.run_pending();

        assert_eq!(rig.store.writes(), 0);
        assert_eq!(rig.manager.stats().dirty, 0);
        assert!(rig.manager.save_sync("k").is_err());
    }

    #[test]
    fn writes_reach_storage_in_order() {
        let rig = rig(&StoreConfig::default());
        let entity = rig.manager.get_or_create("k").expect("create");
        entity.hits.set(1);
        rig.manager.save("k");
        entity.hits.set(2);
        rig.manager.save("k");

        rig.manual.run_pending();

        assert_eq!(stored_hits(&rig.store, "k"), Some(json!(2)));
    }

    #[test]
    fn autosave_writes_only_dirty_entities() {
        let rig = rig(&StoreConfig::default());
        let a = rig.manager.get_or_create("a").expect("create");
        rig.manager.get_or_create("b").expect("create");
        rig.manager.save_all();
        rig.manual.run_pending();
        assert_eq!(rig.store.writes(), 2);

        a.hits.increment();
        rig.manual.advance(Duration::from_secs(10));

        assert_eq!(rig.store.writes(), 3);
        assert!(rig.manager.stats().last_autosave.is_some());
    }

    #[test]
    fn disabled_autosave_never_fires() {
        let mut config = StoreConfig::default();
        config.autosave.enabled = false;
        let rig = rig(&config);
        rig.manager.get_or_create("a").expect("create");

        rig.manual.advance(Duration::from_secs(60));

        assert_eq!(rig.store.writes(), 0);
        assert_eq!(rig.manual.pending_timers(), 0);
    }

    #[test]
    fn unload_saves_evicts_and_tears_down() {
        let rig = rig(&StoreConfig::default());
        let entity = rig.manager.get_or_create("k").expect("create");
        entity.hits.set(9);
        entity.hits.on_change(|_, _| {});

        assert!(rig.manager.unload("k"));
        assert!(!rig.manager.unload("k"));
        rig.manual.run_pending();

        assert!(rig.manager.get("k").is_none());
        assert!(entity.hits.is_destroyed());
        assert_eq!(stored_hits(&rig.store, "k"), Some(json!(9)));
    }

    #[test]
    fn delete_removes_document_after_pending_write() {
        let rig = rig(&StoreConfig::default());
        rig.manager.get_or_create("k").expect("create");
        rig.manager.save("k");
        rig.manager.delete("k").expect("delete");

        rig.manual.run_pending();

        assert!(!rig.manager.exists("k"));
        assert!(rig.manager.delete("../etc").is_err());
    }

    #[test]
    fn stored_keys_merge_cache_and_storage() {
        let rig = rig(&StoreConfig::default());
        rig.store
            .write("counters", "disk", Backend::Yaml, &Document::new())
            .expect("seed");
        rig.manager.get_or_create("memory").expect("create");

        let keys = rig.manager.stored_keys().expect("keys");
        assert_eq!(keys.into_iter().collect::<Vec<_>>(), ["disk", "memory"]);
    }

    #[test]
    fn shutdown_flushes_everything_once() {
        let rig = rig(&StoreConfig::default());
        let entity = rig.manager.get_or_create("k").expect("create");
        entity.hits.set(5);
        rig.manager.save("k");

        rig.manager.shutdown();
        rig.manager.shutdown();

        assert_eq!(rig.store.writes(), 2);
        assert_eq!(stored_hits(&rig.store, "k"), Some(json!(5)));
        assert!(rig.manager.cached_keys().is_empty());
        assert!(rig.manager.is_shut_down());
        assert!(entity.hits.is_destroyed());
    }

    #[test]
    fn get_or_create_after_shutdown_is_not_cached() {
        let rig = rig(&StoreConfig::default());
        rig.manager.shutdown();

        let late = rig.manager.get_or_create("late").expect("create");
        late.hits.set(3);

        assert_eq!(late.name, "late");
        assert!(rig.manager.get("late").is_none());
        assert!(rig.manager.cached_keys().is_empty());
        assert!(!rig.manager.save("late"));
        rig.manual.run_pending();
        assert_eq!(rig.store.writes(), 0);
    }

    /// Holds its first write until released.
    struct GatedStore {
        inner: MemoryStore,
        gate: Mutex<Option<(Sender<()>, Receiver<()>)>>,
    }

    impl DocumentStore for GatedStore {
        fn read(&self, namespace: &str, key: &str, backend: Backend) -> Result<Option<Document>, StorageError> {
            self.inner.read(namespace, key, backend)
        }

        fn write(
            &self,
            namespace: &str,
            key: &str,
            backend: Backend,
            document: &Document,
        ) -> Result<(), StorageError> {
            let gate = lock(&self.gate).take();
            if let Some((started, release)) = gate {
                let _ = started.send(());
                let _ = release.recv();
            }
            self.inner.write(namespace, key, backend, document)
        }

        fn remove(&self, namespace: &str, key: &str, backend: Backend) -> Result<bool, StorageError> {
            self.inner.remove(namespace, key, backend)
        }

        fn exists(&self, namespace: &str, key: &str, backend: Backend) -> Result<bool, StorageError> {
            self.inner.exists(namespace, key, backend)
        }

        fn keys(&self, namespace: &str) -> Result<Vec<String>, StorageError> {
            self.inner.keys(namespace)
        }
    }

    #[test]
    fn shutdown_flush_lands_after_a_stalled_write() {
        let (started_tx, started_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let gated = Arc::new(GatedStore {
            inner: MemoryStore::new(),
            gate: Mutex::new(Some((started_tx, release_rx))),
        });
        let manual = Arc::new(ManualScheduler::new());
        let scheduler: Arc<dyn Scheduler> = Arc::clone(&manual) as Arc<dyn Scheduler>;
        let storage: Arc<dyn DocumentStore> = Arc::clone(&gated) as Arc<dyn DocumentStore>;
        let config = StoreConfig::parse("io:\n  shutdown_timeout_ms: 20\n").expect("config");
        let manager = StateManager::<Counter>::new(scheduler, storage, &config).expect("manager");

        let entity = manager.get_or_create("k").expect("create");
        entity.hits.set(1);
        assert!(manager.save("k"));
        entity.hits.set(2);
        assert!(manager.save("k"));

        let worker = thread::spawn(move || {
            manual.run_pending();
        });
        let _ = started_rx.recv();

        entity.hits.set(3);
        manager.shutdown();
        assert!(gated.inner.document("counters", "k", Backend::Yaml).is_none());

        let _ = release_tx.send(());
        let _ = worker.join();

        let stored = gated
            .inner
            .document("counters", "k", Backend::Yaml)
            .and_then(|doc| doc.get("hits").cloned());
        assert_eq!(stored, Some(json!(3)));
        assert_eq!(gated.inner.writes(), 3);
    }
}
