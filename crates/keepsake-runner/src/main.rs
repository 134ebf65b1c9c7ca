//! Demo host for the Keepsake state store.
//!
//! Runs a handful of player sessions against file-backed storage so the
//! whole lifecycle is visible in the logs and on disk: load, mutate, save,
//! autosave, shutdown flush. Running it twice picks up where the first run
//! stopped.
//!
//! # Startup Sequence
//!
//! 1. Load configuration from `keepsake-config.yaml`
//! 2. Initialize structured logging (tracing)
//! 3. Start the scheduler's main loop on the tokio runtime
//! 4. Open the store over the configured data directory
//! 5. Load the server totals, then each player's profile
//! 6. Play one session per player and queue the saves
//! 7. Shut the store down, flushing every cached entity

mod error;
mod profile;

use std::path::Path;
use std::sync::Arc;

use keepsake_sched::{Scheduler, TokioScheduler};
use keepsake_state::{OwnerId, StateEntity, StateStore, StoreConfig};
use tokio::sync::oneshot;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use crate::error::RunnerError;
use crate::profile::{Profile, ServerStats};

/// Configuration file read from the working directory.
const CONFIG_FILE: &str = "keepsake-config.yaml";

/// Player name, coins earned and item found in this run's sessions.
const SESSIONS: &[(&str, i64, &str)] = &[
    ("ada", 120, "potion"),
    ("grace", 480, "star-chart"),
    ("linus", 75, "rope"),
];

/// Application entry point for the runner.
///
/// # Errors
///
/// Returns an error if configuration, the runtime, or a store operation
/// fails.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Load configuration.
    let (config, from_file) = match load_config()? {
        Some(config) => (config, true),
        None => (StoreConfig::default(), false),
    };

    // 2. Initialize structured logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.logging.level)),
        )
        .with_target(true)
        .init();

    info!("keepsake-runner starting");
    if !from_file {
        info!("Config file not found, using defaults");
    }
    info!(
        root = %config.storage.root.display(),
        autosave = config.autosave.enabled,
        shutdown_timeout_ms = config.io.shutdown_timeout_ms,
        "Configuration loaded"
    );

    // 3. Start the main loop.
    let (scheduler, main_loop) =
        TokioScheduler::from_current().ok_or_else(|| RunnerError::Runtime {
            message: "no tokio runtime on the calling task".to_owned(),
        })?;
    let main_task = tokio::spawn(main_loop.run());
    let scheduler: Arc<dyn Scheduler> = Arc::new(scheduler);

    // 4. Open the store.
    let store = Arc::new(StateStore::with_file_storage(scheduler, config));
    let owner = OwnerId::new();
    store.register::<Profile>(owner)?;
    info!(%owner, types = ?store.registered_types(), "State types registered");

    // 5-6. Load, play, save.
    let stats = load_global::<ServerStats>(&store, owner).await?;
    info!(
        sessions = stats.sessions.get(),
        players = stats.roster.len(),
        "Server totals loaded"
    );

    for &(name, reward, loot) in SESSIONS {
        let key = profile::enroll(&stats, name).to_string();
        let player = load::<Profile>(&store, &key).await?;
        let _rank = profile::bind_rank(&player);
        let standing = profile::standing(&player);
        player.name.set(name.to_owned());

        profile::play_session(&player, &stats, reward, loot);
        store.save::<Profile>(&key)?;
        info!(
            player = %standing.get(),
            coins = player.coins.get(),
            achievements = player.achievements.len(),
            "Session finished"
        );
    }
    store.save_global::<ServerStats>()?;

    let cache = store.stats::<Profile>()?;
    info!(
        cached = cache.cached,
        dirty = cache.dirty,
        pending_io = cache.pending_io,
        "Profile cache"
    );

    // 7. Shut down. The flush blocks, so keep it off the async workers.
    let closing = Arc::clone(&store);
    tokio::task::spawn_blocking(move || closing.shutdown())
        .await
        .map_err(|e| RunnerError::Runtime {
            message: format!("shutdown task failed: {e}"),
        })?;
    main_task.abort();

    info!(
        sessions = stats.sessions.get(),
        coins_awarded = stats.coins_awarded.get(),
        "keepsake-runner stopped"
    );
    Ok(())
}

/// Load configuration from `keepsake-config.yaml` when it exists.
fn load_config() -> Result<Option<StoreConfig>, RunnerError> {
    let config_path = Path::new(CONFIG_FILE);
    if config_path.exists() {
        Ok(Some(StoreConfig::from_file(config_path)?))
    } else {
        Ok(None)
    }
}

/// Load `key` through the store and wait for the main-loop callback.
async fn load<E: StateEntity>(store: &StateStore, key: &str) -> Result<Arc<E>, RunnerError> {
    let (tx, rx) = oneshot::channel();
    store.load::<E>(key, deliver(tx))?;
    receive(rx, key).await
}

/// Load the global instance of `E`, registering it for `owner`.
async fn load_global<E: StateEntity>(
    store: &StateStore,
    owner: OwnerId,
) -> Result<Arc<E>, RunnerError> {
    let (tx, rx) = oneshot::channel();
    store.load_global::<E>(owner, deliver(tx))?;
    receive(rx, E::SCHEMA.namespace).await
}

fn deliver<E: StateEntity>(tx: oneshot::Sender<Arc<E>>) -> impl FnOnce(Arc<E>) + Send + 'static {
    move |entity| {
        if tx.send(entity).is_err() {
            debug!(namespace = E::SCHEMA.namespace, "load finished after its caller gave up");
        }
    }
}

async fn receive<E>(rx: oneshot::Receiver<Arc<E>>, what: &str) -> Result<Arc<E>, RunnerError> {
    rx.await.map_err(|_closed| RunnerError::Runtime {
        message: format!("load of {what} was dropped before completing"),
    })
}
