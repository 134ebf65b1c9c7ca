//! Player profiles and server-wide counters.
//!
//! [`Profile`] is one state entity per player, keyed by UUID. [`ServerStats`]
//! is a global entity holding the player roster and totals across every
//! session the runner has hosted.

use std::time::Duration;

use chrono::{DateTime, Utc};
use keepsake_reactive::{Reactive, ReactiveList, ReactiveMap, Subscription};
use keepsake_state::{Backend, StateSchema, name_codec, state_entity};
use uuid::Uuid;

/// Coins needed to reach [`Rank::Veteran`].
pub const VETERAN_COINS: i64 = 500;

/// Coins needed to reach [`Rank::Legend`].
pub const LEGEND_COINS: i64 = 5_000;

/// Achievement granted on a player's first session.
pub const FIRST_SESSION: &str = "first-session";

// =============================================================================
// Rank
// =============================================================================

/// Standing derived from a player's coin balance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum Rank {
    /// Below [`VETERAN_COINS`].
    #[default]
    Novice,
    /// At least [`VETERAN_COINS`].
    Veteran,
    /// At least [`LEGEND_COINS`].
    Legend,
}

name_codec!(Rank { Novice, Veteran, Legend });

impl Rank {
    /// The rank a balance of `coins` earns.
    pub const fn for_coins(coins: i64) -> Self {
        if coins >= LEGEND_COINS {
            Self::Legend
        } else if coins >= VETERAN_COINS {
            Self::Veteran
        } else {
            Self::Novice
        }
    }
}

// =============================================================================
// Entities
// =============================================================================

/// Persistent data for one player.
#[derive(Default)]
pub struct Profile {
    /// Player id; the storage key.
    pub id: Uuid,
    /// Display name.
    pub name: Reactive<String>,
    /// Coin balance.
    pub coins: Reactive<i64>,
    /// Rank earned by the balance. Kept in step by [`bind_rank`].
    pub rank: Reactive<Rank>,
    /// Achievement names in the order they were earned.
    pub achievements: ReactiveList<String>,
    /// Item name to count.
    pub inventory: ReactiveMap<String, u32>,
    /// End of the most recent session.
    pub last_seen: Reactive<Option<DateTime<Utc>>>,
}

state_entity!(
    Profile,
    schema: StateSchema::new("profiles").autosave(Duration::from_secs(60)),
    identity: id,
    fields: [name, coins, rank, achievements, inventory, last_seen],
);

/// Totals across every session, stored once per server.
#[derive(Default)]
pub struct ServerStats {
    /// Always the global key.
    pub key: String,
    /// Sessions hosted.
    pub sessions: Reactive<u64>,
    /// Coins handed out by sessions.
    pub coins_awarded: Reactive<i64>,
    /// Player name to profile id.
    pub roster: ReactiveMap<String, Uuid>,
}

state_entity!(
    ServerStats,
    schema: StateSchema::new("server").backend(Backend::Json),
    identity: key,
    fields: [sessions, coins_awarded, roster],
);

// =============================================================================
// Behavior
// =============================================================================

/// Keep `profile.rank` in step with `profile.coins` from now on.
///
/// Loading restores fields silently, so the stored rank stands until the
/// balance next changes.
pub fn bind_rank(profile: &Profile) -> Subscription {
    let rank = profile.rank.clone();
    profile
        .coins
        .on_change(move |_, coins| rank.set(Rank::for_coins(*coins)))
}

/// A read-only `"name (rank)"` label that follows both fields.
pub fn standing(profile: &Profile) -> Reactive<String> {
    Reactive::combine(&profile.name, &profile.rank, |name, rank| format!("{name} ({rank:?})"))
}

/// The profile id for `name`, assigning a fresh one on first sight.
pub fn enroll(stats: &ServerStats, name: &str) -> Uuid {
    let name = name.to_owned();
    if let Some(id) = stats.roster.get(&name) {
        return id;
    }
    let id = Uuid::now_v7();
    stats.roster.insert(name, id);
    id
}

/// Credit one finished session worth `reward` coins.
pub fn play_session(profile: &Profile, stats: &ServerStats, reward: i64, loot: &str) {
    if !profile.achievements.contains(&FIRST_SESSION.to_owned()) {
        profile.achievements.push(FIRST_SESSION.to_owned());
    }
    profile.coins.add(reward);
    let held = profile.inventory.get_or(&loot.to_owned(), 0);
    profile.inventory.insert(loot.to_owned(), held.saturating_add(1));
    profile.last_seen.set(Some(Utc::now()));

    stats.sessions.increment();
    stats.coins_awarded.add(reward);
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use keepsake_sched::{ManualScheduler, Scheduler};
    use keepsake_state::{DocumentStore, MemoryStore, OwnerId, StateStore, StoreConfig};

    use super::*;

    fn store() -> (Arc<ManualScheduler>, Arc<MemoryStore>, StateStore) {
        let manual = Arc::new(ManualScheduler::new());
        let memory = Arc::new(MemoryStore::new());
        let scheduler: Arc<dyn Scheduler> = Arc::<ManualScheduler>::clone(&manual);
        let storage: Arc<dyn DocumentStore> = Arc::<MemoryStore>::clone(&memory);
        (manual, memory, StateStore::new(scheduler, storage, StoreConfig::default()))
    }

    #[test]
    fn rank_thresholds() {
        assert_eq!(Rank::for_coins(-3), Rank::Novice);
        assert_eq!(Rank::for_coins(VETERAN_COINS), Rank::Veteran);
        assert_eq!(Rank::for_coins(LEGEND_COINS.saturating_add(1)), Rank::Legend);
    }

    #[test]
    fn bound_rank_follows_coins() {
        let profile = Profile::default();
        let _binding = bind_rank(&profile);
        let label = standing(&profile);
        profile.name.set("ada".to_owned());

        profile.coins.add(VETERAN_COINS);

        assert_eq!(profile.rank.get(), Rank::Veteran);
        assert_eq!(label.get(), "ada (Veteran)");
    }

    #[test]
    fn enroll_is_stable_per_name() {
        let stats = ServerStats::default();
        let ada = enroll(&stats, "ada");
        assert_eq!(enroll(&stats, "ada"), ada);
        assert_ne!(enroll(&stats, "grace"), ada);
        assert_eq!(stats.roster.len(), 2);
    }

    #[test]
    fn session_updates_profile_and_totals() {
        let profile = Profile::default();
        let stats = ServerStats::default();

        play_session(&profile, &stats, 40, "potion");
        play_session(&profile, &stats, 60, "potion");

        assert_eq!(profile.coins.get(), 100);
        assert_eq!(profile.achievements.to_vec(), vec![FIRST_SESSION.to_owned()]);
        assert_eq!(profile.inventory.get(&"potion".to_owned()), Some(2));
        assert!(profile.last_seen.get().is_some());
        assert_eq!(stats.sessions.get(), 2);
        assert_eq!(stats.coins_awarded.get(), 100);
    }

    #[test]
    fn profile_survives_unload_and_reload() {
        let (manual, memory, store) = store();
        let owner = OwnerId::new();
        store.register::<Profile>(owner).unwrap();
        let stats = store.global::<ServerStats>(owner).unwrap();
        let key = enroll(&stats, "ada").to_string();

        let profile = store.get_or_create::<Profile>(&key).unwrap();
        let _binding = bind_rank(&profile);
        play_session(&profile, &stats, LEGEND_COINS, "crown");
        assert!(store.unload::<Profile>(&key).unwrap());
        assert!(store.save_global::<ServerStats>().unwrap());
        manual.run_pending();

        let stored = memory.document("server", keepsake_state::GLOBAL_KEY, Backend::Json);
        assert!(stored.is_some());

        let reloaded = store.load_sync::<Profile>(&key).unwrap();
        assert_eq!(reloaded.coins.get(), LEGEND_COINS);
        assert_eq!(reloaded.rank.get(), Rank::Legend);
        assert_eq!(reloaded.inventory.get(&"crown".to_owned()), Some(1));
        store.shutdown();
    }
}
