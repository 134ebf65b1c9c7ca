//! Version polling.
//!
//! Hosts that render on a tick (scoreboards, HUDs) do not need listeners:
//! they keep a [`VersionWatch`] per source and redraw when it reports a
//! change.

use crate::list::ReactiveList;
use crate::map::ReactiveMap;
use crate::value::Reactive;

/// A source with a mutation counter.
pub trait Versioned {
    /// Current mutation counter. Only ever moves forward (wrapping at
    /// `u64::MAX`).
    fn version(&self) -> u64;
}

impl<T> Versioned for Reactive<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    fn version(&self) -> u64 {
        Self::version(self)
    }
}

impl<T> Versioned for ReactiveList<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn version(&self) -> u64 {
        Self::version(self)
    }
}

impl<K, V> Versioned for ReactiveMap<K, V>
where
    K: Ord + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn version(&self) -> u64 {
        Self::version(self)
    }
}

/// Remembers the last version seen of one source.
#[derive(Debug, Clone)]
pub struct VersionWatch<S> {
    source: S,
    seen: u64,
}

impl<S: Versioned> VersionWatch<S> {
    /// Start watching `source` from its current version.
    pub fn new(source: S) -> Self {
        let seen = source.version();
        Self { source, seen }
    }

    /// Whether the source changed since the last call (or construction).
    pub fn changed(&mut self) -> bool {
        let current = self.source.version();
        let changed = current != self.seen;
        self.seen = current;
        changed
    }

    /// The watched source.
    pub const fn source(&self) -> &S {
        &self.source
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn watch_reports_each_change_once() {
        let score = Reactive::new(0_u32);
        let mut watch = VersionWatch::new(score.clone());
        assert!(!watch.changed());

        score.set(3);
        assert!(watch.changed());
        assert!(!watch.changed());
    }

    #[test]
    fn watch_sees_equal_writes_and_collection_mutations() {
        let score = Reactive::new(1_u32);
        let mut value_watch = VersionWatch::new(score.clone());
        score.set(1);
        assert!(value_watch.changed());

        let names = ReactiveList::<String>::empty();
        let mut list_watch = VersionWatch::new(names.clone());
        names.push("ada".to_owned());
        assert!(list_watch.changed());
        assert_eq!(list_watch.source().len(), 1);
    }
}
