use std::collections::HashMap;
use std::hash::Hash;

/// Last published snapshot per entity.
///
/// Owned by a single poller and rebuilt empty on restart, which costs one
/// re-publish per entity. Entities that vanish from the source stay cached.
#[derive(Debug)]
pub struct SnapshotCache<K, S> {
    entries: HashMap<K, S>,
}

impl<K, S> Default for SnapshotCache<K, S> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }
}

impl<K: Eq + Hash, S: PartialEq> SnapshotCache<K, S> {
    pub fn new() -> Self {
        Self::default()
    }

    /// True when `snapshot` is new or differs from the cached one for `key`.
    pub fn has_changed(&self, key: &K, snapshot: &S) -> bool {
        self.entries.get(key) != Some(snapshot)
    }

    /// Records `snapshot` as the last published value for `key`.
    pub fn record(&mut self, key: K, snapshot: S) {
        self.entries.insert(key, snapshot);
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
