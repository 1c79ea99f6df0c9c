//! A hash map split into independently locked shards.
//!
//! Operations on keys in different shards never contend.

use std::collections::HashMap;
use std::collections::hash_map::{Entry, RandomState};
use std::hash::{BuildHasher, Hash};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

const DEFAULT_SHARDS: usize = 16;

pub(crate) struct ShardedMap<K, V> {
    shards: Box<[RwLock<HashMap<K, V>>]>,
    hasher: RandomState,
}

impl<K: Eq + Hash, V> ShardedMap<K, V> {
    pub(crate) fn new() -> Self {
        Self::with_shards(DEFAULT_SHARDS)
    }

    pub(crate) fn with_shards(count: usize) -> Self {
        let shards = (0..count.max(1))
            .map(|_| RwLock::new(HashMap::new()))
            .collect();
        Self {
            shards,
            hasher: RandomState::new(),
        }
    }

    fn shard(&self, key: &K) -> &RwLock<HashMap<K, V>> {
        let index = (self.hasher.hash_one(key) as usize) % self.shards.len();
        &self.shards[index]
    }

    pub(crate) fn insert(&self, key: K, value: V) -> Option<V> {
        write(self.shard(&key)).insert(key, value)
    }

    /// Insert only if `key` is vacant. Returns false, leaving the map untouched,
    /// when an entry already exists.
    pub(crate) fn insert_if_absent(&self, key: K, value: V) -> bool {
        match write(self.shard(&key)).entry(key) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(value);
                true
            }
        }
    }

    pub(crate) fn remove(&self, key: &K) -> Option<V> {
        write(self.shard(key)).remove(key)
    }

    /// Remove `key` and run `f` on the removed value while its shard is still locked.
    pub(crate) fn remove_with<R>(&self, key: &K, f: impl FnOnce(&V) -> R) -> Option<(V, R)> {
        let mut shard = write(self.shard(key));
        let value = shard.remove(key)?;
        let result = f(&value);
        Some((value, result))
    }

    pub(crate) fn with<R>(&self, key: &K, f: impl FnOnce(&V) -> R) -> Option<R> {
        read(self.shard(key)).get(key).map(f)
    }

    pub(crate) fn with_mut<R>(&self, key: &K, f: impl FnOnce(&mut V) -> R) -> Option<R> {
        write(self.shard(key)).get_mut(key).map(f)
    }

    /// Run `f` on the entry for `key`, inserting a default value first if absent.
    pub(crate) fn upsert<R>(&self, key: K, f: impl FnOnce(&mut V) -> R) -> R
    where
        V: Default,
    {
        let mut shard = write(self.shard(&key));
        f(shard.entry(key).or_default())
    }

    pub(crate) fn len(&self) -> usize {
        self.shards.iter().map(|shard| read(shard).len()).sum()
    }

    /// Keep only entries matching `keep`, returning the keys that were dropped.
    pub(crate) fn retain(&self, mut keep: impl FnMut(&K, &mut V) -> bool) -> Vec<K>
    where
        K: Clone,
    {
        let mut removed = Vec::new();
        for shard in self.shards.iter() {
            write(shard).retain(|key, value| {
                let kept = keep(key, value);
                if !kept {
                    removed.push(key.clone());
                }
                kept
            });
        }
        removed
    }

    /// Collect a projection of every entry. Shards are visited one at a time.
    pub(crate) fn collect<T>(&self, mut f: impl FnMut(&K, &V) -> Option<T>) -> Vec<T> {
        let mut out = Vec::new();
        for shard in self.shards.iter() {
            out.extend(read(shard).iter().filter_map(|(k, v)| f(k, v)));
        }
        out
    }
}

impl<K: Eq + Hash, V> Default for ShardedMap<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

// A panic while holding a shard leaves plain data behind; keep serving it.
fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_get_remove() {
        let map = ShardedMap::new();
        assert!(map.insert(1, "a").is_none());
        assert_eq!(map.with(&1, |v| *v), Some("a"));
        assert_eq!(map.remove(&1), Some("a"));
        assert!(map.with(&1, |_| ()).is_none());
    }

    #[test]
    fn test_len_spans_shards() {
        let map = ShardedMap::with_shards(4);
        for i in 0..100 {
            map.insert(i, i * 2);
        }
        assert_eq!(map.len(), 100);
        let mut values = map.collect(|_, v| Some(*v));
        values.sort();
        assert_eq!(values[99], 198);
    }

    #[test]
    fn test_retain_reports_removed_keys() {
        let map = ShardedMap::new();
        for i in 0..10 {
            map.insert(i, i);
        }
        let mut removed = map.retain(|_, v| *v % 2 == 0);
        removed.sort();
        assert_eq!(removed, vec![1, 3, 5, 7, 9]);
        assert_eq!(map.len(), 5);
    }

    #[test]
    fn test_upsert_inserts_default() {
        let map: ShardedMap<&str, Vec<u8>> = ShardedMap::new();
        map.upsert("a", |v| v.push(1));
        map.upsert("a", |v| v.push(2));
        assert_eq!(map.with(&"a", Clone::clone), Some(vec![1, 2]));
    }

    #[test]
    fn test_insert_if_absent_keeps_first_value() {
        let map = ShardedMap::new();
        assert!(map.insert_if_absent("job", 1));
        assert!(!map.insert_if_absent("job", 2));
        assert_eq!(map.with(&"job", |v| *v), Some(1));
    }

    #[test]
    fn test_remove_with_runs_under_lock() {
        let map = ShardedMap::new();
        map.insert("job", 3);
        let (value, doubled) = map.remove_with(&"job", |v| v * 2).unwrap();
        assert_eq!((value, doubled), (3, 6));
        assert!(map.remove_with(&"job", |v| v * 2).is_none());
    }
}
