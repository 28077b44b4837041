//! Generic keyed associative container.
//!
//! A thin concurrent map used to index the inode cache by inode number and
//! to back the name cache. Reads share a lock; inserts and removes take it
//! exclusively. Values are handed out by clone, so a reader never holds the
//! lock while it works with a value.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::RwLock;

use crate::{rlock, wlock};

pub(crate) struct Namespace<K, V> {
    map: RwLock<HashMap<K, V>>,
}

impl<K: Eq + Hash + Clone, V: Clone> Namespace<K, V> {
    pub(crate) fn new() -> Namespace<K, V> {
        Namespace {
            map: RwLock::new(HashMap::new()),
        }
    }

    pub(crate) fn lookup(&self, k: &K) -> Option<V> {
        rlock(&self.map).get(k).cloned()
    }

    /// Insert `v` under `k`; on a duplicate key the map is unchanged and
    /// `v` is handed back.
    pub(crate) fn insert(&self, k: K, v: V) -> Result<(), V> {
        let mut map = wlock(&self.map);
        if map.contains_key(&k) {
            return Err(v);
        }
        map.insert(k, v);
        Ok(())
    }

    /// Remove the entry under `k` iff `pred` accepts the stored value.
    /// Returns whether an entry was removed.
    pub(crate) fn remove_if(&self, k: &K, pred: impl FnOnce(&V) -> bool) -> bool {
        let mut map = wlock(&self.map);
        match map.get(k) {
            Some(v) if pred(v) => {
                map.remove(k);
                true
            }
            _ => false,
        }
    }

    /// Visit values until `f` yields a result; iteration order is
    /// unspecified.
    pub(crate) fn enumerate<R>(&self, mut f: impl FnMut(&V) -> Option<R>) -> Option<R> {
        let map = rlock(&self.map);
        for v in map.values() {
            if let Some(r) = f(v) {
                return Some(r);
            }
        }
        None
    }

    pub(crate) fn len(&self) -> usize {
        rlock(&self.map).len()
    }

    pub(crate) fn clear(&self) {
        wlock(&self.map).clear();
    }
}
