//! Directory-entry name cache.
//!
//! Maps `(directory inum, element name)` to the child's inode number so the
//! path resolver can skip a directory scan on repeated lookups. Nothing in
//! this crate removes directory entries, so a cached mapping cannot go
//! stale through this crate's own interface; a layer adding unlink must add
//! invalidation first.

use corefs_api::types::DIRSIZ;

use crate::namespace::Namespace;

/// Entry count at which the cache is wholesale reset.
const NC_CAPACITY: usize = 256;

pub(crate) struct NameCache {
    map: Namespace<(i64, [u8; DIRSIZ]), u32>,
}

impl NameCache {
    pub(crate) fn new() -> NameCache {
        NameCache {
            map: Namespace::new(),
        }
    }

    pub(crate) fn lookup(&self, dir: i64, name: &[u8; DIRSIZ]) -> Option<u32> {
        self.map.lookup(&(dir, *name))
    }

    pub(crate) fn insert(&self, dir: i64, name: [u8; DIRSIZ], child: u32) {
        if self.map.len() >= NC_CAPACITY {
            self.map.clear();
        }
        // a racing insert of the same pair stores the same inum; ignore it
        let _ = self.map.insert((dir, name), child);
    }
}
