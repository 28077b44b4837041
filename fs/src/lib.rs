//! An xv6-style on-disk file system core, built in four layers:
//!
//! - **Blocks**: a bitmap allocator for raw disk blocks.
//! - **Files**: inode allocation, reading, writing and metadata, fronted by
//!   a fixed-capacity concurrent inode cache.
//! - **Directories**: inodes whose contents are fixed-width entries naming
//!   other inodes.
//! - **Names**: element-wise path resolution over the directory layer.
//!
//! The disk layout is `boot | superblock | inode blocks | bitmap | data`
//! (see `corefs_api::types`). A [`fs::CoreFS`] owns the device and exposes
//! the whole operation surface on `&self`, so it can be shared between
//! threads behind an `Arc`.
//!
//! Functions returning inode handles return them *unlocked*: a handle
//! ([`icache::Inode`]) pins its cache slot through a reference count, and
//! the caller locks it with [`fs::CoreFS::ilock`] when it needs the
//! contents. Keeping the lock choice with the caller is what lets a caller
//! build arbitrarily large atomic operations, e.g. "find a free directory
//! slot, then fill it" under one write lock. Every handle must eventually
//! be returned with [`fs::CoreFS::iput`].

#![deny(missing_docs)]

pub mod devsw;
pub mod dir;
pub mod error;
pub mod fs;
pub mod icache;

mod balloc;
mod inode;
mod namecache;
mod namespace;
mod path;
mod reclaim;

pub use crate::fs::CoreFS;
pub use crate::icache::Inode;

use std::sync::{
    Condvar, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard,
};

// Poisoning carries no information we act on; take the guard either way.
pub(crate) fn mlock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn mwait<'a, T>(cv: &Condvar, g: MutexGuard<'a, T>) -> MutexGuard<'a, T> {
    cv.wait(g).unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn rlock<T>(l: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    l.read().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn wlock<T>(l: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    l.write().unwrap_or_else(PoisonError::into_inner)
}
