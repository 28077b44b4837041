//! Read-side sections and deferred reclamation.
//!
//! Lookups in the inode cache run inside a *read-side section*: a
//! non-blocking marker that a thread is traversing shared state. Anything
//! torn down while readers might still observe it (an evicted cache slot, a
//! data block of a truncated file) is not destroyed inline but handed to
//! [`Reclaim::defer`] as a job. Jobs only run once no thread is inside a
//! read-side section, so a reader that captured a reference before the
//! teardown never observes recycled state.
//!
//! Draining happens at quiescent points: `CoreFS` drains after `iget` and
//! `iput`, and `CoreFS::synchronize` exposes a full drain to callers.

use std::mem;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::fs::CoreFS;
use crate::mlock;

/// A deferred teardown job. Runs with the file system borrowed so it can
/// reach the allocator.
pub(crate) type Deferred = Box<dyn FnOnce(&CoreFS) + Send>;

pub(crate) struct Reclaim {
    readers: AtomicUsize,
    pending: Mutex<Vec<Deferred>>,
}

impl Reclaim {
    pub(crate) fn new() -> Reclaim {
        Reclaim {
            readers: AtomicUsize::new(0),
            pending: Mutex::new(Vec::new()),
        }
    }

    /// Enter a read-side section; the section ends when the guard drops.
    pub(crate) fn read_enter(&self) -> ReadSection<'_> {
        self.readers.fetch_add(1, Ordering::SeqCst);
        ReadSection { rc: self }
    }

    /// Schedule `job` to run at the next quiescent point.
    pub(crate) fn defer(&self, job: Deferred) {
        mlock(&self.pending).push(job);
    }

    /// Take the pending jobs if no reader is inside a section right now;
    /// otherwise leave them queued and return nothing.
    pub(crate) fn take_ready(&self) -> Vec<Deferred> {
        if self.readers.load(Ordering::SeqCst) != 0 {
            return Vec::new();
        }
        mem::take(&mut *mlock(&self.pending))
    }
}

/// Guard marking a thread as inside a read-side section.
pub(crate) struct ReadSection<'a> {
    rc: &'a Reclaim,
}

impl Drop for ReadSection<'_> {
    fn drop(&mut self) {
        self.rc.readers.fetch_sub(1, Ordering::SeqCst);
    }
}
