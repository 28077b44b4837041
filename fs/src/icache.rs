//! In-memory inode cache.
//!
//! An inode is a single unnamed file object: metadata plus a block map. The
//! on-disk inodes live packed in the inode region; this module keeps a
//! fixed pool of [`NINODE`] in-memory slots, indexed by inode number, that
//! synchronizes all access to inodes shared between threads.
//!
//! A slot's `refcnt` counts the handles pointing at it; a handle keeps the
//! slot from being evicted or reused. Content and metadata may only be
//! touched while holding the slot's flag lock (see [`CoreFS::ilock`]):
//! because that lock is held across blocking disk reads and writes, it is
//! built from flag bits and a condvar rather than from a native
//! reader/writer mutex, which must not be held across a sleep. Functions
//! returning handles return them *unlocked*, so callers control the lock
//! scope and can build multi-step atomic operations.
//!
//! Lookups run inside a read-side section and never block. The handshake
//! with evictors is the `FREE` bit: a lookup first bumps the ref, then
//! checks `FREE` and backs off if it is set, while an evictor first sets
//! `FREE` under the slot lock, then re-checks that the ref is still zero.
//! Whichever side observes the other undoes its claim, so a slot is never
//! simultaneously handed out and torn down. Evicted slots are retired
//! through deferred reclamation so a concurrent lookup still inside its
//! read-side section never observes freed storage.

use std::sync::atomic::{AtomicI64, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};

use corefs_api::types::{FType, NDIRECT, NINODE};
use log::debug;

use crate::fs::CoreFS;
use crate::namespace::Namespace;
use crate::{mlock, mwait};

/// All metadata mirrors the on-disk image as last read or written.
pub(crate) const I_VALID: u32 = 1 << 0;
/// Shared (reader) side of the content lock is held.
pub(crate) const I_BUSYR: u32 = 1 << 1;
/// Exclusive (writer) side of the content lock is held.
pub(crate) const I_BUSYW: u32 = 1 << 2;
/// The slot is being evicted; lookups that observe this back off and retry.
pub(crate) const I_FREE: u32 = 1 << 3;

/// Metadata mirror of the on-disk inode.
///
/// Guarded by the slot mutex for the individual access, and by the flag
/// lock contract for anything spanning blocking I/O.
#[derive(Debug)]
pub(crate) struct Imeta {
    pub(crate) ftype: FType,
    pub(crate) major: i16,
    pub(crate) minor: i16,
    pub(crate) nlink: i16,
    pub(crate) size: u32,
    pub(crate) gen: u32,
    pub(crate) addrs: [u32; NDIRECT + 1],
}

impl Imeta {
    fn empty() -> Imeta {
        Imeta {
            ftype: FType::Free,
            major: 0,
            minor: 0,
            nlink: 0,
            size: 0,
            gen: 0,
            addrs: [0; NDIRECT + 1],
        }
    }
}

/// One slot of the inode cache.
///
/// The mutex doubles as the slot's short-term lock (never held across I/O)
/// and as the anchor for condvar sleeps; `flags` and the counters are
/// atomics so the lookup fast path can read them without taking it.
pub(crate) struct Slot {
    pub(crate) dev: u32,
    /// Inode number; sentinel slots use negative values unreachable from
    /// any real lookup.
    pub(crate) inum: i64,
    pub(crate) refcnt: AtomicU64,
    pub(crate) flags: AtomicU32,
    pub(crate) readbusy: AtomicI64,
    pub(crate) meta: Mutex<Imeta>,
    pub(crate) cv: Condvar,
}

/// Handle to a cached inode.
///
/// Holding a handle keeps `refcnt >= 1`, which pins the slot in the cache.
/// The inode number, device and generation may be read at any time; all
/// other access requires the flag lock. Handles are not `Clone`: duplicate
/// through [`CoreFS::idup`] and return every handle with [`CoreFS::iput`].
pub struct Inode {
    pub(crate) slot: Arc<Slot>,
}

impl Inode {
    /// Inode number.
    pub fn inum(&self) -> u32 {
        self.slot.inum as u32
    }

    /// Device this inode lives on.
    pub fn dev(&self) -> u32 {
        self.slot.dev
    }

    /// Generation counter of this inode number.
    pub fn gen(&self) -> u32 {
        mlock(&self.slot.meta).gen
    }

    /// File type. Stable only under the inode lock.
    pub fn ftype(&self) -> FType {
        mlock(&self.slot.meta).ftype
    }

    /// File size in bytes. Stable only under the inode lock.
    pub fn size(&self) -> u32 {
        mlock(&self.slot.meta).size
    }

    /// Link count. Stable only under the inode lock.
    pub fn nlink(&self) -> i16 {
        mlock(&self.slot.meta).nlink
    }

    /// Set the link count. Caller must hold the write lock and is
    /// responsible for flushing with [`CoreFS::iupdate`].
    pub fn set_nlink(&self, nlink: i16) {
        mlock(&self.slot.meta).nlink = nlink;
    }

    /// Set the major/minor numbers of a device inode. Caller must hold the
    /// write lock and flush with [`CoreFS::iupdate`].
    pub fn set_device(&self, major: i16, minor: i16) {
        let mut meta = mlock(&self.slot.meta);
        meta.major = major;
        meta.minor = minor;
    }

    /// Snapshot of the block address array. Stable only under the inode
    /// lock; exposed for tools and tests.
    pub fn addrs(&self) -> [u32; NDIRECT + 1] {
        mlock(&self.slot.meta).addrs
    }

    /// Current number of handles on this slot.
    pub fn ref_count(&self) -> u64 {
        self.slot.refcnt.load(Ordering::SeqCst)
    }

    /// Do two handles reference the same cache slot?
    pub fn is_alias(&self, other: &Inode) -> bool {
        Arc::ptr_eq(&self.slot, &other.slot)
    }

    pub(crate) fn major(&self) -> i16 {
        mlock(&self.slot.meta).major
    }
}

pub(crate) struct Icache {
    pub(crate) ns: Namespace<i64, Arc<Slot>>,
}

impl Icache {
    /// Build the cache at full capacity: every slot starts out as an
    /// evictable sentinel, so allocation is always eviction.
    pub(crate) fn new() -> Icache {
        let ns = Namespace::new();
        for i in 0..NINODE {
            let inum = -(i as i64) - 1;
            let slot = Arc::new(Slot {
                dev: 0,
                inum,
                refcnt: AtomicU64::new(0),
                flags: AtomicU32::new(0),
                readbusy: AtomicI64::new(0),
                meta: Mutex::new(Imeta::empty()),
                cv: Condvar::new(),
            });
            let _ = ns.insert(inum, slot);
        }
        Icache { ns }
    }
}

impl CoreFS {
    /// Find the inode `inum` on `dev` and return a referenced, unlocked
    /// handle to its cache slot.
    ///
    /// The handle's metadata is guaranteed valid on return; if another
    /// thread is still reading the inode in from disk, this call sleeps
    /// until it finishes. Panics if `dev` disagrees with a cached slot for
    /// the same number (the cache is keyed by inode number alone and is
    /// single-device in practice) or if every slot is pinned.
    pub fn iget(&self, dev: u32, inum: u32) -> Inode {
        let key = inum as i64;
        loop {
            // Fast path: lookup inside a read-side section.
            {
                let section = self.reclaim.read_enter();
                if let Some(slot) = self.icache.ns.lookup(&key) {
                    if slot.dev != dev {
                        panic!("iget: dev mismatch for inum {}", inum);
                    }
                    // Bump the ref first, then check FREE: the order is the
                    // handshake with a concurrent evictor.
                    slot.refcnt.fetch_add(1, Ordering::SeqCst);
                    if slot.flags.load(Ordering::SeqCst) & I_FREE != 0 {
                        slot.refcnt.fetch_sub(1, Ordering::SeqCst);
                        drop(section);
                        continue;
                    }
                    drop(section);
                    if slot.flags.load(Ordering::SeqCst) & I_VALID == 0 {
                        let mut meta = mlock(&slot.meta);
                        while slot.flags.load(Ordering::SeqCst) & I_VALID == 0 {
                            meta = mwait(&slot.cv, meta);
                        }
                    }
                    return Inode { slot };
                }
            }

            // Miss: make room by evicting an unreferenced slot.
            let victim = match self.evict_candidate() {
                Some(v) => v,
                None => panic!("iget: out of inode slots"),
            };
            if !self
                .icache
                .ns
                .remove_if(&victim.inum, |s| Arc::ptr_eq(s, &victim))
            {
                // another evictor claimed the same victim first
                continue;
            }
            debug!("icache: evicting slot for inum {}", victim.inum);
            self.reclaim.defer(Box::new(move |_fs: &CoreFS| {
                drop(victim);
            }));

            // Publish a fresh slot, born holding the write lock so nobody
            // can observe it before the disk read completes.
            let slot = Arc::new(Slot {
                dev,
                inum: key,
                refcnt: AtomicU64::new(1),
                flags: AtomicU32::new(I_BUSYR | I_BUSYW),
                readbusy: AtomicI64::new(1),
                meta: Mutex::new(Imeta::empty()),
                cv: Condvar::new(),
            });
            if self.icache.ns.insert(key, slot.clone()).is_err() {
                // Another thread published the same inum first; retire this
                // slot and go find theirs.
                self.reclaim.defer(Box::new(move |_fs: &CoreFS| {
                    drop(slot);
                }));
                continue;
            }

            let ip = Inode { slot };
            self.load_dinode(&ip);
            ip.slot.flags.fetch_or(I_VALID, Ordering::SeqCst);
            self.iunlock(&ip);
            self.synchronize();
            return ip;
        }
    }

    /// Scan the cache for an evictable slot: unreferenced, and still
    /// unreferenced after being marked `FREE` under its own lock. A lookup
    /// that bumped the ref between the two checks wins, and the mark is
    /// rolled back.
    fn evict_candidate(&self) -> Option<Arc<Slot>> {
        self.icache.ns.enumerate(|slot| {
            let guard = mlock(&slot.meta);
            if slot.refcnt.load(Ordering::SeqCst) != 0 {
                return None;
            }
            slot.flags.fetch_or(I_FREE, Ordering::SeqCst);
            if slot.refcnt.load(Ordering::SeqCst) != 0 {
                slot.flags.fetch_and(!I_FREE, Ordering::SeqCst);
                return None;
            }
            drop(guard);
            Some(slot.clone())
        })
    }

    /// Take another handle on the same inode, bumping its ref.
    pub fn idup(&self, ip: &Inode) -> Inode {
        ip.slot.refcnt.fetch_add(1, Ordering::SeqCst);
        Inode {
            slot: ip.slot.clone(),
        }
    }

    /// Return a handle, dropping its ref.
    ///
    /// When the last handle goes and the inode has no links left, its
    /// on-disk identity is reclaimed: contents truncated, type zeroed,
    /// generation bumped, metadata flushed. The slot itself stays cached
    /// for reuse or later eviction.
    pub fn iput(&self, ip: Inode) {
        let Inode { slot } = ip;
        let prev = slot.refcnt.fetch_sub(1, Ordering::SeqCst);
        if prev == 0 {
            panic!("iput: unreferenced inode {}", slot.inum);
        }
        if prev == 1 {
            let meta = mlock(&slot.meta);
            if slot.refcnt.load(Ordering::SeqCst) == 0 && meta.nlink == 0 {
                let flags = slot.flags.load(Ordering::SeqCst);
                if flags & (I_BUSYR | I_BUSYW) != 0 {
                    panic!("iput: inode {} busy", slot.inum);
                }
                if flags & I_VALID == 0 {
                    panic!("iput: inode {} not valid", slot.inum);
                }
                // Take the write lock by hand; nobody else can contend, the
                // ref just hit zero.
                slot.flags.fetch_or(I_BUSYR | I_BUSYW, Ordering::SeqCst);
                slot.readbusy.fetch_add(1, Ordering::SeqCst);
                drop(meta);

                let view = Inode { slot: slot.clone() };
                self.itrunc(&view);
                {
                    let mut meta = mlock(&slot.meta);
                    meta.ftype = FType::Free;
                    meta.major = 0;
                    meta.minor = 0;
                    meta.gen = meta.gen.wrapping_add(1);
                }
                self.iupdate(&view);

                let meta = mlock(&slot.meta);
                slot.readbusy.fetch_sub(1, Ordering::SeqCst);
                slot.flags.fetch_and(!(I_BUSYR | I_BUSYW), Ordering::SeqCst);
                slot.cv.notify_all();
                drop(meta);
            }
        }
        self.synchronize();
    }

    /// Lock the inode's contents, shared (`writer == false`) or exclusive.
    ///
    /// Readers may coexist; a writer excludes everyone. The lock may be
    /// held across blocking block I/O; waiters sleep on the slot's condvar.
    pub fn ilock(&self, ip: &Inode, writer: bool) {
        if ip.slot.refcnt.load(Ordering::SeqCst) < 1 {
            panic!("ilock: unreferenced inode");
        }
        let blocking = I_BUSYW | if writer { I_BUSYR } else { 0 };
        let mut meta = mlock(&ip.slot.meta);
        while ip.slot.flags.load(Ordering::SeqCst) & blocking != 0 {
            meta = mwait(&ip.slot.cv, meta);
        }
        let set = I_BUSYR | if writer { I_BUSYW } else { 0 };
        ip.slot.flags.fetch_or(set, Ordering::SeqCst);
        ip.slot.readbusy.fetch_add(1, Ordering::SeqCst);
        drop(meta);

        if ip.slot.flags.load(Ordering::SeqCst) & I_VALID == 0 {
            panic!("ilock: inode not valid");
        }
    }

    /// Release the inode lock taken by [`CoreFS::ilock`].
    pub fn iunlock(&self, ip: &Inode) {
        if ip.slot.flags.load(Ordering::SeqCst) & (I_BUSYR | I_BUSYW) == 0
            || ip.slot.refcnt.load(Ordering::SeqCst) < 1
        {
            panic!("iunlock: inode not locked");
        }
        let meta = mlock(&ip.slot.meta);
        let remaining = ip.slot.readbusy.fetch_sub(1, Ordering::SeqCst) - 1;
        let mut clear = I_BUSYW;
        if remaining == 0 {
            clear |= I_BUSYR;
        }
        ip.slot.flags.fetch_and(!clear, Ordering::SeqCst);
        ip.slot.cv.notify_all();
        drop(meta);
    }

    /// Common idiom: unlock, then drop the handle.
    pub fn iunlockput(&self, ip: Inode) {
        self.iunlock(&ip);
        self.iput(ip);
    }

    /// Is the inode `inum` currently resident in the cache?
    pub fn is_cached(&self, inum: u32) -> bool {
        self.icache.ns.lookup(&(inum as i64)).is_some()
    }
}
