//! Inode contents: allocation, metadata flush, the block map, and
//! byte-range I/O.
//!
//! The data of an inode lives in a sequence of disk blocks: the first
//! [`NDIRECT`] are addressed directly from the inode, the next
//! [`NINDIRECT`] through a single indirect block. `bmap` resolves a file
//! block index to a device block, allocating lazily on first touch.
//!
//! Callers hold the inode lock for everything here: shared for `readi` and
//! `stati`, exclusive for the mutating operations.

use std::cmp::min;
use std::convert::TryInto;

use corefs_api::types::{
    iblock, DInode, FType, Stat, BSIZE, DINODE_SIZE, IPB, MAXFILE, NDIRECT, NINDIRECT,
};
use log::warn;

use crate::error::InodeError;
use crate::fs::CoreFS;
use crate::icache::Inode;
use crate::mlock;

impl CoreFS {
    /// Allocate a free on-disk inode of type `ftype` on `dev`.
    ///
    /// Returns a *write-locked* handle to the fresh inode, with `nlink`,
    /// `size` and all addresses zero and the generation bumped. Panics when
    /// no inode is free.
    pub fn ialloc(&self, dev: u32, ftype: FType) -> Inode {
        let sb = self.sb;
        for inum in 1..sb.ninodes {
            let bp = self.bread(dev, iblock(inum));
            let off = (inum as u64 % *IPB) * *DINODE_SIZE;
            let dip: DInode = bp
                .deserialize_from(off)
                .unwrap_or_else(|e| panic!("ialloc: corrupt on-disk inode {}: {}", inum, e));
            if dip.ftype != FType::Free {
                continue;
            }
            // Looks free on disk. Confirm through the cache under the write
            // lock; another allocator may have claimed it in between.
            let ip = self.iget(dev, inum);
            self.ilock(&ip, true);
            let claimed = {
                let mut meta = mlock(&ip.slot.meta);
                if meta.ftype == FType::Free {
                    if meta.nlink != 0 || meta.size != 0 || meta.addrs[0] != 0 {
                        panic!("ialloc: free inode {} not zeroed", inum);
                    }
                    meta.ftype = ftype;
                    meta.gen = meta.gen.wrapping_add(1);
                    true
                } else {
                    false
                }
            };
            if claimed {
                self.iupdate(&ip);
                return ip;
            }
            // harmless: the disk check was optimistic, keep scanning
            warn!("ialloc: inum {} taken during allocation, continuing", inum);
            self.iunlockput(ip);
        }
        panic!("ialloc: out of inodes");
    }

    /// Flush the in-memory inode into its on-disk slot, immediately.
    ///
    /// The read-modify-write of the packed inode block runs under the
    /// device guard so concurrent flushes of neighbouring inodes cannot
    /// clobber each other.
    pub fn iupdate(&self, ip: &Inode) {
        let dinode = {
            let meta = mlock(&ip.slot.meta);
            DInode {
                ftype: meta.ftype,
                major: meta.major,
                minor: meta.minor,
                nlink: meta.nlink,
                size: meta.size,
                gen: meta.gen,
                addrs: meta.addrs,
            }
        };
        let bno = iblock(ip.inum());
        let off = (ip.inum() as u64 % *IPB) * *DINODE_SIZE;
        let mut device = mlock(&self.device);
        let mut bp = device
            .read_block(bno)
            .unwrap_or_else(|e| panic!("iupdate: inode block {}: {}", bno, e));
        bp.serialize_into(&dinode, off)
            .unwrap_or_else(|e| panic!("iupdate: encode inode {}: {}", ip.inum(), e));
        device
            .write_block(&bp)
            .unwrap_or_else(|e| panic!("iupdate: inode block {}: {}", bno, e));
    }

    /// Fill the slot's metadata mirror from the on-disk inode. Used by the
    /// cache while the fresh slot is still write-locked.
    pub(crate) fn load_dinode(&self, ip: &Inode) {
        let bp = self.bread(ip.dev(), iblock(ip.inum()));
        let off = (ip.inum() as u64 % *IPB) * *DINODE_SIZE;
        let dip: DInode = bp
            .deserialize_from(off)
            .unwrap_or_else(|e| panic!("iget: corrupt on-disk inode {}: {}", ip.inum(), e));
        let mut meta = mlock(&ip.slot.meta);
        meta.ftype = dip.ftype;
        meta.major = dip.major;
        meta.minor = dip.minor;
        meta.nlink = dip.nlink;
        meta.size = dip.size;
        meta.gen = dip.gen;
        meta.addrs = dip.addrs;
    }

    /// Device block backing file block `bn` of `ip`, allocating it (and the
    /// indirect block, if needed) on first touch. Fatal past the maximum
    /// file size.
    fn bmap(&self, ip: &Inode, bn: u32) -> u32 {
        let dev = ip.dev();
        if (bn as usize) < NDIRECT {
            let cur = { mlock(&ip.slot.meta).addrs[bn as usize] };
            if cur != 0 {
                return cur;
            }
            let fresh = self.balloc(dev);
            mlock(&ip.slot.meta).addrs[bn as usize] = fresh;
            return fresh;
        }
        let bi = bn - NDIRECT as u32;
        if bi >= NINDIRECT {
            panic!("bmap: file block {} out of range", bn);
        }
        let ind = {
            let cur = { mlock(&ip.slot.meta).addrs[NDIRECT] };
            if cur != 0 {
                cur
            } else {
                let fresh = self.balloc(dev);
                mlock(&ip.slot.meta).addrs[NDIRECT] = fresh;
                fresh
            }
        };
        let mut bp = self.bread(dev, ind as u64);
        let addr: u32 = bp
            .deserialize_from(bi as u64 * 4)
            .unwrap_or_else(|e| panic!("bmap: indirect block {}: {}", ind, e));
        if addr != 0 {
            return addr;
        }
        let fresh = self.balloc(dev);
        bp.serialize_into(&fresh, bi as u64 * 4)
            .unwrap_or_else(|e| panic!("bmap: indirect block {}: {}", ind, e));
        self.bwrite(dev, &bp);
        fresh
    }

    /// Discard the inode's contents. Caller holds the write lock.
    ///
    /// Every block, including the indirect block, goes through deferred
    /// reclamation: a reader that captured the address array before the
    /// truncation must not see the blocks reallocated under it.
    pub(crate) fn itrunc(&self, ip: &Inode) {
        let dev = ip.dev();
        let addrs = {
            let mut meta = mlock(&ip.slot.meta);
            let snapshot = meta.addrs;
            meta.addrs = [0; NDIRECT + 1];
            meta.size = 0;
            snapshot
        };
        for &a in &addrs[..NDIRECT] {
            if a != 0 {
                self.reclaim.defer(Box::new(move |fs| fs.bfree(dev, a)));
            }
        }
        let ind = addrs[NDIRECT];
        if ind != 0 {
            let bp = self.bread(dev, ind as u64);
            for j in 0..NINDIRECT {
                let a: u32 = bp
                    .deserialize_from(j as u64 * 4)
                    .unwrap_or_else(|e| panic!("itrunc: indirect block {}: {}", ind, e));
                if a != 0 {
                    self.reclaim.defer(Box::new(move |fs| fs.bfree(dev, a)));
                }
            }
            self.reclaim.defer(Box::new(move |fs| fs.bfree(dev, ind)));
        }
        self.iupdate(ip);
    }

    /// Metadata snapshot. Caller holds at least the read lock.
    pub fn stati(&self, ip: &Inode) -> Stat {
        let meta = mlock(&ip.slot.meta);
        Stat {
            dev: ip.dev(),
            ino: ip.inum(),
            ftype: meta.ftype,
            nlink: meta.nlink,
            size: meta.size,
        }
    }

    /// Read up to `dst.len()` bytes from `ip` starting at byte `off`.
    /// Returns the bytes read, clamped at end of file. Caller holds at
    /// least the read lock.
    ///
    /// Device inodes dispatch to the driver registered for their major.
    pub fn readi(&self, ip: &Inode, dst: &mut [u8], off: u32) -> Result<usize, InodeError> {
        let (ftype, major, size) = {
            let meta = mlock(&ip.slot.meta);
            (meta.ftype, meta.major, meta.size)
        };
        if ftype == FType::Dev {
            let driver = self.devsw.get(major).ok_or(InodeError::NoDevice(major))?;
            return driver.read(dst);
        }

        let n: u32 = dst
            .len()
            .try_into()
            .map_err(|_| InodeError::Invalid("read length too large"))?;
        if off > size || off.checked_add(n).is_none() {
            return Err(InodeError::Invalid("read past end of file"));
        }
        let n = min(n, size - off);

        let mut tot = 0u32;
        while tot < n {
            let pos = off + tot;
            let bp = self.bread(ip.dev(), self.bmap(ip, pos / BSIZE) as u64);
            let boff = pos % BSIZE;
            let m = min(n - tot, BSIZE - boff);
            bp.read_data(&mut dst[tot as usize..(tot + m) as usize], boff as u64)?;
            tot += m;
        }
        Ok(n as usize)
    }

    /// Write `src` into `ip` starting at byte `off`, growing the file (and
    /// flushing its metadata) if the write extends it. Returns the bytes
    /// written, clamped at the maximum file size. Caller holds the write
    /// lock.
    ///
    /// Device inodes dispatch to the driver registered for their major.
    pub fn writei(&self, ip: &Inode, src: &[u8], off: u32) -> Result<usize, InodeError> {
        let (ftype, major, size) = {
            let meta = mlock(&ip.slot.meta);
            (meta.ftype, meta.major, meta.size)
        };
        if ftype == FType::Dev {
            let driver = self.devsw.get(major).ok_or(InodeError::NoDevice(major))?;
            return driver.write(src);
        }

        let n: u32 = src
            .len()
            .try_into()
            .map_err(|_| InodeError::Invalid("write length too large"))?;
        if off > size || off.checked_add(n).is_none() {
            return Err(InodeError::Invalid("write past end of file"));
        }
        let n = min(n, MAXFILE * BSIZE - off);

        let mut tot = 0u32;
        while tot < n {
            let pos = off + tot;
            let mut bp = self.bread(ip.dev(), self.bmap(ip, pos / BSIZE) as u64);
            let boff = pos % BSIZE;
            let m = min(n - tot, BSIZE - boff);
            bp.write_data(&src[tot as usize..(tot + m) as usize], boff as u64)?;
            self.bwrite(ip.dev(), &bp);
            tot += m;
        }

        if n > 0 && off + n > size {
            mlock(&ip.slot.meta).size = off + n;
            self.iupdate(ip);
        }
        Ok(n as usize)
    }
}
