//! Top-level file system object and its on-disk lifecycle.
//!
//! A [`CoreFS`] owns the device, the cached superblock, the inode cache,
//! the name cache, the deferred-reclamation queue, the device switch and
//! the working-directory handle. All operations take `&self`, so a
//! `CoreFS` can be shared between threads behind an `Arc`.

use std::path::Path;
use std::sync::{Arc, Mutex};

use corefs_api::controller::Device;
use corefs_api::types::{
    bblock, Block, DInode, FType, SuperBlock, BPB, BSIZE, DINODE_SIZE, IPB, ROOTDEV, ROOTINO,
};
use bit_field::BitField;
use log::debug;

use crate::devsw::{DevSw, DeviceDriver};
use crate::error::{BlockError, DirError};
use crate::icache::{Icache, Inode};
use crate::mlock;
use crate::namecache::NameCache;
use crate::reclaim::Reclaim;

/// The file system core.
pub struct CoreFS {
    pub(crate) devno: u32,
    pub(crate) sb: SuperBlock,
    pub(crate) device: Mutex<Device>,
    pub(crate) icache: Icache,
    pub(crate) ncache: NameCache,
    pub(crate) reclaim: Reclaim,
    pub(crate) devsw: DevSw,
    pub(crate) cwd: Mutex<Option<Inode>>,
}

impl CoreFS {
    /// Create a fresh file system of `size` blocks with `ninodes` inodes at
    /// `path`, and mount it.
    ///
    /// The new image has every inode free (no root directory; see
    /// [`CoreFS::mkroot`]) and every block outside the metadata regions
    /// free in the bitmap.
    pub fn mkfs<P: AsRef<Path>>(path: P, size: u32, ninodes: u32) -> Result<CoreFS, BlockError> {
        let sb = SuperBlock { size, ninodes };
        if !Self::sb_valid(&sb) {
            return Err(BlockError::Layout(
                "superblock does not describe a usable layout",
            ));
        }
        let mut device = Device::new(path, BSIZE as u64, size as u64)?;

        // superblock at block 1; block 0 stays reserved for boot code
        let mut bp = Block::new_zero(1, BSIZE as u64);
        bp.serialize_into(&sb, 0)?;
        device.write_block(&bp)?;

        // every slot in the inode region starts out explicitly free
        let free = DInode::default();
        let inode_blocks = ninodes as u64 / *IPB + 1;
        for blk in 0..inode_blocks {
            let mut bp = Block::new_zero(2 + blk, BSIZE as u64);
            for slot in 0..*IPB {
                bp.serialize_into(&free, slot * *DINODE_SIZE)?;
            }
            device.write_block(&bp)?;
        }

        // the bitmap marks the boot, superblock, inode and bitmap blocks
        // themselves as in use; everything after them is free data
        let nbitmap = size / BPB + 1;
        let nmeta = 2 + inode_blocks as u32 + nbitmap;
        for bb in 0..nbitmap {
            let mut bytes = vec![0u8; BSIZE as usize];
            let base = bb * BPB;
            for bit in 0..BPB {
                if base + bit >= nmeta {
                    break;
                }
                bytes[(bit / 8) as usize].set_bit((bit % 8) as usize, true);
            }
            let bno = bblock(base, ninodes);
            device.write_block(&Block::new(bno, bytes.into_boxed_slice()))?;
        }

        debug!(
            "mkfs: {} blocks, {} inodes, {} metadata blocks",
            size, ninodes, nmeta
        );
        Ok(Self::assemble(sb, device))
    }

    /// Mount an existing device, validating its superblock against the
    /// device geometry.
    pub fn mount(device: Device) -> Result<CoreFS, BlockError> {
        let sb = Self::readsb(&device)?;
        if !Self::sb_valid(&sb) {
            return Err(BlockError::Layout("superblock not valid"));
        }
        if device.block_size != BSIZE as u64 || device.nblocks != sb.size as u64 {
            return Err(BlockError::Layout(
                "device geometry does not match the superblock",
            ));
        }
        Ok(Self::assemble(sb, device))
    }

    /// Unmount, draining deferred reclamation, and hand the device back.
    pub fn unmount(self) -> Device {
        if let Some(cwd) = mlock(&self.cwd).take() {
            self.iput(cwd);
        }
        self.synchronize();
        self.device
            .into_inner()
            .unwrap_or_else(|e| e.into_inner())
    }

    /// Read the superblock from block 1 of a device.
    pub fn readsb(device: &Device) -> Result<SuperBlock, BlockError> {
        let bp = device.read_block(1)?;
        Ok(bp.deserialize_from::<SuperBlock>(0)?)
    }

    /// Does this superblock describe a layout whose regions fit the disk?
    pub fn sb_valid(sb: &SuperBlock) -> bool {
        if sb.size == 0 || sb.ninodes == 0 {
            return false;
        }
        let inode_blocks = sb.ninodes as u64 / *IPB + 1;
        let nbitmap = (sb.size / BPB + 1) as u64;
        2 + inode_blocks + nbitmap < sb.size as u64
    }

    fn assemble(sb: SuperBlock, device: Device) -> CoreFS {
        CoreFS {
            devno: ROOTDEV,
            sb,
            device: Mutex::new(device),
            icache: Icache::new(),
            ncache: NameCache::new(),
            reclaim: Reclaim::new(),
            devsw: DevSw::new(),
            cwd: Mutex::new(None),
        }
    }

    /// The cached superblock.
    pub fn superblock(&self) -> SuperBlock {
        self.sb
    }

    /// Bootstrap the root directory on a fresh file system: allocate it,
    /// link `.` and `..` back to itself, pin it with one link, and install
    /// it as the working directory. Returns an unlocked handle.
    pub fn mkroot(&self) -> Result<Inode, DirError> {
        let ip = self.ialloc(self.devno, FType::Dir);
        if ip.inum() != ROOTINO {
            panic!("mkroot: root must be the first allocated inode");
        }
        ip.set_nlink(1);
        self.iupdate(&ip);
        self.dirlink(&ip, ".", ROOTINO)?;
        self.dirlink(&ip, "..", ROOTINO)?;
        self.iunlock(&ip);
        let cwd = self.idup(&ip);
        self.set_cwd(cwd);
        Ok(ip)
    }

    /// Install `ip` as the working directory, releasing the previous one.
    /// The handle is consumed; the file system keeps its reference.
    pub fn set_cwd(&self, ip: Inode) {
        let old = mlock(&self.cwd).replace(ip);
        if let Some(old) = old {
            self.iput(old);
        }
    }

    /// Register a driver for device inodes with the given major number.
    pub fn register_device(&self, major: usize, driver: Arc<dyn DeviceDriver>) {
        self.devsw.set(major, driver);
    }

    /// Run all deferred reclamation jobs that are ready (i.e. once no
    /// thread is inside a read-side section). Freed blocks only return to
    /// the bitmap when their job runs.
    pub fn synchronize(&self) {
        loop {
            let jobs = self.reclaim.take_ready();
            if jobs.is_empty() {
                return;
            }
            for job in jobs {
                job(self);
            }
        }
    }

    /// Read a block; failures on a validated layout are bugs, not
    /// recoverable conditions.
    pub(crate) fn bread(&self, dev: u32, bno: u64) -> Block {
        if dev != self.devno {
            panic!("bread: unknown device {}", dev);
        }
        mlock(&self.device)
            .read_block(bno)
            .unwrap_or_else(|e| panic!("bread: block {}: {}", bno, e))
    }

    /// Write a block back.
    pub(crate) fn bwrite(&self, dev: u32, bp: &Block) {
        if dev != self.devno {
            panic!("bwrite: unknown device {}", dev);
        }
        mlock(&self.device)
            .write_block(bp)
            .unwrap_or_else(|e| panic!("bwrite: block {}: {}", bp.block_no, e))
    }
}
