//! Disk block allocator.
//!
//! One bit per block, [`BPB`] bits per bitmap block, bit 0 meaning free.
//! Allocation is a linear scan, lowest block number first. Both allocation
//! and free perform their read-modify-write of the bitmap block under the
//! device guard, which stands in for the held buffer lock the bitmap would
//! otherwise rely on.

use bit_field::BitField;
use corefs_api::types::{bblock, Block, BPB, BSIZE};

use crate::fs::CoreFS;
use crate::mlock;

impl CoreFS {
    /// Allocate the lowest-numbered free block on `dev` and mark it in the
    /// bitmap. Panics when no free block remains.
    pub(crate) fn balloc(&self, dev: u32) -> u32 {
        if dev != self.devno {
            panic!("balloc: unknown device {}", dev);
        }
        let sb = self.sb;
        let mut device = mlock(&self.device);
        let mut base = 0u32;
        while base < sb.size {
            let bno = bblock(base, sb.ninodes);
            let mut bp = device
                .read_block(bno)
                .unwrap_or_else(|e| panic!("balloc: bitmap block {}: {}", bno, e));
            for bit in 0..BPB {
                let b = base + bit;
                if b >= sb.size {
                    break;
                }
                let byte_idx = (bit / 8) as usize;
                let mut byte = bp.contents_as_ref()[byte_idx];
                if !byte.get_bit((bit % 8) as usize) {
                    byte.set_bit((bit % 8) as usize, true);
                    bp.write_data(&[byte], byte_idx as u64)
                        .unwrap_or_else(|e| panic!("balloc: bitmap update: {}", e));
                    device
                        .write_block(&bp)
                        .unwrap_or_else(|e| panic!("balloc: bitmap block {}: {}", bno, e));
                    return b;
                }
            }
            base += BPB;
        }
        panic!("balloc: out of blocks");
    }

    /// Free block `b` on `dev`: zero its contents, then clear its bitmap
    /// bit. Freeing a free block is fatal.
    ///
    /// The zero-then-clear order matters: an allocator racing with reuse of
    /// the block number can never observe the previous contents.
    pub(crate) fn bfree(&self, dev: u32, b: u32) {
        if dev != self.devno {
            panic!("bfree: unknown device {}", dev);
        }
        let sb = self.sb;
        let mut device = mlock(&self.device);
        device
            .write_block(&Block::new_zero(b as u64, BSIZE as u64))
            .unwrap_or_else(|e| panic!("bfree: zeroing block {}: {}", b, e));

        let bno = bblock(b, sb.ninodes);
        let mut bp = device
            .read_block(bno)
            .unwrap_or_else(|e| panic!("bfree: bitmap block {}: {}", bno, e));
        let bit = b % BPB;
        let byte_idx = (bit / 8) as usize;
        let mut byte = bp.contents_as_ref()[byte_idx];
        if !byte.get_bit((bit % 8) as usize) {
            panic!("bfree: freeing free block {}", b);
        }
        byte.set_bit((bit % 8) as usize, false);
        bp.write_data(&[byte], byte_idx as u64)
            .unwrap_or_else(|e| panic!("bfree: bitmap update: {}", e));
        device
            .write_block(&bp)
            .unwrap_or_else(|e| panic!("bfree: bitmap block {}: {}", bno, e));
    }

    /// Is block `b` marked allocated in the bitmap? Introspection for
    /// tools and tests.
    pub fn block_allocated(&self, b: u32) -> bool {
        let bp = self.bread(self.devno, bblock(b, self.sb.ninodes));
        let bit = b % BPB;
        bp.contents_as_ref()[(bit / 8) as usize].get_bit((bit % 8) as usize)
    }
}
