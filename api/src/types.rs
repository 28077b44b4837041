//! On-disk data model of the file system, plus the data carriers used to
//! move it between the core and the device controller.
//!
//! The disk layout is block-indexed: block 0 is reserved for boot code,
//! block 1 holds the [`SuperBlock`], the inode blocks follow immediately,
//! then the free bitmap, then the data blocks. [`iblock`] and [`bblock`]
//! compute where an inode or a bitmap bit lives.
//!
//! All structures are encoded with `bincode`'s fixed-width little-endian
//! representation, so their encoded sizes are stable. The sizes can only be
//! computed at runtime, which is why [`struct@SUPERBLOCK_SIZE`],
//! [`struct@DINODE_SIZE`], [`struct@DIRENTRY_SIZE`] and [`struct@IPB`] are
//! `lazy_static` values.

use crate::error::{self, APIError};
use lazy_static::lazy_static;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::io::prelude::*;
use std::io::{Cursor, SeekFrom};

/// Size of a disk block, in bytes.
pub const BSIZE: u32 = 512;
/// Allocation bits tracked per bitmap block.
pub const BPB: u32 = BSIZE * 8;
/// Number of direct block addresses in an inode.
pub const NDIRECT: usize = 12;
/// Number of block addresses held by the single indirect block
/// (4-byte addresses, one block's worth).
pub const NINDIRECT: u32 = BSIZE / 4;
/// Maximum file length, in blocks.
pub const MAXFILE: u32 = NDIRECT as u32 + NINDIRECT;
/// Width of the fixed directory-entry name field, in bytes.
pub const DIRSIZ: usize = 14;
/// Capacity of the in-memory inode cache, in slots.
pub const NINODE: usize = 50;
/// Number of majors in the device switch table.
pub const NDEV: usize = 10;
/// Device number of the root device.
pub const ROOTDEV: u32 = 1;
/// Inode number of the root directory.
pub const ROOTINO: u32 = 1;

/// Heap-allocated byte buffer with structured access.
///
/// Buffers back [`Block`]s, but are also used on their own to stage
/// directory entries and other structures before they go through the inode
/// I/O path. The contents are a boxed slice because a buffer never changes
/// size during its lifetime.
#[derive(Debug, PartialEq, Eq)]
pub struct Buffer {
    contents: Box<[u8]>,
}

impl Buffer {
    /// Create a buffer owning the given bytes.
    pub fn new(data: Box<[u8]>) -> Buffer {
        Buffer { contents: data }
    }

    /// Create an all-zero buffer of length `len`.
    pub fn new_zero(len: u64) -> Buffer {
        Buffer {
            contents: vec![0; len as usize].into_boxed_slice(),
        }
    }

    /// Length of the underlying bytes.
    pub fn len(&self) -> u64 {
        self.contents.len() as u64
    }

    /// True iff the buffer holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.contents.is_empty()
    }

    /// Borrow the underlying bytes.
    pub fn contents_as_ref(&self) -> &[u8] {
        &self.contents
    }

    /// Fill `data` from the buffer, starting at byte `offset`.
    /// Errors without reading anything if the range falls outside the buffer.
    pub fn read_data(&self, data: &mut [u8], offset: u64) -> error::Result<()> {
        if offset + data.len() as u64 > self.len() {
            return Err(APIError::BlockInput("read beyond the end of the buffer"));
        }
        let mut c = Cursor::new(&self.contents);
        c.seek(SeekFrom::Start(offset))?;
        c.read_exact(data).map_err(|e| e.into())
    }

    /// Copy `data` into the buffer, starting at byte `offset`.
    /// Errors without writing anything if the range falls outside the buffer.
    pub fn write_data(&mut self, data: &[u8], offset: u64) -> error::Result<()> {
        if offset + data.len() as u64 > self.len() {
            return Err(APIError::BlockInput("write beyond the end of the buffer"));
        }
        let mut c = Cursor::new(&mut self.contents[..]);
        c.seek(SeekFrom::Start(offset))?;
        c.write_all(data).map_err(|e| e.into())
    }

    /// Decode a structure from the buffer at byte `offset`.
    pub fn deserialize_from<S>(&self, offset: u64) -> error::Result<S>
    where
        S: DeserializeOwned,
    {
        let mut c = Cursor::new(&self.contents);
        c.seek(SeekFrom::Start(offset))?;
        Ok(bincode::deserialize_from(c)?)
    }

    /// Encode a structure into the buffer at byte `offset`.
    /// Goes through [`Buffer::write_data`] so that out-of-bounds writes are
    /// rejected instead of growing the buffer.
    pub fn serialize_into<S>(&mut self, stru: &S, offset: u64) -> error::Result<()>
    where
        S: Serialize,
    {
        let encoded = bincode::serialize(stru)?;
        self.write_data(&encoded, offset)
    }
}

/// A numbered disk block: one [`Buffer`] of block size, tagged with the
/// index of the sector it was read from or is destined for.
///
/// Blocks are owned copies. Releasing one is simply dropping it; writing one
/// back is an explicit [`crate::controller::Device::write_block`].
#[derive(Debug, PartialEq, Eq)]
pub struct Block {
    /// Index of this block on the disk.
    pub block_no: u64,
    buf: Buffer,
}

impl Block {
    /// Create a block for sector `block_no` owning the given bytes.
    pub fn new(block_no: u64, data: Box<[u8]>) -> Block {
        Block {
            block_no,
            buf: Buffer::new(data),
        }
    }

    /// Create an all-zero block of length `len` for sector `block_no`.
    pub fn new_zero(block_no: u64, len: u64) -> Block {
        Block {
            block_no,
            buf: Buffer::new_zero(len),
        }
    }

    /// Length of the block contents.
    pub fn len(&self) -> u64 {
        self.buf.len()
    }

    /// True iff the block holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Borrow the block contents.
    pub fn contents_as_ref(&self) -> &[u8] {
        self.buf.contents_as_ref()
    }

    /// Fill `data` from the block, starting at byte `offset`.
    pub fn read_data(&self, data: &mut [u8], offset: u64) -> error::Result<()> {
        self.buf.read_data(data, offset)
    }

    /// Copy `data` into the block, starting at byte `offset`.
    pub fn write_data(&mut self, data: &[u8], offset: u64) -> error::Result<()> {
        self.buf.write_data(data, offset)
    }

    /// Decode a structure from the block at byte `offset`.
    pub fn deserialize_from<S>(&self, offset: u64) -> error::Result<S>
    where
        S: DeserializeOwned,
    {
        self.buf.deserialize_from(offset)
    }

    /// Encode a structure into the block at byte `offset`.
    pub fn serialize_into<S>(&mut self, stru: &S, offset: u64) -> error::Result<()>
    where
        S: Serialize,
    {
        self.buf.serialize_into(stru, offset)
    }
}

/// Layout header of the file system, stored at block 1.
///
/// Everything else about the layout follows from these two numbers and the
/// encoded structure sizes: inode blocks start at block 2, the bitmap at
/// [`bblock`]`(0, ninodes)`, and the remaining blocks are data.
#[derive(Serialize, Deserialize, Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SuperBlock {
    /// Total number of blocks in the file system, all regions included.
    pub size: u32,
    /// Number of on-disk inodes. Inode 0 is reserved and never allocated,
    /// to keep 0 usable as the "no inode" value in directory entries.
    pub ninodes: u32,
}

/// File type stored in an inode.
///
/// `Free` encodes as tag 0, so an all-zero inode region decodes as free
/// inodes.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Copy, Clone)]
pub enum FType {
    /// Unallocated inode
    Free,
    /// Regular file
    File,
    /// Directory
    Dir,
    /// Character/block device node, dispatched through the device switch
    Dev,
}

impl Default for FType {
    fn default() -> FType {
        FType::Free
    }
}

/// On-disk inode, packed [`struct@IPB`] per block starting at block 2.
///
/// `addrs[0..NDIRECT]` are direct block addresses; `addrs[NDIRECT]` is the
/// address of the single indirect block. Address 0 means "unallocated".
#[derive(Serialize, Deserialize, Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DInode {
    /// File type; `FType::Free` marks the inode unallocated
    pub ftype: FType,
    /// Major device number, for `FType::Dev` inodes
    pub major: i16,
    /// Minor device number, for `FType::Dev` inodes
    pub minor: i16,
    /// Number of directory entries referring to this inode
    pub nlink: i16,
    /// File size in bytes
    pub size: u32,
    /// Generation counter, bumped every time this inode number is reused
    pub gen: u32,
    /// Direct block addresses plus the indirect block address
    pub addrs: [u32; NDIRECT + 1],
}

/// Fixed-width directory entry.
///
/// `inum == 0` marks an empty slot. The name is null padded; a name of
/// exactly [`DIRSIZ`] bytes has no terminator, so comparisons must be
/// bounded at [`DIRSIZ`].
#[derive(Serialize, Deserialize, Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DirEntry {
    /// Inode number this entry points at; 0 for an empty slot
    pub inum: u16,
    /// Null-padded name field
    pub name: [u8; DIRSIZ],
}

/// Metadata snapshot of an inode, as reported to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stat {
    /// Device the inode lives on
    pub dev: u32,
    /// Inode number
    pub ino: u32,
    /// File type
    pub ftype: FType,
    /// Link count
    pub nlink: i16,
    /// Size in bytes
    pub size: u32,
}

lazy_static! {
    /// Encoded size of the superblock, in bytes. Must fit in one block.
    pub static ref SUPERBLOCK_SIZE: u64 =
        bincode::serialize(&SuperBlock::default()).unwrap().len() as u64;
    /// Encoded size of an on-disk inode, in bytes.
    pub static ref DINODE_SIZE: u64 =
        bincode::serialize(&DInode::default()).unwrap().len() as u64;
    /// Encoded size of a directory entry, in bytes.
    pub static ref DIRENTRY_SIZE: u64 =
        bincode::serialize(&DirEntry::default()).unwrap().len() as u64;
    /// Inodes packed per disk block.
    pub static ref IPB: u64 = BSIZE as u64 / *DINODE_SIZE;
}

/// Index of the block holding inode `inum`.
pub fn iblock(inum: u32) -> u64 {
    2 + inum as u64 / *IPB
}

/// Index of the bitmap block tracking allocation of block `b`.
pub fn bblock(b: u32, ninodes: u32) -> u64 {
    (b / BPB) as u64 + ninodes as u64 / *IPB + 3
}

#[cfg(test)]
mod buffer_tests {
    use super::{Block, DInode, DirEntry, FType, DINODE_SIZE, NDIRECT};

    static BLOCK_SIZE: u64 = 512;

    #[test]
    fn raw_rw() {
        let mut b = Block::new_zero(7, BLOCK_SIZE);
        assert_eq!(b.contents_as_ref(), &vec![0; BLOCK_SIZE as usize][..]);

        let mut data = vec![5; 5];
        b.write_data(&data, 10).unwrap();
        b.read_data(&mut data, 8).unwrap();
        assert_eq!(data, vec![0, 0, 5, 5, 5]);

        // ranges ending past the block are rejected without touching it
        let mut one = vec![1];
        assert!(b.write_data(&one, BLOCK_SIZE).is_err());
        assert!(b.read_data(&mut one, BLOCK_SIZE).is_err());
        let mut two = vec![1, 2];
        assert!(b.write_data(&two, BLOCK_SIZE - 1).is_err());
        assert!(b.read_data(&mut two, BLOCK_SIZE - 1).is_err());
        assert_eq!(b.contents_as_ref()[(BLOCK_SIZE - 1) as usize], 0);
    }

    #[test]
    fn structure_roundtrip() {
        let free = DInode::default();
        let full = DInode {
            ftype: FType::File,
            major: 0,
            minor: 0,
            nlink: 3,
            size: 4096,
            gen: 7,
            addrs: [9; NDIRECT + 1],
        };
        // the encoding is fixed width: every inode encodes to the same size
        assert_eq!(
            bincode::serialize(&free).unwrap().len(),
            *DINODE_SIZE as usize
        );
        assert_eq!(
            bincode::serialize(&free).unwrap().len(),
            bincode::serialize(&full).unwrap().len()
        );

        let mut b = Block::new_zero(3, BLOCK_SIZE);
        b.serialize_into(&full, 0).unwrap();
        b.serialize_into(&free, *DINODE_SIZE).unwrap();
        assert_eq!(b.deserialize_from::<DInode>(0).unwrap(), full);
        assert_eq!(b.deserialize_from::<DInode>(*DINODE_SIZE).unwrap(), free);

        // an all-zero region decodes as free inodes and empty dirents
        let zeroed = Block::new_zero(4, BLOCK_SIZE);
        assert_eq!(
            zeroed.deserialize_from::<DInode>(0).unwrap().ftype,
            FType::Free
        );
        assert_eq!(zeroed.deserialize_from::<DirEntry>(0).unwrap().inum, 0);
    }

    #[test]
    fn serialize_out_of_bounds() {
        let mut b = Block::new_zero(1, BLOCK_SIZE);
        let full = DInode::default();
        assert!(b
            .serialize_into(&full, BLOCK_SIZE + 1 - *DINODE_SIZE)
            .is_err());
        assert!(b
            .deserialize_from::<DInode>(BLOCK_SIZE + 1 - *DINODE_SIZE)
            .is_err());
        assert_eq!(b.contents_as_ref(), &vec![0; BLOCK_SIZE as usize][..]);
    }
}

#[cfg(test)]
mod layout_tests {
    use super::*;

    #[test]
    fn packing() {
        // at least a few inodes must fit in a block for the layout math to hold
        assert!(*IPB >= 1);
        assert!(*IPB * *DINODE_SIZE <= BSIZE as u64);
        assert!(*SUPERBLOCK_SIZE <= BSIZE as u64);
        assert_eq!(*DIRENTRY_SIZE, 2 + DIRSIZ as u64);
    }

    #[test]
    fn block_indexing() {
        let ninodes = 200;
        // inodes start right after the superblock and pack IPB per block
        assert_eq!(iblock(0), 2);
        assert_eq!(iblock(*IPB as u32 - 1), 2);
        assert_eq!(iblock(*IPB as u32), 3);
        // the bitmap region starts where the inode region ends
        let inode_blocks = ninodes as u64 / *IPB + 1;
        assert_eq!(bblock(0, ninodes), 2 + inode_blocks);
        // one bitmap block tracks BPB blocks
        assert_eq!(bblock(BPB - 1, ninodes), bblock(0, ninodes));
        assert_eq!(bblock(BPB, ninodes), bblock(0, ninodes) + 1);
    }
}
