//! Directories: inodes whose contents are fixed-width entries naming other
//! inodes.
//!
//! An entry pairs a 2-byte inode number with a [`DIRSIZ`]-byte name field.
//! `inum == 0` marks a tombstone. Names are null padded and *not*
//! terminated when exactly [`DIRSIZ`] bytes long, so every comparison is
//! bounded at [`DIRSIZ`]; [`name_bytes`] produces the canonical fixed-width
//! form, truncating longer input.
//!
//! Directories grow only through [`CoreFS::dirlink`]; tombstones are reused
//! but never compacted.

use corefs_api::types::{Buffer, DirEntry, FType, DIRENTRY_SIZE, DIRSIZ};

use crate::error::DirError;
use crate::fs::CoreFS;
use crate::icache::Inode;

/// Encode a name into the fixed on-disk field: null padded, truncated at
/// exactly [`DIRSIZ`] bytes.
pub fn name_bytes(name: &str) -> [u8; DIRSIZ] {
    let mut out = [0u8; DIRSIZ];
    let raw = name.as_bytes();
    let n = raw.len().min(DIRSIZ);
    out[..n].copy_from_slice(&raw[..n]);
    out
}

impl CoreFS {
    fn read_entry(&self, dp: &Inode, off: u32) -> Result<DirEntry, DirError> {
        let len = *DIRENTRY_SIZE as usize;
        let mut raw = vec![0u8; len];
        let n = self.readi(dp, &mut raw, off)?;
        if n != len {
            panic!("dirlookup: short directory read at offset {}", off);
        }
        let entry = Buffer::new(raw.into_boxed_slice())
            .deserialize_from::<DirEntry>(0)
            .unwrap_or_else(|e| panic!("dirlookup: corrupt entry at offset {}: {}", off, e));
        Ok(entry)
    }

    pub(crate) fn dirlookup_raw(
        &self,
        dp: &Inode,
        name: &[u8; DIRSIZ],
    ) -> Result<(Inode, u32), DirError> {
        if dp.ftype() != FType::Dir {
            panic!("dirlookup: inode {} is not a directory", dp.inum());
        }
        let size = dp.size();
        let step = *DIRENTRY_SIZE as u32;
        let mut off = 0;
        while off + step <= size {
            let entry = self.read_entry(dp, off)?;
            if entry.inum != 0 && entry.name == *name {
                return Ok((self.iget(dp.dev(), entry.inum as u32), off));
            }
            off += step;
        }
        Err(DirError::NotFound)
    }

    /// Look up `name` in directory `dp`.
    ///
    /// On a hit, returns a referenced, unlocked handle for the named inode
    /// together with the entry's byte offset in the directory. Caller holds
    /// at least the read lock on `dp`.
    pub fn dirlookup(&self, dp: &Inode, name: &str) -> Result<(Inode, u32), DirError> {
        self.dirlookup_raw(dp, &name_bytes(name))
    }

    /// Write a new entry `(name, inum)` into directory `dp`, reusing the
    /// first tombstone or appending past the end. Rejects a name that is
    /// already present. Returns the byte offset the entry was written at.
    /// Caller holds the write lock on `dp`, which is what makes the
    /// scan-then-write atomic.
    pub fn dirlink(&self, dp: &Inode, name: &str, inum: u32) -> Result<u32, DirError> {
        let nb = name_bytes(name);
        match self.dirlookup_raw(dp, &nb) {
            Ok((ip, _)) => {
                self.iput(ip);
                return Err(DirError::Exists);
            }
            Err(DirError::NotFound) => {}
            Err(e) => return Err(e),
        }

        let size = dp.size();
        let step = *DIRENTRY_SIZE as u32;
        let mut off = size;
        let mut scan = 0;
        while scan + step <= size {
            if self.read_entry(dp, scan)?.inum == 0 {
                off = scan;
                break;
            }
            scan += step;
        }

        let entry = DirEntry {
            inum: inum as u16,
            name: nb,
        };
        let mut buf = Buffer::new_zero(*DIRENTRY_SIZE);
        buf.serialize_into(&entry, 0)
            .unwrap_or_else(|e| panic!("dirlink: encode entry: {}", e));
        let n = self.writei(dp, buf.contents_as_ref(), off)?;
        if n != step as usize {
            panic!("dirlink: short directory write at offset {}", off);
        }
        Ok(off)
    }
}

#[cfg(test)]
mod tests {
    use super::name_bytes;
    use corefs_api::types::DIRSIZ;

    #[test]
    fn name_encoding() {
        assert_eq!(&name_bytes("a")[..2], b"a\0");
        // an exactly DIRSIZ-byte name fills the field with no terminator
        let full = name_bytes("abcdefghijklmn");
        assert_eq!(&full[..], b"abcdefghijklmn");
        // longer names truncate to the same fixed form
        assert_eq!(name_bytes("abcdefghijklmnop"), full);
        assert_eq!(name_bytes("").len(), DIRSIZ);
    }
}
