//! Path name resolution.
//!
//! Paths like `/usr/src/fs.rs` resolve one element at a time: strip
//! slashes, look the element up in the current directory, descend. The walk
//! releases each ancestor before locking the descendant, so it holds at
//! most one inode lock at a time and two walkers crossing paths cannot
//! deadlock. Handles returned by the resolver are unlocked.
//!
//! Non-parent lookups consult the name cache first; a miss falls back to a
//! directory scan under the read lock and populates the cache on success.

use corefs_api::types::{FType, DIRSIZ, ROOTDEV, ROOTINO};

use crate::error::{DirError, PathError};
use crate::fs::CoreFS;
use crate::icache::Inode;
use crate::mlock;

/// Split the next path element off `path`.
///
/// Strips leading slashes; returns the element as a fixed [`DIRSIZ`] field
/// (longer elements truncate to exactly [`DIRSIZ`] bytes, matching the
/// directory encoding) together with the remainder, itself stripped of
/// leading slashes so an empty remainder means the element was last.
/// Returns `None` when no element remains.
pub(crate) fn skipelem(path: &str) -> Option<([u8; DIRSIZ], &str)> {
    let p = path.trim_start_matches('/');
    if p.is_empty() {
        return None;
    }
    let end = p.find('/').unwrap_or_else(|| p.len());
    let (elem, rest) = p.split_at(end);
    let mut name = [0u8; DIRSIZ];
    let raw = elem.as_bytes();
    let n = raw.len().min(DIRSIZ);
    name[..n].copy_from_slice(&raw[..n]);
    Some((name, rest.trim_start_matches('/')))
}

impl CoreFS {
    fn namex(
        &self,
        path: &str,
        parent: bool,
        name_out: &mut [u8; DIRSIZ],
    ) -> Result<Inode, PathError> {
        let mut ip = if path.starts_with('/') {
            self.iget(ROOTDEV, ROOTINO)
        } else {
            let cwd = mlock(&self.cwd);
            match cwd.as_ref() {
                Some(handle) => self.idup(handle),
                None => return Err(PathError::NoCwd),
            }
        };

        let mut rest = path;
        while let Some((name, after)) = skipelem(rest) {
            rest = after;
            *name_out = name;

            if !parent {
                if let Some(child) = self.nc_lookup(&ip, &name) {
                    // cache hit bypasses the directory; drop its handle
                    self.iput(ip);
                    ip = child;
                    continue;
                }
            }

            self.ilock(&ip, false);
            match ip.ftype() {
                FType::Free => panic!("namex: free inode {} on path", ip.inum()),
                FType::Dir => {}
                _ => {
                    self.iunlockput(ip);
                    return Err(PathError::NotDir);
                }
            }
            if parent && rest.is_empty() {
                // stop one level early; hand the parent back unlocked
                self.iunlock(&ip);
                return Ok(ip);
            }
            match self.dirlookup_raw(&ip, &name) {
                Ok((child, _off)) => {
                    self.nc_insert(&ip, &name, &child);
                    self.iunlockput(ip);
                    ip = child;
                }
                Err(DirError::NotFound) => {
                    self.iunlockput(ip);
                    return Err(PathError::NotFound);
                }
                Err(e) => {
                    self.iunlockput(ip);
                    return Err(e.into());
                }
            }
        }

        if parent {
            // the path resolved to the root itself; it has no parent here
            self.iput(ip);
            return Err(PathError::NotFound);
        }
        Ok(ip)
    }

    /// Resolve `path` to a referenced, unlocked inode handle.
    ///
    /// Absolute paths start at the root; relative paths at the working
    /// directory. Repeated slashes are ignored, so `///a//b` is `/a/b`.
    pub fn namei(&self, path: &str) -> Result<Inode, PathError> {
        let mut name = [0u8; DIRSIZ];
        self.namex(path, false, &mut name)
    }

    /// Resolve `path` to the directory *containing* its last element.
    ///
    /// Returns the parent's handle together with the last element in its
    /// fixed-width form. Errors with `NotFound` when the path resolves to
    /// the root itself.
    pub fn nameiparent(&self, path: &str) -> Result<(Inode, [u8; DIRSIZ]), PathError> {
        let mut name = [0u8; DIRSIZ];
        let ip = self.namex(path, true, &mut name)?;
        Ok((ip, name))
    }

    fn nc_lookup(&self, dir: &Inode, name: &[u8; DIRSIZ]) -> Option<Inode> {
        let child = self.ncache.lookup(dir.slot.inum, name)?;
        Some(self.iget(dir.dev(), child))
    }

    fn nc_insert(&self, dir: &Inode, name: &[u8; DIRSIZ], child: &Inode) {
        self.ncache.insert(dir.slot.inum, *name, child.inum());
    }
}
