//! Device switch: drivers for device inodes, dispatched by major number.
//!
//! `readi`/`writei` on an [`crate::icache::Inode`] of type `FType::Dev`
//! bypass the block map entirely and call the driver registered for the
//! inode's major number. An unregistered major is a recoverable error, not
//! a panic, since the on-disk inode may legitimately name a driver the
//! current configuration does not carry.

use std::sync::{Arc, RwLock};

use corefs_api::types::NDEV;

use crate::error::InodeError;
use crate::{rlock, wlock};

/// Driver for a device inode.
pub trait DeviceDriver: Send + Sync {
    /// Read up to `dst.len()` bytes from the device; returns bytes read.
    fn read(&self, dst: &mut [u8]) -> Result<usize, InodeError>;
    /// Write `src` to the device; returns bytes written.
    fn write(&self, src: &[u8]) -> Result<usize, InodeError>;
}

pub(crate) struct DevSw {
    table: RwLock<[Option<Arc<dyn DeviceDriver>>; NDEV]>,
}

impl DevSw {
    pub(crate) fn new() -> DevSw {
        DevSw {
            table: RwLock::new(Default::default()),
        }
    }

    pub(crate) fn get(&self, major: i16) -> Option<Arc<dyn DeviceDriver>> {
        if major < 0 || major as usize >= NDEV {
            return None;
        }
        rlock(&self.table)[major as usize].clone()
    }

    pub(crate) fn set(&self, major: usize, driver: Arc<dyn DeviceDriver>) {
        if major >= NDEV {
            panic!("devsw: major {} out of range", major);
        }
        wlock(&self.table)[major] = Some(driver);
    }
}
