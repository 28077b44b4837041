//! Disk device and its controller.
//!
//! The device is emulated by a memory-mapped image file: a [`Device`] owns
//! the mapping and moves whole [`Block`]s in and out of it. Blocks read out
//! are owned copies, so dropping one releases it and only an explicit
//! [`Device::write_block`] makes changes durable.
//!
//! Nothing here locks the image file against other processes; the file
//! system core is responsible for serializing its own access to the device.

use crate::error::{self, APIError};
use crate::types::Block;
use memmap::MmapMut;
use std::{
    fs::{remove_file, OpenOptions},
    path::{Path, PathBuf},
};

/// A block device backed by a memory-mapped image file.
#[derive(Debug)]
pub struct Device {
    /// Size of the blocks this device reads and writes, in bytes.
    pub block_size: u64,
    /// Total number of blocks on the device.
    pub nblocks: u64,
    /// Path of the backing image file.
    path: PathBuf,
    /// Mapped contents of the image; all reads and writes go through here.
    contents: MmapMut,
}

/// Whether the backing image is expected to already exist.
#[derive(PartialEq, Eq, Copy, Clone)]
enum ImageMode {
    /// Creating a fresh image
    New,
    /// Opening an existing image
    Load,
}

impl Drop for Device {
    /// Persist outstanding writes before the mapping goes away. Nothing to
    /// do when the backing file was already destructed.
    fn drop(&mut self) {
        if self.path.exists() {
            self.contents.flush().unwrap();
        }
    }
}

impl Device {
    fn create_device<P: AsRef<Path>>(
        path: P,
        block_size: u64,
        nblocks: u64,
        mode: ImageMode,
    ) -> error::Result<Device> {
        let path_buf = path.as_ref().to_path_buf();
        let contents = mmap_path(path, block_size * nblocks, mode)?;
        Ok(Device {
            block_size,
            nblocks,
            path: path_buf,
            contents,
        })
    }

    /// Create a fresh, zero-filled device of `nblocks` blocks of
    /// `block_size` bytes at `path`.
    /// Errors if a file already exists at `path`.
    pub fn new<P: AsRef<Path>>(path: P, block_size: u64, nblocks: u64) -> error::Result<Device> {
        Device::create_device(path, block_size, nblocks, ImageMode::New)
    }

    /// Open the existing device image at `path`, checking that its size
    /// matches `block_size * nblocks`.
    /// Errors if no file exists at `path`.
    pub fn load<P: AsRef<Path>>(path: P, block_size: u64, nblocks: u64) -> error::Result<Device> {
        Device::create_device(path, block_size, nblocks, ImageMode::Load)
    }

    /// Tear the device down and remove the backing image file.
    /// Panics if removing the file fails.
    pub fn destruct(self) {
        remove_file(&self.path).unwrap();
    }

    /// Total size of the device, in bytes.
    pub fn device_size(&self) -> u64 {
        self.block_size * self.nblocks
    }

    /// Path of the backing image file.
    pub fn device_path(&self) -> &Path {
        &self.path
    }

    fn index_to_addr(&self, index: u64) -> u64 {
        self.block_size * index
    }

    fn read(&self, addr: u64, nb: u64) -> error::Result<Box<[u8]>> {
        if addr + nb > self.device_size() {
            return Err(APIError::ControllerInput("read past the end of the device"));
        }
        let start = addr as usize;
        let end = (addr + nb) as usize;
        Ok(self.contents[start..end].into())
    }

    /// Read block `index` from the device, as an owned [`Block`].
    /// Errors if `index` is out of range.
    pub fn read_block(&self, index: u64) -> error::Result<Block> {
        if index >= self.nblocks {
            return Err(APIError::ControllerInput("block index out of range"));
        }
        let addr = self.index_to_addr(index);
        let data = self.read(addr, self.block_size)?;
        Ok(Block::new(index, data))
    }

    fn write(&mut self, addr: u64, b: &[u8]) -> error::Result<()> {
        if addr + b.len() as u64 > self.device_size() {
            return Err(APIError::ControllerInput(
                "write past the end of the device",
            ));
        }
        let start = addr as usize;
        let end = start + b.len();
        self.contents[start..end].copy_from_slice(b);
        Ok(())
    }

    /// Write block `b` back to the device at its own index.
    /// Errors if `b` is not exactly block sized or its index is out of range.
    pub fn write_block(&mut self, b: &Block) -> error::Result<()> {
        if b.len() != self.block_size {
            return Err(APIError::ControllerInput(
                "writing a block of the wrong size",
            ));
        }
        if b.block_no >= self.nblocks {
            return Err(APIError::ControllerInput("block index out of range"));
        }
        let addr = self.index_to_addr(b.block_no);
        self.write(addr, b.contents_as_ref())
    }
}

/// Map the image at `path`, creating it zero-filled (`New`) or checking its
/// size against `dsize` (`Load`).
fn mmap_path<P: AsRef<Path>>(path: P, dsize: u64, mode: ImageMode) -> error::Result<MmapMut> {
    let exists = path.as_ref().exists();
    match mode {
        ImageMode::Load if !exists => {
            return Err(APIError::ControllerInput(
                "tried to load a non-existing image",
            ));
        }
        ImageMode::New if exists => {
            return Err(APIError::ControllerInput(
                "tried to create a pre-existing image",
            ));
        }
        _ => {}
    }

    let f = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .open(path)?;

    if mode == ImageMode::Load {
        if f.metadata()?.len() != dsize {
            return Err(APIError::ControllerInput(
                "image size does not match the requested geometry",
            ));
        }
    } else {
        // extends the file to dsize; the new bytes read back as zero
        f.set_len(dsize)?;
    }

    let data = unsafe { memmap::MmapOptions::new().map_mut(&f)? };
    Ok(data)
}
