//! Collaborator layer for the corefs file system.
//!
//! This crate hosts everything the file-system core treats as an external
//! collaborator: the memory-mapped disk in [`controller`], the
//! [`types::Buffer`] and [`types::Block`] data carriers, the bit-exact
//! on-disk structures with their layout arithmetic, and the base error type
//! in [`error`].
//!
//! The core itself (allocator, inode cache, directories, path resolution)
//! lives in the `corefs` crate.

#![deny(missing_docs)]

pub mod controller;
pub mod error;
pub mod types;
