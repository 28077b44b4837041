//! Layered error types of the file-system core.
//!
//! Each layer wraps the one below it with a `#[from]` variant, so `?`
//! composes across layers without manual mapping. Only caller-causable
//! failures travel as errors; invariant violations (double free, out of
//! blocks or inodes, lock misuse, corrupt on-disk state) abort with a
//! tagged panic and are not represented here.

use corefs_api::error::APIError;
use thiserror::Error;

/// Errors from the block layer and the file-system lifecycle.
#[derive(Error, Debug)]
pub enum BlockError {
    /// Failure in the controller layer
    #[error("controller layer failure")]
    Api(#[from] APIError),
    /// The superblock or device geometry does not describe a usable layout
    #[error("invalid file system layout: {0}")]
    Layout(&'static str),
}

/// Errors from the inode layer.
#[derive(Error, Debug)]
pub enum InodeError {
    /// Failure in the controller layer
    #[error("controller layer failure")]
    Api(#[from] APIError),
    /// Failure in the block layer
    #[error("block layer failure")]
    Block(#[from] BlockError),
    /// The requested byte range is not valid for this inode
    #[error("invalid inode request: {0}")]
    Invalid(&'static str),
    /// A device inode names a major with no registered driver
    #[error("no device driver registered for major {0}")]
    NoDevice(i16),
}

/// Errors from the directory layer.
#[derive(Error, Debug)]
pub enum DirError {
    /// Failure in the inode layer
    #[error("inode layer failure")]
    Inode(#[from] InodeError),
    /// No entry with the requested name
    #[error("directory entry not found")]
    NotFound,
    /// An entry with the requested name already exists
    #[error("directory entry already exists")]
    Exists,
}

/// Errors from the path resolver.
#[derive(Error, Debug)]
pub enum PathError {
    /// Failure in the directory layer
    #[error("directory layer failure")]
    Dir(#[from] DirError),
    /// Some path component does not exist
    #[error("path component not found")]
    NotFound,
    /// An intermediate path component is not a directory
    #[error("path component is not a directory")]
    NotDir,
    /// A relative path was given but no working directory is set
    #[error("no working directory set")]
    NoCwd,
}
