//! Base error type of the collaborator layer.
//!
//! Higher layers embed [`APIError`] in their own [`thiserror`] enums through
//! a `#[from]` variant, so the `?` operator converts errors upward without
//! manual mapping. See `error.rs` in the `corefs` crate for the layered
//! enums built on top of this one.

use std::io;
use thiserror::Error;

/// Errors produced by the device controller and the block/buffer carriers.
#[derive(Error, Debug)]
pub enum APIError {
    /// I/O failure while touching the backing image file
    #[error("I/O failure in the controller layer")]
    Io(#[from] io::Error),
    /// Failure while encoding or decoding an on-disk structure
    #[error("serialization failure in the controller layer")]
    Serialize(#[from] bincode::Error),
    /// Invalid input to the controller layer
    #[error("invalid controller input: {0}")]
    ControllerInput(&'static str),
    /// Invalid input to a block or buffer operation
    #[error("invalid block input: {0}")]
    BlockInput(&'static str),
    /// Catch-all wrapper for errors that do not fit the fixed variants.
    /// Prefer a dedicated variant when the error needs to be handled.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Shorthand for results carrying an [`APIError`].
pub type Result<T> = std::result::Result<T, APIError>;
