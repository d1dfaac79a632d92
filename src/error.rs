//! Error type shared by arrays, readers, writers and the factorization engine.

use std::io;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid constructor or method argument. Raised before any side effect.
    #[error("invalid argument: {0}")]
    Argument(String),

    #[error("index {index} is out of range (bound {bound})")]
    OutOfRange { index: usize, bound: usize },

    /// Single-index access on an array where both dimensions exceed one.
    #[error("array of shape {size0}x{size1} cannot be addressed with a single index")]
    NotOneDimensional { size0: usize, size1: usize },

    #[error("format error: {0}")]
    Format(String),

    #[error("{0} has been closed")]
    Disposed(&'static str),

    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    pub(crate) fn argument(message: impl Into<String>) -> Self {
        Error::Argument(message.into())
    }

    pub(crate) fn format(message: impl Into<String>) -> Self {
        Error::Format(message.into())
    }

    pub fn is_argument(&self) -> bool {
        matches!(self, Error::Argument(_))
    }

    pub fn is_out_of_range(&self) -> bool {
        matches!(
            self,
            Error::OutOfRange { .. } | Error::NotOneDimensional { .. }
        )
    }

    pub fn is_format(&self) -> bool {
        matches!(self, Error::Format(_))
    }

    pub fn is_disposed(&self) -> bool {
        matches!(self, Error::Disposed(_))
    }
}
