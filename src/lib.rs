pub mod dense;
pub mod error;
pub mod io;
pub mod nmf;
pub mod sparse;
mod utils;

#[cfg(test)]
mod testing;

pub use dense::{ArrayAccess, ArrayAccessMut, DenseArray};
pub use error::{Error, Result};
pub use io::{
    CachingSparseMatrixReader, InMemorySparseMatrixReader, MatrixMarketReader, MatrixMarketWriter,
    SparseMatrixReader, SparseMatrixWriter,
};
pub use nmf::{NmFactorization, Nmf, NmfBuilder};
pub use sparse::SparseVector;
pub use utils::Element;
