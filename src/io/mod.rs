//! # Sparse matrix streaming
//!
//! Sources of sparse rows share the [`SparseMatrixReader`] trait: the
//! MatrixMarket file reader, the caching decorator that replays a source from
//! a mapped cache, and an in-memory reader. Every `read_rows` call starts an
//! independent scan from the first row.

use std::borrow::Borrow;

use crate::error::Result;
use crate::sparse::SparseVector;
use crate::utils::Element;

mod cached;
mod matrix_market;
mod memory;

pub use cached::CachingSparseMatrixReader;
pub use matrix_market::{MatrixMarketReader, MatrixMarketWriter, MATRIX_MARKET_HEADER};
pub use memory::InMemorySparseMatrixReader;

/// Lazily produced rows of one scan. The first error ends the scan.
pub type RowIter<'a, T> = Box<dyn Iterator<Item = Result<SparseVector<T>>> + 'a>;

pub trait SparseMatrixReader<T: Element> {
    fn rows_count(&self) -> usize;

    fn columns_count(&self) -> usize;

    fn elements_count(&self) -> u64;

    /// Starts a new scan over all rows, including empty ones.
    fn read_rows(&self) -> Result<RowIter<'_, T>>;
}

impl<T: Element, R: SparseMatrixReader<T> + ?Sized> SparseMatrixReader<T> for &R {
    fn rows_count(&self) -> usize {
        (**self).rows_count()
    }

    fn columns_count(&self) -> usize {
        (**self).columns_count()
    }

    fn elements_count(&self) -> u64 {
        (**self).elements_count()
    }

    fn read_rows(&self) -> Result<RowIter<'_, T>> {
        (**self).read_rows()
    }
}

impl<T: Element, R: SparseMatrixReader<T> + ?Sized> SparseMatrixReader<T> for Box<R> {
    fn rows_count(&self) -> usize {
        (**self).rows_count()
    }

    fn columns_count(&self) -> usize {
        (**self).columns_count()
    }

    fn elements_count(&self) -> u64 {
        (**self).elements_count()
    }

    fn read_rows(&self) -> Result<RowIter<'_, T>> {
        (**self).read_rows()
    }
}

pub trait SparseMatrixWriter {
    /// Rows written by the last [`write`](Self::write), empty ones included.
    fn rows_count(&self) -> usize;

    /// One past the largest column index written.
    fn columns_count(&self) -> usize;

    /// Non-zero elements written.
    fn elements_count(&self) -> u64;

    fn write<T, I, V>(&mut self, rows: I) -> Result<()>
    where
        T: Element,
        I: IntoIterator<Item = V>,
        V: Borrow<SparseVector<T>>;
}
