//! Shared fixtures for the unit tests.

use std::cell::Cell;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::Result;
use crate::io::{InMemorySparseMatrixReader, RowIter, SparseMatrixReader};
use crate::sparse::SparseVector;
use crate::utils::Element;

pub(crate) fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Seeded `rows x columns` matrix where each cell is non-zero with
/// probability `density`, values in `[1, 10)`.
pub(crate) fn random_reader(
    rows: usize,
    columns: usize,
    density: f64,
    seed: u64,
) -> InMemorySparseMatrixReader<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    let rows: Vec<SparseVector<f64>> = (0..rows)
        .map(|_| {
            (0..columns)
                .filter_map(|column| {
                    rng.random_bool(density)
                        .then(|| (column, rng.random_range(1.0..10.0)))
                })
                .collect()
        })
        .collect();
    // explicit count keeps trailing empty columns
    InMemorySparseMatrixReader::with_columns_count(rows, columns).expect("indices below columns")
}

/// Counts how often the wrapped reader starts a scan.
pub(crate) struct CountingReader<R> {
    inner: R,
    scans: Cell<usize>,
}

impl<R> CountingReader<R> {
    pub(crate) fn new(inner: R) -> Self {
        Self {
            inner,
            scans: Cell::new(0),
        }
    }

    pub(crate) fn scans(&self) -> usize {
        self.scans.get()
    }
}

impl<T: Element, R: SparseMatrixReader<T>> SparseMatrixReader<T> for CountingReader<R> {
    fn rows_count(&self) -> usize {
        self.inner.rows_count()
    }

    fn columns_count(&self) -> usize {
        self.inner.columns_count()
    }

    fn elements_count(&self) -> u64 {
        self.inner.elements_count()
    }

    fn read_rows(&self) -> Result<RowIter<'_, T>> {
        self.scans.set(self.scans.get() + 1);
        self.inner.read_rows()
    }
}
