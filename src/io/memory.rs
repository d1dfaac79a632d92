use nalgebra_sparse::CsrMatrix;

use crate::error::{Error, Result};
use crate::io::{RowIter, SparseMatrixReader};
use crate::sparse::SparseVector;
use crate::utils::Element;

/// Reader over rows already held in memory.
///
/// Scans clone the rows, so any number of them may run concurrently.
#[derive(Debug, Clone)]
pub struct InMemorySparseMatrixReader<T: Element> {
    rows: Vec<SparseVector<T>>,
    columns_count: usize,
    elements_count: u64,
}

impl<T: Element> InMemorySparseMatrixReader<T> {
    /// The columns count is one past the largest index of any row.
    pub fn new(rows: Vec<SparseVector<T>>) -> Self {
        let columns_count = rows
            .iter()
            .filter_map(SparseVector::max_index)
            .max()
            .map_or(0, |index| index + 1);
        let elements_count = count_elements(&rows);
        Self {
            rows,
            columns_count,
            elements_count,
        }
    }

    /// Uses an explicit columns count, which must cover every stored index.
    pub fn with_columns_count(rows: Vec<SparseVector<T>>, columns_count: usize) -> Result<Self> {
        if let Some(index) = rows.iter().filter_map(SparseVector::max_index).max() {
            if index >= columns_count {
                return Err(Error::argument(format!(
                    "column index {} does not fit into {} columns",
                    index, columns_count
                )));
            }
        }
        let elements_count = count_elements(&rows);
        Ok(Self {
            rows,
            columns_count,
            elements_count,
        })
    }

    pub fn rows(&self) -> &[SparseVector<T>] {
        &self.rows
    }
}

impl<T: Element> From<&CsrMatrix<T>> for InMemorySparseMatrixReader<T> {
    fn from(matrix: &CsrMatrix<T>) -> Self {
        let rows = matrix
            .row_iter()
            .map(|row| {
                row.col_indices()
                    .iter()
                    .copied()
                    .zip(row.values().iter().copied())
                    .collect()
            })
            .collect::<Vec<SparseVector<T>>>();
        let elements_count = count_elements(&rows);
        Self {
            rows,
            columns_count: matrix.ncols(),
            elements_count,
        }
    }
}

fn count_elements<T: Element>(rows: &[SparseVector<T>]) -> u64 {
    rows.iter().map(|row| row.non_zero_count() as u64).sum()
}

impl<T: Element> SparseMatrixReader<T> for InMemorySparseMatrixReader<T> {
    fn rows_count(&self) -> usize {
        self.rows.len()
    }

    fn columns_count(&self) -> usize {
        self.columns_count
    }

    fn elements_count(&self) -> u64 {
        self.elements_count
    }

    fn read_rows(&self) -> Result<RowIter<'_, T>> {
        Ok(Box::new(self.rows.iter().cloned().map(Ok)))
    }
}
