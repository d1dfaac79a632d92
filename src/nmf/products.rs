//! Dense and sparse-times-dense products used by the multiplicative updates.
//!
//! Every kernel writes into a fresh [`DenseArray`] whose rows are handed to
//! rayon workers as disjoint slices; inputs are only read.

use rayon::prelude::*;

use crate::dense::{ArrayAccess, ArrayAccessMut, DenseArray};
use crate::error::Result;
use crate::sparse::SparseVector;

/// Gram matrix of the rows of `a`: `G[i, j] = Σ_c a[i, c] · a[j, c]`.
///
/// Only the upper triangle is computed; the lower one is mirrored.
pub(crate) fn row_gram<A>(a: &A) -> Result<DenseArray<f64>>
where
    A: ArrayAccess<f64> + Sync,
{
    let n = a.size0();
    let len = a.size1();
    let mut gram = DenseArray::new(n, n)?;

    gram.par_rows_mut()?
        .enumerate()
        .try_for_each(|(i, mut row)| -> Result<()> {
            for j in i..n {
                let mut sum = 0.0;
                for c in 0..len {
                    sum += a.get_at(i, c)? * a.get_at(j, c)?;
                }
                row.set(j, sum)?;
            }
            Ok(())
        })?;

    for i in 1..n {
        for j in 0..i {
            let value = gram.get_at(j, i)?;
            gram.set_at(i, j, value)?;
        }
    }
    Ok(gram)
}

/// Dense product `a · b`, parallel over the rows of the result.
pub(crate) fn multiply<A, B>(a: &A, b: &B) -> Result<DenseArray<f64>>
where
    A: ArrayAccess<f64> + Sync,
    B: ArrayAccess<f64> + Sync,
{
    debug_assert_eq!(a.size1(), b.size0());
    let inner = a.size1();
    let columns = b.size1();
    let mut product = DenseArray::new(a.size0(), columns)?;

    product
        .par_rows_mut()?
        .enumerate()
        .try_for_each(|(i, mut row)| -> Result<()> {
            for j in 0..columns {
                let mut sum = 0.0;
                for l in 0..inner {
                    sum += a.get_at(i, l)? * b.get_at(l, j)?;
                }
                row.set(j, sum)?;
            }
            Ok(())
        })?;
    Ok(product)
}

/// Accumulates `wᵗ · A` for a batch of sparse rows starting at row `start`
/// into `target` (features × columns). Parallel over features.
pub(crate) fn accumulate_transposed_product(
    target: &mut DenseArray<f64>,
    w: &DenseArray<f64>,
    start: usize,
    batch: &[SparseVector<f64>],
) -> Result<()> {
    let weights = (start..start + batch.len())
        .map(|r| w.row(r))
        .collect::<Result<Vec<_>>>()?;

    target
        .par_rows_mut()?
        .enumerate()
        .try_for_each(|(feature, mut row)| -> Result<()> {
            for (row_weights, vector) in weights.iter().zip(batch) {
                let weight = row_weights.get(feature)?;
                if weight == 0.0 {
                    continue;
                }
                for (column, value) in vector {
                    row.add(column, weight * value)?;
                }
            }
            Ok(())
        })
}

/// Writes `A · hᵗ` for a batch of sparse rows starting at row `start` into
/// the matching rows of `target` (rows × features). Parallel over rows.
pub(crate) fn write_product_transposed(
    target: &mut DenseArray<f64>,
    h: &DenseArray<f64>,
    start: usize,
    batch: &[SparseVector<f64>],
) -> Result<()> {
    let features = h.size0();
    target
        .par_rows_mut()?
        .skip(start)
        .take(batch.len())
        .zip(batch.par_iter())
        .try_for_each(|(mut row, vector)| -> Result<()> {
            for feature in 0..features {
                let mut sum = 0.0;
                for (column, value) in vector {
                    sum += value * h.get_at(feature, column)?;
                }
                row.set(feature, sum)?;
            }
            Ok(())
        })
}

/// Squared reconstruction error `Σ_c (A[r, c] − (w·h)[r, c])²` summed over a
/// batch of rows starting at row `start`. Parallel over rows.
pub(crate) fn squared_error(
    w: &DenseArray<f64>,
    h: &DenseArray<f64>,
    start: usize,
    batch: &[SparseVector<f64>],
) -> Result<f64> {
    let columns = h.size1();
    batch
        .par_iter()
        .enumerate()
        .map(|(offset, vector)| -> Result<f64> {
            let weights = w.row(start + offset)?;
            let mut entries = vector.iter().peekable();
            let mut sum = 0.0;
            for column in 0..columns {
                let mut approximation = 0.0;
                for (feature, weight) in weights.iter().enumerate() {
                    approximation += weight * h.get_at(feature, column)?;
                }
                let actual = match entries.peek() {
                    Some(&(index, value)) if index == column => {
                        entries.next();
                        value
                    }
                    _ => 0.0,
                };
                let difference = actual - approximation;
                sum += difference * difference;
            }
            Ok(sum)
        })
        .try_reduce(|| 0.0, |a, b| Ok(a + b))
}

/// Multiplicative update `target[i, j] *= numerator[i, j] / denominator[i, j]`,
/// leaving the element untouched when both sides are equal.
pub(crate) fn apply_update(
    target: &mut DenseArray<f64>,
    numerator: &DenseArray<f64>,
    denominator: &DenseArray<f64>,
) -> Result<()> {
    target
        .par_rows_mut()?
        .enumerate()
        .try_for_each(|(i, mut row)| -> Result<()> {
            let numerators = numerator.row(i)?;
            let denominators = denominator.row(i)?;
            for j in 0..row.len() {
                let n = numerators.get(j)?;
                let d = denominators.get(j)?;
                if n != d {
                    let value = row.get(j)?;
                    row.set(j, value * n / d)?;
                }
            }
            Ok(())
        })
}
