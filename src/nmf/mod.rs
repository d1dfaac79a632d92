//! # Non-negative matrix factorization
//!
//! Approximates a sparse matrix `A` (rows × columns) by the product of two
//! non-negative factors `W` (rows × features) and `H` (features × columns)
//! with Lee–Seung multiplicative updates:
//!
//! ```text
//! H ← H ∘ (Wᵗ·A) ⊘ (Wᵗ·W·H)
//! W ← W ∘ (A·Hᵗ) ⊘ (W·H·Hᵗ)
//! ```
//!
//! `A` is never densified. Each update streams the rows of the reader in
//! batches, so a reader wrapped in
//! [`CachingSparseMatrixReader`](crate::io::CachingSparseMatrixReader) pays
//! for its source only once. The factors and every intermediate product are
//! [`DenseArray`]s in anonymous mappings.

mod factorization;
mod products;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;

use crate::dense::{ArrayAccess, DenseArray};
use crate::error::{Error, Result};
use crate::io::SparseMatrixReader;
use crate::sparse::SparseVector;

pub use factorization::NmFactorization;

/// Builder for configuring [`Nmf`] instances.
///
/// # Example Usage
/// ```ignore
/// let nmf = NmfBuilder::new()
///     .random_seed(7)
///     .batch_size(4096)
///     .tolerance(1e-9)
///     .build(reader)?;
/// let factorization = nmf.factorize(10, 50)?;
/// ```
#[derive(Debug, Clone)]
pub struct NmfBuilder {
    random_seed: u64,
    batch_size: usize,
    tolerance: Option<f64>,
}

impl Default for NmfBuilder {
    fn default() -> Self {
        Self {
            random_seed: 42,
            batch_size: 1024,
            tolerance: None,
        }
    }
}

impl NmfBuilder {
    /// Creates a new builder with default parameters.
    ///
    /// Default values:
    /// - `random_seed`: 42
    /// - `batch_size`: 1024
    /// - `tolerance`: none, every requested iteration runs
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed of the initial random factors. Equal seeds give equal factors
    /// regardless of the thread count.
    pub fn random_seed(mut self, random_seed: u64) -> Self {
        self.random_seed = random_seed;
        self
    }

    /// Number of sparse rows held in memory at once while streaming the
    /// matrix.
    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Stops [`Nmf::factorize`] early once the distance drops to or below
    /// `tolerance`. Checking it costs an extra scan per iteration.
    pub fn tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = Some(tolerance);
        self
    }

    pub fn build<R: SparseMatrixReader<f64>>(self, reader: R) -> Result<Nmf<R>> {
        if self.batch_size == 0 {
            return Err(Error::argument("batch size must be positive"));
        }
        if let Some(tolerance) = self.tolerance {
            if tolerance.is_nan() || tolerance < 0.0 {
                return Err(Error::argument("tolerance must be a non-negative number"));
            }
        }
        Ok(Nmf {
            reader,
            random_seed: self.random_seed,
            batch_size: self.batch_size,
            tolerance: self.tolerance,
        })
    }
}

/// Factorization engine over a restartable sparse matrix reader.
pub struct Nmf<R> {
    reader: R,
    random_seed: u64,
    batch_size: usize,
    tolerance: Option<f64>,
}

impl<R: SparseMatrixReader<f64>> Nmf<R> {
    /// Engine with the default [`NmfBuilder`] settings.
    pub fn new(reader: R) -> Self {
        let defaults = NmfBuilder::default();
        Self {
            reader,
            random_seed: defaults.random_seed,
            batch_size: defaults.batch_size,
            tolerance: defaults.tolerance,
        }
    }

    pub fn reader(&self) -> &R {
        &self.reader
    }

    pub fn into_inner(self) -> R {
        self.reader
    }

    /// Allocates `W` (rows × `features_count`) and `H` (`features_count` ×
    /// columns) filled with uniform values in `[0, 1)`.
    pub fn random_factorization(&self, features_count: usize) -> Result<NmFactorization> {
        if features_count == 0 {
            return Err(Error::argument("features count must be positive"));
        }
        let rows_count = self.reader.rows_count();
        let rank_bound = rows_count.min(self.reader.columns_count());
        if features_count > rank_bound {
            log::warn!(
                "{} features exceed the largest useful rank {} of a {}x{} matrix",
                features_count,
                rank_bound,
                rows_count,
                self.reader.columns_count()
            );
        }

        let mut w = DenseArray::new(rows_count, features_count)?;
        let mut h = DenseArray::new(features_count, self.reader.columns_count())?;
        // W rows use streams 0..m and H rows streams m..m+k
        fill_random(&mut w, self.random_seed, 0)?;
        fill_random(&mut h, self.random_seed, rows_count as u64)?;

        log::debug!(
            "Initialized random factorization with W {}x{} and H {}x{}",
            w.size0(),
            w.size1(),
            h.size0(),
            h.size1()
        );
        Ok(NmFactorization::new(w, h))
    }

    /// Performs one multiplicative update of `h` followed by one of `w`.
    ///
    /// Elements whose numerator equals their denominator are left unchanged,
    /// which keeps `0 / 0` from producing NaN.
    pub fn update_factorization(
        &self,
        w: &mut DenseArray<f64>,
        h: &mut DenseArray<f64>,
    ) -> Result<()> {
        self.check_factors(w, h)?;
        let features_count = w.size1();

        // H ← H ∘ (Wᵗ·A) ⊘ (Wᵗ·W·H)
        let mut hn = DenseArray::new(features_count, self.reader.columns_count())?;
        self.for_each_batch(|start, batch| {
            products::accumulate_transposed_product(&mut hn, &*w, start, batch)
        })?;
        let wtw = products::row_gram(&w.transpose())?;
        let hd = products::multiply(&wtw, &*h)?;
        products::apply_update(h, &hn, &hd)?;
        drop((hn, hd, wtw));

        // W ← W ∘ (A·Hᵗ) ⊘ (W·H·Hᵗ)
        let mut wn = DenseArray::new(self.reader.rows_count(), features_count)?;
        self.for_each_batch(|start, batch| {
            products::write_product_transposed(&mut wn, &*h, start, batch)
        })?;
        let hht = products::row_gram(&*h)?;
        let wd = products::multiply(&*w, &hht)?;
        products::apply_update(w, &wn, &wd)
    }

    /// Runs `iterations_count` updates from a random start and records the
    /// final distance. Stops early when a tolerance is configured and
    /// reached.
    pub fn factorize(
        &self,
        features_count: usize,
        iterations_count: usize,
    ) -> Result<NmFactorization> {
        if iterations_count == 0 {
            return Err(Error::argument("iterations count must be positive"));
        }
        let mut factorization = self.random_factorization(features_count)?;
        log::info!(
            "Factorizing {}x{} matrix with {} elements into {} features",
            self.reader.rows_count(),
            self.reader.columns_count(),
            self.reader.elements_count(),
            features_count
        );

        let mut distance = None;
        for iteration in 0..iterations_count {
            let (w, h) = factorization.factors_mut();
            self.update_factorization(w, h)?;

            if let Some(tolerance) = self.tolerance {
                let current = self.euclidean_distance(w, h)?;
                log::debug!("Iteration {}: distance {}", iteration + 1, current);
                distance = Some(current);
                if current <= tolerance {
                    log::info!(
                        "Distance {} reached tolerance after {} iterations",
                        current,
                        iteration + 1
                    );
                    break;
                }
            } else {
                log::trace!("Iteration {} done", iteration + 1);
            }
        }

        let distance = match distance {
            Some(distance) => distance,
            None => self.euclidean_distance(factorization.w(), factorization.h())?,
        };
        log::info!("Factorization finished with distance {}", distance);
        factorization.set_euclidean_distance(distance);
        Ok(factorization)
    }

    /// Frobenius norm of `A − W·H`. Rows are summed in parallel, so the last
    /// bits may differ between runs.
    pub fn euclidean_distance(&self, w: &DenseArray<f64>, h: &DenseArray<f64>) -> Result<f64> {
        self.check_factors(w, h)?;
        let mut sum = 0.0;
        self.for_each_batch(|start, batch| {
            sum += products::squared_error(w, h, start, batch)?;
            Ok(())
        })?;
        Ok(sum.sqrt())
    }

    fn check_factors(&self, w: &DenseArray<f64>, h: &DenseArray<f64>) -> Result<()> {
        if w.size0() != self.reader.rows_count() {
            return Err(Error::argument(format!(
                "W has {} rows but the matrix has {}",
                w.size0(),
                self.reader.rows_count()
            )));
        }
        if h.size1() != self.reader.columns_count() {
            return Err(Error::argument(format!(
                "H has {} columns but the matrix has {}",
                h.size1(),
                self.reader.columns_count()
            )));
        }
        if w.size1() != h.size0() {
            return Err(Error::argument(format!(
                "W has {} features but H has {}",
                w.size1(),
                h.size0()
            )));
        }
        Ok(())
    }

    /// Streams the matrix rows in batches of at most `batch_size`, passing
    /// the index of each batch's first row.
    fn for_each_batch<F>(&self, mut f: F) -> Result<()>
    where
        F: FnMut(usize, &[SparseVector<f64>]) -> Result<()>,
    {
        let mut batch = Vec::with_capacity(self.batch_size.min(self.reader.rows_count()));
        let mut start = 0;
        for row in self.reader.read_rows()? {
            batch.push(row?);
            if batch.len() == self.batch_size {
                f(start, &batch)?;
                start += batch.len();
                batch.clear();
            }
        }
        if !batch.is_empty() {
            f(start, &batch)?;
        }
        Ok(())
    }
}

/// Fills every row from its own ChaCha stream so the values do not depend on
/// how rayon schedules the rows.
fn fill_random(array: &mut DenseArray<f64>, seed: u64, first_stream: u64) -> Result<()> {
    array
        .par_rows_mut()?
        .enumerate()
        .try_for_each(|(i, mut row)| -> Result<()> {
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            rng.set_stream(first_stream + i as u64);
            for j in 0..row.len() {
                row.set(j, rng.random::<f64>())?;
            }
            Ok(())
        })
}
