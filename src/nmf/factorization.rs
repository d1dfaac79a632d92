use crate::dense::{ArrayAccess, DenseArray};
use crate::error::Result;

/// Result of a factorization `A ≈ W·H`, owning both factor arrays.
///
/// Dropping the factorization releases both mappings.
#[derive(Debug)]
pub struct NmFactorization {
    w: DenseArray<f64>,
    h: DenseArray<f64>,
    euclidean_distance: Option<f64>,
}

impl NmFactorization {
    pub(crate) fn new(w: DenseArray<f64>, h: DenseArray<f64>) -> Self {
        Self {
            w,
            h,
            euclidean_distance: None,
        }
    }

    /// Weights matrix, rows × features.
    pub fn w(&self) -> &DenseArray<f64> {
        &self.w
    }

    /// Features matrix, features × columns.
    pub fn h(&self) -> &DenseArray<f64> {
        &self.h
    }

    pub fn features_count(&self) -> usize {
        self.h.size0()
    }

    /// Distance computed after the last update, if any.
    pub fn euclidean_distance(&self) -> Option<f64> {
        self.euclidean_distance
    }

    pub(crate) fn set_euclidean_distance(&mut self, distance: f64) {
        self.euclidean_distance = Some(distance);
    }

    /// Both factors at once, for driving
    /// [`Nmf::update_factorization`](super::Nmf::update_factorization) by hand.
    pub fn factors_mut(&mut self) -> (&mut DenseArray<f64>, &mut DenseArray<f64>) {
        (&mut self.w, &mut self.h)
    }

    pub fn into_parts(self) -> (DenseArray<f64>, DenseArray<f64>) {
        (self.w, self.h)
    }

    /// Releases both arrays, reporting the first failure. Both are released
    /// even if the first one fails to flush.
    pub fn close(&mut self) -> Result<()> {
        let w = self.w.close();
        let h = self.h.close();
        w.and(h)
    }
}
